//! Beam-search decoding engine for encoder-decoder models.
//!
//! The engine is a pure state transformer: a [`search::BeamSearchStrategy`]
//! builds a [`search::SearchJob`] for a batch of source sequences, the caller
//! feeds it one step of decoder logits at a time, and the job selects the
//! surviving hypotheses until every beam has finished or the length ceiling is
//! reached. [`generate`] wraps that loop around a [`generate::DecoderOracle`].

pub mod generate;
pub mod search;
pub mod vocab;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use search::{BeamSearchConfig, BeamSearchStrategy, FinalResult, SearchError, SearchJob};
pub use vocab::VocabularyInfo;
