//! Beam search over decoder log-probabilities.
//!
//! [`BeamSearchStrategy`] validates a [`BeamSearchConfig`] against the
//! vocabulary and creates one [`SearchJob`] per batch of sources. The caller
//! (or [`crate::generate`]) feeds each job one step of logits at a time until
//! it reports done, then extracts hypotheses with [`SearchJob::finalize`].

mod error;
mod job;
mod log_prob;
mod selector;
mod strategy;

pub use error::{Result, SearchError};
pub use job::{FinalResult, SearchJob};
pub use log_prob::{force_token, logits_to_log_probs, LogProbTransform};
pub use selector::{choose_beams, SelectionResult};
pub use strategy::{stretch_to_beams, BeamSearchConfig, BeamSearchStrategy};
