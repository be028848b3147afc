//! Command-line driver for `seqgen-core`: runs beam search over a bigram
//! table and reports the hypotheses as JSON.

pub mod config;
pub mod logging;
pub mod report;
