//! Shared test utilities for seqgen-core.
//!
//! Scripted decoder oracles and a tiny vocabulary, so search tests can
//! drive jobs without a model.

mod scripted_oracle;

pub use scripted_oracle::{one_hot_logits, ScriptedOracle};

use crate::vocab::VocabularyInfo;

/// 8-token vocabulary: UNK = 0, BOS = 1, EOS = 2, PAD = 3, words 4..8.
pub fn tiny_vocab() -> VocabularyInfo {
    VocabularyInfo {
        size: 8,
        bos: 1,
        eos: 2,
        unk: 0,
        pad: 3,
    }
}
