//! JSON report printed by `seqgen decode`.

use serde::Serialize;
use seqgen_core::{FinalResult, SearchError, VocabularyInfo};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hypothesis {
    /// Generated tokens, prefix excluded, trailing PAD stripped.
    pub tokens: Vec<u32>,
    /// Cumulative log-probability at the last position.
    pub score: f32,
    pub finished: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodeReport {
    pub beam_size: usize,
    pub steps: usize,
    /// `[batch][hypothesis]`, in the order returned by the search.
    pub hypotheses: Vec<Vec<Hypothesis>>,
}

impl DecodeReport {
    pub fn from_result(
        result: &FinalResult,
        vocab: &VocabularyInfo,
        beam_size: usize,
        n_prefix_tokens: usize,
    ) -> Result<Self, SearchError> {
        let tokens: Vec<Vec<Vec<u32>>> = result.tokens.to_vec3()?;
        let finals: Vec<Vec<f32>> = result.final_scores()?.to_vec2()?;
        let steps = result.tokens.dim(2)?.saturating_sub(n_prefix_tokens);

        let hypotheses = tokens
            .iter()
            .zip(&finals)
            .map(|(batch, scores)| {
                batch
                    .iter()
                    .zip(scores)
                    .map(|(row, &score)| {
                        let generated: Vec<u32> = row[n_prefix_tokens..]
                            .iter()
                            .copied()
                            .filter(|&t| t != vocab.pad)
                            .collect();
                        Hypothesis {
                            finished: generated.last() == Some(&vocab.eos),
                            tokens: generated,
                            score,
                        }
                    })
                    .collect()
            })
            .collect();

        Ok(Self {
            beam_size,
            steps,
            hypotheses,
        })
    }
}
