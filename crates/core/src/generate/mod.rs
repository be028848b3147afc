//! Decoding loop driver.
//!
//! The search engine never calls a model itself. A [`DecoderOracle`] scores
//! the current token histories, and [`BeamSearchStrategy::generate`] runs the
//! `histories -> decode_step -> update -> reorder_state` loop until the job is
//! done.

mod bigram;
mod encoder_decoder;

pub use bigram::BigramOracle;
pub use encoder_decoder::{EncoderDecoderOracle, Seq2SeqModel};

use candle_core::Tensor;
use tracing::debug;

use crate::search::{BeamSearchStrategy, FinalResult, Result};

/// Next-token scorer driven by a search job.
pub trait DecoderOracle {
    /// Score the next token for every history.
    ///
    /// `histories` is `[rows, len]` (`U32`), batch-major. Returns
    /// `[rows, vocab]` logits.
    fn decode_step(&mut self, histories: &Tensor) -> candle_core::Result<Tensor>;

    /// Reorder incremental state after an update.
    ///
    /// `rows[i]` is the input row of the previous `decode_step` that new row
    /// `i` descends from.
    fn reorder_state(&mut self, _rows: &Tensor) -> candle_core::Result<()> {
        Ok(())
    }
}

impl BeamSearchStrategy {
    /// Decode `src_tokens` to completion with `oracle`.
    ///
    /// `prefix_tokens` and `top` have the meaning of
    /// [`BeamSearchStrategy::new_search_job`] and
    /// [`crate::SearchJob::finalize`].
    pub fn generate<O: DecoderOracle + ?Sized>(
        &self,
        oracle: &mut O,
        src_tokens: &Tensor,
        prefix_tokens: Option<&Tensor>,
        top: Option<usize>,
    ) -> Result<FinalResult> {
        let mut job = self.new_search_job(src_tokens, prefix_tokens)?;

        while !job.is_done() {
            let histories = job.histories()?;
            let logits = oracle.decode_step(&histories)?;
            job.update(&logits)?;
            if let Some(rows) = job.beam_reorder_indices()? {
                oracle.reorder_state(&rows)?;
            }
        }

        debug!(
            steps = job.step(),
            max_len = job.max_len(),
            "beam search finished"
        );
        job.finalize(top)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::BeamSearchConfig;
    use crate::testing::{one_hot_logits, tiny_vocab, ScriptedOracle};
    use candle_core::{DType, Device};

    fn strategy(config: BeamSearchConfig) -> BeamSearchStrategy {
        BeamSearchStrategy::new(tiny_vocab(), config).unwrap()
    }

    fn src(batch: usize) -> Tensor {
        Tensor::zeros((batch, 3), DType::U32, &Device::Cpu).unwrap()
    }

    #[test]
    fn generate_stops_when_every_beam_ends() {
        let bs = strategy(BeamSearchConfig {
            beam_size: 1,
            min_len: 0,
            max_len: 10,
            ..Default::default()
        });
        let vocab = tiny_vocab();
        let mut oracle = ScriptedOracle::new(
            vocab.size,
            vec![
                one_hot_logits(vocab.size, &[5]),
                one_hot_logits(vocab.size, &[6]),
                one_hot_logits(vocab.size, &[vocab.eos]),
            ],
        );

        let result = bs.generate(&mut oracle, &src(1), None, None).unwrap();
        let tokens: Vec<Vec<Vec<u32>>> = result.tokens.to_vec3().unwrap();
        assert_eq!(tokens, vec![vec![vec![vocab.bos, 5, 6, vocab.eos]]]);

        // the oracle saw the growing history once per step
        let lens: Vec<Vec<usize>> = oracle.calls().iter().map(|h| h.dims().to_vec()).collect();
        assert_eq!(lens, vec![vec![1, 1], vec![1, 2], vec![1, 3]]);
        assert_eq!(oracle.reorders().len(), 3);
    }

    #[test]
    fn generate_runs_to_the_length_ceiling() {
        let bs = strategy(BeamSearchConfig {
            beam_size: 2,
            min_len: 0,
            max_len: 4,
            ..Default::default()
        });
        let vocab = tiny_vocab();
        let step = one_hot_logits(vocab.size, &[4, 5]);
        let mut oracle = ScriptedOracle::repeating(vocab.size, step);

        let result = bs.generate(&mut oracle, &src(2), None, Some(1)).unwrap();
        assert_eq!(result.tokens.dims(), &[2, 1, 5]);

        let tokens: Vec<Vec<Vec<u32>>> = result.tokens.to_vec3().unwrap();
        for batch in &tokens {
            assert_eq!(batch[0][4], vocab.eos);
        }
        assert_eq!(oracle.calls().len(), 4);
        // first call sees one row per batch element, later calls every beam
        assert_eq!(oracle.calls()[0].dims(), &[2, 1]);
        assert_eq!(oracle.calls()[1].dims(), &[4, 2]);
    }

    #[test]
    fn oracle_errors_propagate() {
        let bs = strategy(BeamSearchConfig {
            beam_size: 1,
            min_len: 0,
            max_len: 10,
            ..Default::default()
        });
        let mut oracle = ScriptedOracle::new(tiny_vocab().size, vec![]);
        let err = bs.generate(&mut oracle, &src(1), None, None).unwrap_err();
        assert!(matches!(err, crate::SearchError::Candle(_)));
    }
}
