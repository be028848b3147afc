//! Conversion of raw decoder scores into masked log-probabilities.
//!
//! Two layers:
//! - [`logits_to_log_probs`]: temperature, stable log-softmax, structural
//!   masking of PAD/BOS and containment of NaN/+Inf rows
//! - [`LogProbTransform`]: step-aware masking on top (min/max length, UNK
//!   penalty)
//!
//! All arithmetic runs on host `f32` slices so results do not depend on the
//! tensor backend.

use candle_core::{DType, Tensor};

use super::error::{Result, SearchError};
use crate::vocab::VocabularyInfo;

/// Convert one row of logits to log-probabilities in place.
///
/// Returns `false` when the row contained NaN or +Inf (after temperature
/// scaling) and was replaced by `-inf` everywhere.
pub(crate) fn log_prob_row(row: &mut [f32], temperature: f32, pad: u32, bos: u32) -> bool {
    // temperature == 0 leaves the logits unscaled
    if temperature > 0.0 {
        for x in row.iter_mut() {
            *x /= temperature;
        }
    }

    let poisoned = row
        .iter()
        .any(|&x| x.is_nan() || x == f32::INFINITY);
    if poisoned {
        row.fill(f32::NEG_INFINITY);
        return false;
    }

    let max_logit = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if max_logit == f32::NEG_INFINITY {
        // exp-sum of an all -inf row is zero; nothing is reachable
        row.fill(f32::NEG_INFINITY);
    } else {
        let exp_sum_ln = row
            .iter()
            .map(|&x| (x - max_logit).exp())
            .sum::<f32>()
            .ln();
        for x in row.iter_mut() {
            *x = *x - max_logit - exp_sum_ln;
        }
    }

    for special in [pad, bos] {
        if let Some(x) = row.get_mut(special as usize) {
            *x = f32::NEG_INFINITY;
        }
    }
    true
}

/// Set every entry of `row` except `token` to `-inf`.
pub(crate) fn force_token_row(row: &mut [f32], token: u32) {
    for (i, x) in row.iter_mut().enumerate() {
        if i != token as usize {
            *x = f32::NEG_INFINITY;
        }
    }
}

fn rows_of(logits: &Tensor) -> Result<(usize, usize, Vec<f32>)> {
    let (rows, vocab) = logits.dims2()?;
    let data = logits
        .to_dtype(DType::F32)?
        .flatten_all()?
        .to_vec1::<f32>()?;
    Ok((rows, vocab, data))
}

/// Log-softmax over the last dimension of `[rows, vocab]` logits.
///
/// `temperature` divides the logits before normalisation; `0.0` skips the
/// scaling entirely. PAD and BOS are always `-inf`. Rows poisoned by NaN or
/// +Inf come back as all `-inf`.
pub fn logits_to_log_probs(logits: &Tensor, temperature: f32, pad: u32, bos: u32) -> Result<Tensor> {
    let (rows, vocab, mut data) = rows_of(logits)?;
    if vocab > 0 {
        for row in data.chunks_mut(vocab) {
            log_prob_row(row, temperature, pad, bos);
        }
    }
    Ok(Tensor::from_vec(data, (rows, vocab), logits.device())?)
}

/// Keep only `token` in every row of `[rows, vocab]` scores.
pub fn force_token(scores: &Tensor, token: u32) -> Result<Tensor> {
    let (rows, vocab, mut data) = rows_of(scores)?;
    if token as usize >= vocab {
        return Err(SearchError::InvalidArgument(format!(
            "forced token {token} is outside the vocabulary of size {vocab}"
        )));
    }
    for row in data.chunks_mut(vocab) {
        force_token_row(row, token);
    }
    Ok(Tensor::from_vec(data, (rows, vocab), scores.device())?)
}

/// Step-aware log-probability computation used by a search job.
#[derive(Debug, Clone)]
pub struct LogProbTransform {
    pub vocab: VocabularyInfo,
    pub temperature: f32,
    pub unk_penalty: f32,
    pub min_len: usize,
}

impl LogProbTransform {
    /// Masked log-probabilities for `[rows, vocab]` logits at `step`.
    pub fn apply(&self, logits: &Tensor, step: usize, max_len: usize) -> Result<Tensor> {
        let (rows, vocab, mut data) = rows_of(logits)?;
        if vocab != self.vocab.size {
            return Err(SearchError::VocabMismatch {
                expected: self.vocab.size,
                actual: vocab,
            });
        }
        self.apply_rows(&mut data, step, max_len);
        Ok(Tensor::from_vec(data, (rows, vocab), logits.device())?)
    }

    /// In-place variant over row-major `[rows, vocab]` data.
    ///
    /// Returns the number of poisoned rows.
    pub(crate) fn apply_rows(&self, data: &mut [f32], step: usize, max_len: usize) -> usize {
        let eos = self.vocab.eos as usize;
        let unk = self.vocab.unk as usize;
        let mut poisoned = 0;

        for row in data.chunks_mut(self.vocab.size) {
            if !log_prob_row(row, self.temperature, self.vocab.pad, self.vocab.bos) {
                poisoned += 1;
            }

            if step >= max_len {
                // must end at the ceiling; min_len cannot override this
                for (i, x) in row.iter_mut().enumerate() {
                    if i != eos {
                        *x = f32::NEG_INFINITY;
                    }
                }
            } else if step < self.min_len {
                row[eos] = f32::NEG_INFINITY;
            }

            row[unk] -= self.unk_penalty;
        }

        if poisoned > 0 {
            tracing::warn!(step, poisoned, "masked decoder rows containing NaN or +Inf");
        }
        poisoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    const NEG_INF: f32 = f32::NEG_INFINITY;

    fn assert_row_close(actual: &[f32], expected: &[f32]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            if e.is_infinite() {
                assert_eq!(a, e, "row {actual:?} != {expected:?}");
            } else {
                assert!((a - e).abs() < 1e-5, "row {actual:?} != {expected:?}");
            }
        }
    }

    fn vocab() -> VocabularyInfo {
        VocabularyInfo::new(8, 1, 2, 0, 3).unwrap()
    }

    fn transform(min_len: usize) -> LogProbTransform {
        LogProbTransform {
            vocab: vocab(),
            temperature: 0.1,
            unk_penalty: 0.5,
            min_len,
        }
    }

    #[test]
    fn log_probs_mask_specials_and_poisoned_rows() {
        let logits = Tensor::new(
            &[
                [0.0f32, 0.0, 0.0, 1.0],
                [0.0, 0.0, 1.0, f32::NAN],
                [0.0, 0.0, 1.0, f32::INFINITY],
                [0.0, 0.0, 1.0, NEG_INF],
            ],
            &Device::Cpu,
        )
        .unwrap();

        let out: Vec<Vec<f32>> = logits_to_log_probs(&logits, 0.0, 0, 1)
            .unwrap()
            .to_vec2()
            .unwrap();

        assert_row_close(&out[0], &[NEG_INF, NEG_INF, -1.743668, -0.743668]);
        assert_row_close(&out[1], &[NEG_INF; 4]);
        assert_row_close(&out[2], &[NEG_INF; 4]);
        assert_row_close(&out[3], &[NEG_INF, NEG_INF, -0.551445, NEG_INF]);
    }

    #[test]
    fn temperature_divides_logits() {
        let mut scaled = vec![0.0f32, 0.0, 1.0, 2.0];
        log_prob_row(&mut scaled, 0.5, 0, 1);
        let mut manual = vec![0.0f32, 0.0, 2.0, 4.0];
        log_prob_row(&mut manual, 0.0, 0, 1);
        assert_row_close(&scaled, &manual);
    }

    #[test]
    fn all_neg_inf_row_stays_neg_inf() {
        let mut row = vec![NEG_INF; 4];
        assert!(log_prob_row(&mut row, 1.0, 0, 1));
        assert!(row.iter().all(|&x| x == NEG_INF));
    }

    #[test]
    fn force_token_keeps_only_forced_entry() {
        let t = Tensor::new(&[[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0]], &Device::Cpu).unwrap();
        let out: Vec<Vec<f32>> = force_token(&t, 1).unwrap().to_vec2().unwrap();
        assert_eq!(out, vec![vec![NEG_INF, 2.0, NEG_INF], vec![NEG_INF, 5.0, NEG_INF]]);
    }

    #[test]
    fn force_token_rejects_out_of_range() {
        let t = Tensor::zeros((2, 3), DType::F32, &Device::Cpu).unwrap();
        assert!(force_token(&t, 3).unwrap_err().is_invalid_argument());
    }

    fn sample_logits() -> Tensor {
        let data: Vec<f32> = (0..16).map(|i| ((i as f32) * 0.37).sin()).collect();
        Tensor::from_vec(data, (2, 8), &Device::Cpu).unwrap()
    }

    #[test]
    fn below_min_len_blocks_eos() {
        let v = vocab();
        let t = sample_logits();
        let lprobs: Vec<Vec<f32>> = transform(10).apply(&t, 1, 20).unwrap().to_vec2().unwrap();
        let raw: Vec<Vec<f32>> = logits_to_log_probs(&t, 0.1, v.pad, v.bos)
            .unwrap()
            .to_vec2()
            .unwrap();

        for (row, raw_row) in lprobs.iter().zip(&raw) {
            assert_eq!(row[v.eos as usize], NEG_INF);
            assert_eq!(row[v.pad as usize], NEG_INF);
            assert_eq!(row[v.bos as usize], NEG_INF);
            assert_eq!(row[v.unk as usize], raw_row[v.unk as usize] - 0.5);
            assert!(row[5].is_finite());
        }
    }

    #[test]
    fn between_bounds_allows_eos() {
        let v = vocab();
        let lprobs: Vec<Vec<f32>> = transform(10)
            .apply(&sample_logits(), 15, 20)
            .unwrap()
            .to_vec2()
            .unwrap();
        for row in &lprobs {
            assert!(row[v.eos as usize].is_finite());
            assert!(row[5].is_finite());
            assert_eq!(row[v.pad as usize], NEG_INF);
        }
    }

    #[test]
    fn at_max_len_only_eos_survives() {
        let v = vocab();
        let lprobs: Vec<Vec<f32>> = transform(30)
            .apply(&sample_logits(), 20, 20)
            .unwrap()
            .to_vec2()
            .unwrap();
        for row in &lprobs {
            for (i, &x) in row.iter().enumerate() {
                if i == v.eos as usize {
                    assert!(x.is_finite());
                } else {
                    assert_eq!(x, NEG_INF);
                }
            }
        }
    }

    #[test]
    fn apply_rows_counts_poisoned_rows() {
        let v = vocab();
        let mut data: Vec<f32> = (0..24).map(|i| ((i as f32) * 0.37).sin()).collect();
        data[5] = f32::NAN;
        data[8 + 6] = f32::INFINITY;

        let poisoned = transform(1).apply_rows(&mut data, 2, 10);
        assert_eq!(poisoned, 2);
        assert!(data[..16].iter().all(|&x| x == NEG_INF));
        // the clean row keeps finite ordinary tokens
        assert!(data[16 + v.eos as usize].is_finite());
        assert!(data[16 + 4].is_finite());
    }

    #[test]
    fn vocab_width_is_checked() {
        let t = Tensor::zeros((2, 9), DType::F32, &Device::Cpu).unwrap();
        let err = transform(1).apply(&t, 1, 10).unwrap_err();
        assert!(matches!(err, SearchError::VocabMismatch { expected: 8, actual: 9 }));
    }
}
