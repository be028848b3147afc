//! Beam-search configuration and job construction.

use candle_core::{DType, Tensor};
use serde::{Deserialize, Serialize};

use super::error::{Result, SearchError};
use super::job::SearchJob;
use super::log_prob::LogProbTransform;
use crate::vocab::VocabularyInfo;

/// Configuration for beam-search decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeamSearchConfig {
    /// Number of hypotheses kept per batch element.
    pub beam_size: usize,
    /// Minimum generated length (EOS included) before EOS may be selected.
    pub min_len: usize,
    /// Hard ceiling on generated length.
    pub max_len: usize,
    /// Exponent of the length normalisation applied when ranking results.
    pub len_penalty: f32,
    /// Subtracted from the UNK log-probability at every step.
    pub unk_penalty: f32,
    /// Logit divisor before log-softmax. 0.0 = use logits unscaled.
    pub temperature: f32,
    /// Rank final hypotheses by `score / len^len_penalty` instead of raw score.
    pub normalize_scores: bool,
    /// Per-job ceiling is `max_len_ratio * src_len + max_len_floor`, capped by `max_len`.
    pub max_len_ratio: usize,
    pub max_len_floor: usize,
}

impl Default for BeamSearchConfig {
    fn default() -> Self {
        Self {
            beam_size: 2,
            min_len: 10,
            max_len: 256,
            len_penalty: 1.0,
            unk_penalty: 0.0,
            temperature: 0.1,
            normalize_scores: true,
            max_len_ratio: 2,
            max_len_floor: 10,
        }
    }
}

impl BeamSearchConfig {
    fn validate(&self, vocab: &VocabularyInfo) -> Result<()> {
        if self.beam_size == 0 {
            return Err(SearchError::InvalidArgument(
                "beam_size must be positive".to_string(),
            ));
        }
        if self.beam_size > vocab.size {
            return Err(SearchError::InvalidArgument(format!(
                "beam_size {} exceeds vocabulary size {}",
                self.beam_size, vocab.size
            )));
        }
        if self.max_len == 0 {
            return Err(SearchError::InvalidArgument(
                "max_len must be positive".to_string(),
            ));
        }
        if self.min_len > self.max_len {
            return Err(SearchError::InvalidArgument(format!(
                "min_len {} is greater than max_len {}",
                self.min_len, self.max_len
            )));
        }
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(SearchError::InvalidArgument(format!(
                "temperature must be finite and >= 0, got {}",
                self.temperature
            )));
        }
        if !self.len_penalty.is_finite() || !self.unk_penalty.is_finite() {
            return Err(SearchError::InvalidArgument(
                "len_penalty and unk_penalty must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

/// Factory for [`SearchJob`]s sharing one validated configuration.
#[derive(Debug, Clone)]
pub struct BeamSearchStrategy {
    vocab: VocabularyInfo,
    config: BeamSearchConfig,
}

impl BeamSearchStrategy {
    pub fn new(vocab: VocabularyInfo, config: BeamSearchConfig) -> Result<Self> {
        vocab.validate()?;
        config.validate(&vocab)?;
        Ok(Self { vocab, config })
    }

    pub fn vocab(&self) -> &VocabularyInfo {
        &self.vocab
    }

    pub fn config(&self) -> &BeamSearchConfig {
        &self.config
    }

    pub(crate) fn log_prob_transform(&self) -> LogProbTransform {
        LogProbTransform {
            vocab: self.vocab,
            temperature: self.config.temperature,
            unk_penalty: self.config.unk_penalty,
            min_len: self.config.min_len,
        }
    }

    /// Generation ceiling for a source of length `src_len`.
    pub fn job_max_len(&self, src_len: usize) -> usize {
        let by_source = self
            .config
            .max_len_ratio
            .saturating_mul(src_len)
            .saturating_add(self.config.max_len_floor);
        self.config.max_len.min(by_source)
    }

    /// Create a job for `src_tokens` (`[batch, src_len]`).
    ///
    /// `prefix_tokens` may be omitted (every hypothesis starts with BOS), 1-D
    /// (one prefix shared by the whole batch) or 2-D `[batch, prefix_len]`.
    /// The prefix is taken literally; BOS is not prepended to it.
    pub fn new_search_job(
        &self,
        src_tokens: &Tensor,
        prefix_tokens: Option<&Tensor>,
    ) -> Result<SearchJob> {
        let (batch_size, src_len) = src_tokens.dims2().map_err(|_| {
            SearchError::InvalidArgument(format!(
                "src_tokens must be [batch, src_len], got shape {:?}",
                src_tokens.dims()
            ))
        })?;
        if batch_size == 0 || src_len == 0 {
            return Err(SearchError::InvalidArgument(format!(
                "src_tokens must be non-empty, got shape {:?}",
                src_tokens.dims()
            )));
        }

        let prefixes = match prefix_tokens {
            None => vec![vec![self.vocab.bos]; batch_size],
            Some(prefix) => Self::expand_prefix(prefix, batch_size)?,
        };
        let n_prefix_tokens = prefixes[0].len();

        let max_len = self.job_max_len(src_len);
        if n_prefix_tokens >= max_len {
            return Err(SearchError::InvalidArgument(format!(
                "prefix length {n_prefix_tokens} must be less than max_len {max_len}"
            )));
        }

        Ok(SearchJob::new(
            self,
            &prefixes,
            max_len,
            src_tokens.device().clone(),
        ))
    }

    fn expand_prefix(prefix: &Tensor, batch_size: usize) -> Result<Vec<Vec<u32>>> {
        let prefix = prefix.to_dtype(DType::U32)?;
        let rows = match prefix.rank() {
            1 => vec![prefix.to_vec1::<u32>()?; batch_size],
            2 => {
                let rows = prefix.to_vec2::<u32>()?;
                if rows.len() != batch_size {
                    return Err(SearchError::InvalidArgument(format!(
                        "prefix_tokens has {} rows for a batch of {batch_size}",
                        rows.len()
                    )));
                }
                rows
            }
            rank => {
                return Err(SearchError::InvalidArgument(format!(
                    "prefix_tokens must be 1-D or 2-D, got rank {rank}"
                )))
            }
        };
        if rows[0].is_empty() {
            return Err(SearchError::InvalidArgument(
                "prefix_tokens must hold at least one token".to_string(),
            ));
        }
        Ok(rows)
    }
}

/// Repeat every row of `t` along dim 0 `beam_size` times, consecutively.
///
/// `[a, b]` becomes `[a, a, b, b]` for `beam_size == 2`, matching the
/// batch-major, beam-minor row order of a search job.
pub fn stretch_to_beams(t: &Tensor, beam_size: usize) -> Result<Tensor> {
    let dims = t.dims().to_vec();
    let Some(&rows) = dims.first() else {
        return Err(SearchError::InvalidArgument(
            "cannot stretch a scalar tensor".to_string(),
        ));
    };

    let mut expanded = dims.clone();
    expanded.insert(1, beam_size);
    let mut flat = dims;
    flat[0] = rows * beam_size;

    Ok(t
        .unsqueeze(1)?
        .broadcast_as(expanded)?
        .contiguous()?
        .reshape(flat)?)
}
