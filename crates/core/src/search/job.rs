//! Per-batch beam-search state machine.
//!
//! A [`SearchJob`] owns the token and score history of every hypothesis in a
//! batch. Each [`SearchJob::update`] consumes one step of decoder logits,
//! selects the surviving beams and rebuilds the history by copying the rows
//! of the beams they descend from into a second buffer, which is then swapped
//! in. Positions past the decoded prefix are PAD with score 0.

use std::mem;

use candle_core::{DType, Device, Tensor};
use tracing::{debug, trace};

use super::error::{Result, SearchError};
use super::log_prob::{force_token_row, LogProbTransform};
use super::selector::choose_beams_flat;
use super::strategy::BeamSearchStrategy;
use crate::vocab::VocabularyInfo;

/// Hypotheses extracted from a job by [`SearchJob::finalize`].
#[derive(Debug, Clone)]
pub struct FinalResult {
    /// `[batch, k, len]` token ids, PAD past each hypothesis' end.
    pub tokens: Tensor,
    /// `[batch, k, len]` cumulative scores.
    pub scores: Tensor,
}

impl FinalResult {
    /// Collapse the batch and hypothesis dimensions: `[batch * k, len]`.
    pub fn flatten(&self) -> Result<(Tensor, Tensor)> {
        Ok((
            self.tokens.flatten_to(1)?,
            self.scores.flatten_to(1)?,
        ))
    }

    /// Cumulative score of every hypothesis at its last position, `[batch, k]`.
    pub fn final_scores(&self) -> Result<Tensor> {
        let len = self.scores.dim(2)?;
        Ok(self.scores.narrow(2, len - 1, 1)?.squeeze(2)?)
    }
}

#[derive(Debug)]
pub struct SearchJob {
    vocab: VocabularyInfo,
    transform: LogProbTransform,
    len_penalty: f32,
    normalize_scores: bool,
    batch_size: usize,
    beam_size: usize,
    /// Time capacity of every row: `max_len + n_prefix_tokens`.
    capacity: usize,
    n_prefix_tokens: usize,
    max_len: usize,
    step: usize,
    done: bool,
    /// Rows per batch element the oracle is expected to score: 1 until the
    /// first update, `beam_size` afterwards.
    current_beam_count: usize,
    /// `[batch, beam, capacity]`
    tokens: Vec<u32>,
    scores: Vec<f32>,
    next_tokens: Vec<u32>,
    next_scores: Vec<f32>,
    /// `[batch, beam]`
    finished: Vec<bool>,
    /// Oracle input row each current beam descends from; empty before the first update.
    reorder: Vec<u32>,
    device: Device,
}

impl SearchJob {
    pub(crate) fn new(
        strategy: &BeamSearchStrategy,
        prefixes: &[Vec<u32>],
        max_len: usize,
        device: Device,
    ) -> Self {
        let vocab = *strategy.vocab();
        let config = strategy.config();
        let batch_size = prefixes.len();
        let beam_size = config.beam_size;
        let n_prefix_tokens = prefixes[0].len();
        let capacity = max_len + n_prefix_tokens;

        let mut tokens = vec![vocab.pad; batch_size * beam_size * capacity];
        for (b, prefix) in prefixes.iter().enumerate() {
            for beam in 0..beam_size {
                let start = (b * beam_size + beam) * capacity;
                tokens[start..start + n_prefix_tokens].copy_from_slice(prefix);
            }
        }
        let scores = vec![0.0; tokens.len()];

        debug!(
            batch_size,
            beam_size, max_len, n_prefix_tokens, "created beam search job"
        );

        Self {
            vocab,
            transform: strategy.log_prob_transform(),
            len_penalty: config.len_penalty,
            normalize_scores: config.normalize_scores,
            batch_size,
            beam_size,
            capacity,
            n_prefix_tokens,
            max_len,
            step: 0,
            done: false,
            current_beam_count: 1,
            next_tokens: tokens.clone(),
            next_scores: scores.clone(),
            tokens,
            scores,
            finished: vec![false; batch_size * beam_size],
            reorder: Vec::new(),
            device,
        }
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn n_prefix_tokens(&self) -> usize {
        self.n_prefix_tokens
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn beam_size(&self) -> usize {
        self.beam_size
    }

    /// `batch_size * beam_size`.
    pub fn flat_size(&self) -> usize {
        self.batch_size * self.beam_size
    }

    pub fn current_beam_count(&self) -> usize {
        self.current_beam_count
    }

    /// Number of decoded positions, prefix included.
    fn history_len(&self) -> usize {
        self.n_prefix_tokens + self.step
    }

    fn row(&self, b: usize, beam: usize) -> usize {
        (b * self.beam_size + beam) * self.capacity
    }

    pub fn is_finished(&self, b: usize, beam: usize) -> bool {
        self.finished[b * self.beam_size + beam]
    }

    /// Full token buffer, `[batch, beam, max_len + n_prefix_tokens]` (`U32`).
    pub fn tokens(&self) -> Result<Tensor> {
        Ok(Tensor::from_vec(
            self.tokens.clone(),
            (self.batch_size, self.beam_size, self.capacity),
            &self.device,
        )?)
    }

    /// Full score buffer, same shape as [`SearchJob::tokens`] (`F32`).
    pub fn scores(&self) -> Result<Tensor> {
        Ok(Tensor::from_vec(
            self.scores.clone(),
            (self.batch_size, self.beam_size, self.capacity),
            &self.device,
        )?)
    }

    /// `[batch, beam]` mask, 1 for finished beams (`U8`).
    pub fn finished_mask(&self) -> Result<Tensor> {
        let mask: Vec<u8> = self.finished.iter().map(|&f| u8::from(f)).collect();
        Ok(Tensor::from_vec(
            mask,
            (self.batch_size, self.beam_size),
            &self.device,
        )?)
    }

    /// Token histories to hand to the decoder oracle:
    /// `[batch * current_beam_count, n_prefix_tokens + step]`, batch-major.
    pub fn histories(&self) -> Result<Tensor> {
        let len = self.history_len();
        let mut data = Vec::with_capacity(self.batch_size * self.current_beam_count * len);
        for b in 0..self.batch_size {
            for beam in 0..self.current_beam_count {
                let start = self.row(b, beam);
                data.extend_from_slice(&self.tokens[start..start + len]);
            }
        }
        Ok(Tensor::from_vec(
            data,
            (self.batch_size * self.current_beam_count, len),
            &self.device,
        )?)
    }

    /// For every current beam row, the oracle input row it descends from.
    ///
    /// `None` before the first update. Oracles keeping incremental state
    /// reorder it with these indices.
    pub fn beam_reorder_indices(&self) -> Result<Option<Tensor>> {
        if self.reorder.is_empty() {
            return Ok(None);
        }
        Ok(Some(Tensor::from_vec(
            self.reorder.clone(),
            self.reorder.len(),
            &self.device,
        )?))
    }

    /// Masked log-probabilities the job would use for `logits` at `step`.
    pub fn log_prob(&self, logits: &Tensor, step: usize, max_len: usize) -> Result<Tensor> {
        self.transform.apply(logits, step, max_len)
    }

    /// Number of input beams per batch element carried by `rows` logits rows.
    fn input_beams(&self, rows: usize) -> Result<usize> {
        if rows == self.batch_size * self.current_beam_count {
            return Ok(self.current_beam_count);
        }
        // identical prefixes: the oracle may score every beam on the first step
        if self.step == 0 && rows == self.flat_size() {
            return Ok(self.beam_size);
        }
        Err(SearchError::BeamCountMismatch {
            expected: self.current_beam_count,
            actual: rows / self.batch_size,
            rows,
            batch_size: self.batch_size,
        })
    }

    /// Advance one step with `[batch * current_beam_count, vocab]` logits.
    pub fn update(&mut self, step_logits: &Tensor) -> Result<()> {
        self.update_forced(step_logits, &[])
    }

    /// Like [`SearchJob::update`], restricting batch element `b` to the token
    /// `forced[b]` when it is `Some`. An empty slice forces nothing.
    pub fn update_forced(&mut self, step_logits: &Tensor, forced: &[Option<u32>]) -> Result<()> {
        if self.done {
            return Err(SearchError::JobFinished { step: self.step });
        }
        if !forced.is_empty() && forced.len() != self.batch_size {
            return Err(SearchError::InvalidArgument(format!(
                "{} forced tokens for a batch of {}",
                forced.len(),
                self.batch_size
            )));
        }
        if let Some(token) = forced.iter().flatten().find(|&&t| t as usize >= self.vocab.size) {
            return Err(SearchError::InvalidArgument(format!(
                "forced token {token} is outside the vocabulary of size {}",
                self.vocab.size
            )));
        }
        // PAD and BOS are masked to -inf on every step and can never be selected
        if let Some(token) = forced
            .iter()
            .flatten()
            .find(|&&t| t == self.vocab.pad || t == self.vocab.bos)
        {
            return Err(SearchError::InvalidArgument(format!(
                "forced token {token} is PAD or BOS"
            )));
        }

        let (rows, vocab) = step_logits.dims2()?;
        if vocab != self.vocab.size {
            return Err(SearchError::VocabMismatch {
                expected: self.vocab.size,
                actual: vocab,
            });
        }
        let row_stride = self.input_beams(rows)?;
        let input_beams = self.current_beam_count;

        let logits = step_logits
            .to_dtype(DType::F32)?
            .flatten_all()?
            .to_vec1::<f32>()?;
        let mut lprobs = if row_stride == input_beams {
            logits
        } else {
            // first step scored with every beam: keep one row per batch element
            logits
                .chunks(row_stride * vocab)
                .flat_map(|rows| rows[..vocab].iter().copied())
                .collect()
        };

        self.transform
            .apply_rows(&mut lprobs, self.step + 1, self.max_len);

        let last = self.history_len() - 1;
        for b in 0..self.batch_size {
            for beam in 0..input_beams {
                let offset = (b * input_beams + beam) * vocab;
                let row = &mut lprobs[offset..offset + vocab];

                if self.is_finished(b, beam) {
                    row.fill(f32::NEG_INFINITY);
                    row[self.vocab.pad as usize] = 0.0;
                } else if let Some(Some(token)) = forced.get(b) {
                    force_token_row(row, *token);
                }

                let running = self.scores[self.row(b, beam) + last];
                for x in row.iter_mut() {
                    *x += running;
                }
            }
        }

        let selection = choose_beams_flat(
            &lprobs,
            self.batch_size,
            input_beams,
            vocab,
            self.beam_size,
        );

        let pos = self.history_len();
        let mut finished = vec![false; self.finished.len()];
        let mut reorder = Vec::with_capacity(self.flat_size());

        for b in 0..self.batch_size {
            for beam in 0..self.beam_size {
                let source = selection.beams[b][beam];
                let src = self.row(b, source);
                let dst = self.row(b, beam);

                self.next_tokens[dst..dst + self.capacity]
                    .copy_from_slice(&self.tokens[src..src + self.capacity]);
                self.next_scores[dst..dst + self.capacity]
                    .copy_from_slice(&self.scores[src..src + self.capacity]);

                let slot = b * self.beam_size + beam;
                if self.is_finished(b, source) {
                    self.next_tokens[dst + pos] = self.vocab.pad;
                    self.next_scores[dst + pos] = self.scores[src + pos - 1];
                    finished[slot] = true;
                } else {
                    let token = selection.tokens[b][beam];
                    self.next_tokens[dst + pos] = token;
                    self.next_scores[dst + pos] = selection.scores[b][beam];
                    finished[slot] = token == self.vocab.eos;
                }

                reorder.push((b * row_stride + source) as u32);
            }
            trace!(batch = b, tokens = ?selection.tokens[b], beams = ?selection.beams[b], "selected beams");
        }

        mem::swap(&mut self.tokens, &mut self.next_tokens);
        mem::swap(&mut self.scores, &mut self.next_scores);
        self.finished = finished;
        self.reorder = reorder;
        self.current_beam_count = self.beam_size;
        self.step += 1;
        self.done = self.step >= self.max_len || self.finished.iter().all(|&f| f);

        debug!(
            step = self.step,
            finished = self.finished.iter().filter(|&&f| f).count(),
            done = self.done,
            "beam search step"
        );
        Ok(())
    }

    /// Ranking key of a beam: its last cumulative score, length-normalised
    /// when configured.
    fn rank_score(&self, b: usize, beam: usize) -> f32 {
        let start = self.row(b, beam);
        let len = self.history_len();
        let score = self.scores[start + len - 1];
        if !self.normalize_scores {
            return score;
        }
        let generated = self.tokens[start + self.n_prefix_tokens..start + len]
            .iter()
            .filter(|&&t| t != self.vocab.pad)
            .count()
            .max(1);
        score / (generated as f32).powf(self.len_penalty)
    }

    /// Extract hypotheses, truncated to the decoded length.
    ///
    /// Without `top`, every beam is returned in slot order. With `top = k`,
    /// the `k` best beams of each batch element are returned best first,
    /// ties broken by lower beam index.
    pub fn finalize(&self, top: Option<usize>) -> Result<FinalResult> {
        let k = match top {
            None => self.beam_size,
            Some(k) if (1..=self.beam_size).contains(&k) => k,
            Some(k) => {
                return Err(SearchError::InvalidArgument(format!(
                    "top must be in 1..={}, got {k}",
                    self.beam_size
                )))
            }
        };

        let len = self.history_len();
        let mut tokens = Vec::with_capacity(self.batch_size * k * len);
        let mut scores = Vec::with_capacity(self.batch_size * k * len);

        for b in 0..self.batch_size {
            let mut order: Vec<usize> = (0..self.beam_size).collect();
            if top.is_some() {
                let keys: Vec<f32> = order.iter().map(|&beam| self.rank_score(b, beam)).collect();
                // stable: equal keys keep ascending beam order
                order.sort_by(|&x, &y| keys[y].total_cmp(&keys[x]));
                order.truncate(k);
            }
            for beam in order {
                let start = self.row(b, beam);
                tokens.extend_from_slice(&self.tokens[start..start + len]);
                scores.extend_from_slice(&self.scores[start..start + len]);
            }
        }

        Ok(FinalResult {
            tokens: Tensor::from_vec(tokens, (self.batch_size, k, len), &self.device)?,
            scores: Tensor::from_vec(scores, (self.batch_size, k, len), &self.device)?,
        })
    }
}
