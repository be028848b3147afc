//! Exact top-k selection over the beam x vocabulary cross product.

use std::cmp::Ordering;

use candle_core::{DType, Tensor};

use super::error::{Result, SearchError};

/// Winners of one selection round, indexed `[batch][beam]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionResult {
    /// Joint (cumulative) score of each winner.
    pub scores: Vec<Vec<f32>>,
    /// Token appended by each winner.
    pub tokens: Vec<Vec<u32>>,
    /// Input beam each winner descends from.
    pub beams: Vec<Vec<usize>>,
}

/// Descending by value, ascending by flat index on ties.
fn rank(values: &[f32], a: usize, b: usize) -> Ordering {
    values[b].total_cmp(&values[a]).then(a.cmp(&b))
}

/// Indices of the `k` best entries of `values`, best first.
pub(crate) fn top_k_indices(values: &[f32], k: usize) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..values.len()).collect();
    let k = k.min(indices.len());
    if k == 0 {
        return Vec::new();
    }
    if k < indices.len() {
        indices.select_nth_unstable_by(k - 1, |&a, &b| rank(values, a, b));
        indices.truncate(k);
    }
    indices.sort_unstable_by(|&a, &b| rank(values, a, b));
    indices
}

/// Select `beam_size` winners per batch element from row-major
/// `[batch, input_beams, vocab]` candidate scores.
pub(crate) fn choose_beams_flat(
    candidates: &[f32],
    batch_size: usize,
    input_beams: usize,
    vocab: usize,
    beam_size: usize,
) -> SelectionResult {
    let width = input_beams * vocab;
    let mut result = SelectionResult {
        scores: Vec::with_capacity(batch_size),
        tokens: Vec::with_capacity(batch_size),
        beams: Vec::with_capacity(batch_size),
    };

    for b in 0..batch_size {
        let row = &candidates[b * width..(b + 1) * width];
        let winners = top_k_indices(row, beam_size);
        result.scores.push(winners.iter().map(|&i| row[i]).collect());
        result
            .tokens
            .push(winners.iter().map(|&i| (i % vocab) as u32).collect());
        result.beams.push(winners.iter().map(|&i| i / vocab).collect());
    }
    result
}

/// Pick the top `beam_size` continuations per batch element.
///
/// `candidates` is `[batch, input_beams, vocab]`. The last two dimensions are
/// flattened, the best `beam_size` entries taken (ties go to the lower flat
/// index) and each winner decoded back into `(beam = i / vocab, token = i % vocab)`.
pub fn choose_beams(candidates: &Tensor, beam_size: usize) -> Result<SelectionResult> {
    let (batch_size, input_beams, vocab) = candidates.dims3()?;
    if beam_size == 0 || beam_size > input_beams * vocab {
        return Err(SearchError::InvalidArgument(format!(
            "cannot select {beam_size} beams from {} candidates",
            input_beams * vocab
        )));
    }
    let data = candidates
        .to_dtype(DType::F32)?
        .flatten_all()?
        .to_vec1::<f32>()?;
    Ok(choose_beams_flat(
        &data,
        batch_size,
        input_beams,
        vocab,
        beam_size,
    ))
}
