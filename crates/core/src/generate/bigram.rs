use candle_core::{DType, Tensor};
use serde::Deserialize;

use super::DecoderOracle;
use crate::search::{Result, SearchError};

/// On-disk form of a bigram table.
#[derive(Debug, Deserialize)]
struct BigramTable {
    logits: Vec<Vec<f32>>,
}

/// Toy decoder whose next-token logits depend only on the last token.
///
/// Row `t` of the `vocab x vocab` table holds the logits that follow token
/// `t`.
#[derive(Debug, Clone)]
pub struct BigramOracle {
    vocab_size: usize,
    table: Vec<f32>,
}

impl BigramOracle {
    pub fn new(logits: Vec<Vec<f32>>) -> Result<Self> {
        let vocab_size = logits.len();
        if vocab_size == 0 {
            return Err(SearchError::InvalidArgument(
                "bigram table is empty".to_string(),
            ));
        }
        if let Some((i, row)) = logits.iter().enumerate().find(|(_, r)| r.len() != vocab_size) {
            return Err(SearchError::InvalidArgument(format!(
                "bigram row {i} has {} entries, expected {vocab_size}",
                row.len()
            )));
        }
        Ok(Self {
            vocab_size,
            table: logits.into_iter().flatten().collect(),
        })
    }

    /// Parse `{"logits": [[...], ...]}`.
    pub fn from_json(json: &str) -> Result<Self> {
        let table: BigramTable = serde_json::from_str(json)
            .map_err(|e| SearchError::InvalidArgument(format!("invalid bigram table: {e}")))?;
        Self::new(table.logits)
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    fn row(&self, token: usize) -> &[f32] {
        &self.table[token * self.vocab_size..(token + 1) * self.vocab_size]
    }
}

impl DecoderOracle for BigramOracle {
    fn decode_step(&mut self, histories: &Tensor) -> candle_core::Result<Tensor> {
        let (rows, len) = histories.dims2()?;
        if len == 0 {
            candle_core::bail!("bigram oracle needs at least one token of history");
        }
        let last: Vec<u32> = histories
            .narrow(1, len - 1, 1)?
            .squeeze(1)?
            .to_dtype(DType::U32)?
            .to_vec1()?;

        let mut data = Vec::with_capacity(rows * self.vocab_size);
        for token in last {
            let token = token as usize;
            if token >= self.vocab_size {
                candle_core::bail!(
                    "token {token} is outside the bigram table of size {}",
                    self.vocab_size
                );
            }
            data.extend_from_slice(self.row(token));
        }
        Tensor::from_vec(data, (rows, self.vocab_size), histories.device())
    }
}
