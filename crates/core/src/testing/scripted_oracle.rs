use candle_core::{Device, Tensor};

use crate::generate::DecoderOracle;

/// Logits row favouring `tokens` in the given order (10.0, 9.0, ...);
/// every other entry is 0.0.
pub fn one_hot_logits(vocab_size: usize, tokens: &[u32]) -> Vec<f32> {
    let mut row = vec![0.0; vocab_size];
    for (rank, &token) in tokens.iter().enumerate() {
        row[token as usize] = 10.0 - rank as f32;
    }
    row
}

/// A decoder oracle replaying a fixed script.
///
/// Call `i` returns `script[i]` for every history row. Histories and
/// reorder indices are recorded for inspection.
pub struct ScriptedOracle {
    vocab_size: usize,
    script: Vec<Vec<f32>>,
    repeat_last: bool,
    calls: Vec<Tensor>,
    reorders: Vec<Tensor>,
}

impl ScriptedOracle {
    pub fn new(vocab_size: usize, script: Vec<Vec<f32>>) -> Self {
        Self {
            vocab_size,
            script,
            repeat_last: false,
            calls: Vec::new(),
            reorders: Vec::new(),
        }
    }

    /// Return `row` on every call.
    pub fn repeating(vocab_size: usize, row: Vec<f32>) -> Self {
        Self {
            repeat_last: true,
            ..Self::new(vocab_size, vec![row])
        }
    }

    pub fn calls(&self) -> &[Tensor] {
        &self.calls
    }

    pub fn reorders(&self) -> &[Tensor] {
        &self.reorders
    }
}

impl DecoderOracle for ScriptedOracle {
    fn decode_step(&mut self, histories: &Tensor) -> candle_core::Result<Tensor> {
        let step = self.calls.len();
        let row = match self.script.get(step) {
            Some(row) => row,
            None if self.repeat_last && !self.script.is_empty() => &self.script[self.script.len() - 1],
            None => candle_core::bail!("script exhausted after {step} steps"),
        };
        let rows = histories.dim(0)?;
        let data: Vec<f32> = row.iter().copied().cycle().take(rows * self.vocab_size).collect();
        self.calls.push(histories.clone());
        Tensor::from_vec(data, (rows, self.vocab_size), &Device::Cpu)
    }

    fn reorder_state(&mut self, rows: &Tensor) -> candle_core::Result<()> {
        self.reorders.push(rows.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;

    #[test]
    fn scripted_oracle_broadcasts_rows() {
        let mut oracle = ScriptedOracle::new(4, vec![vec![1.0, 2.0, 3.0, 4.0]]);
        let histories = Tensor::zeros((3, 2), DType::U32, &Device::Cpu).unwrap();
        let logits: Vec<Vec<f32>> = oracle.decode_step(&histories).unwrap().to_vec2().unwrap();
        assert_eq!(logits, vec![vec![1.0, 2.0, 3.0, 4.0]; 3]);
        assert!(oracle.decode_step(&histories).is_err());
    }

    #[test]
    fn one_hot_orders_tokens() {
        assert_eq!(one_hot_logits(4, &[2, 0]), vec![9.0, 0.0, 10.0, 0.0]);
    }
}
