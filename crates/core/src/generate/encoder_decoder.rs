//! Adapter from a sequence-to-sequence model to a [`DecoderOracle`].
//!
//! The source is encoded once. The encoder output starts with one row per
//! batch element, is repeated per beam when the job starts scoring every
//! beam, and follows beam lineage through [`DecoderOracle::reorder_state`].

use candle_core::{Result, Tensor};

use super::DecoderOracle;
use crate::search::stretch_to_beams;

/// A model with separate encoder and decoder passes.
pub trait Seq2SeqModel {
    /// Encode `[batch, src_len]` source tokens. The result is indexed by
    /// batch along dim 0.
    fn encode(&self, src_tokens: &Tensor) -> Result<Tensor>;

    /// Score the next token for `[rows, len]` histories attending to the
    /// matching rows of `encoder_out`.
    ///
    /// Returns `[rows, vocab]` or `[rows, len, vocab]` logits; for the latter
    /// only the last position is used.
    fn decode(&self, histories: &Tensor, encoder_out: &Tensor) -> Result<Tensor>;
}

pub struct EncoderDecoderOracle<M> {
    model: M,
    /// Encoder output aligned with the rows of the next `decode_step`.
    encoder_out: Tensor,
}

impl<M: Seq2SeqModel> EncoderDecoderOracle<M> {
    pub fn new(model: M, src_tokens: &Tensor) -> Result<Self> {
        let encoder_out = model.encode(src_tokens)?;
        Ok(Self { model, encoder_out })
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn encoder_out(&self) -> &Tensor {
        &self.encoder_out
    }
}

impl<M: Seq2SeqModel> DecoderOracle for EncoderDecoderOracle<M> {
    fn decode_step(&mut self, histories: &Tensor) -> Result<Tensor> {
        let rows = histories.dim(0)?;
        let have = self.encoder_out.dim(0)?;
        if rows != have {
            if have == 0 || rows % have != 0 {
                candle_core::bail!("{rows} histories cannot be aligned with {have} encoder rows");
            }
            self.encoder_out = stretch_to_beams(&self.encoder_out, rows / have)
                .map_err(|e| candle_core::Error::Msg(e.to_string()))?;
        }

        let logits = self.model.decode(histories, &self.encoder_out)?;
        match logits.rank() {
            2 => Ok(logits),
            3 => {
                let len = logits.dim(1)?;
                logits.narrow(1, len - 1, 1)?.squeeze(1)
            }
            rank => candle_core::bail!("decoder returned rank {rank} logits"),
        }
    }

    fn reorder_state(&mut self, rows: &Tensor) -> Result<()> {
        self.encoder_out = self.encoder_out.index_select(rows, 0)?;
        Ok(())
    }
}
