//! Padding masks for variable-length batches

use candle_core::{DType, Tensor};

use crate::{NnError, Result};

/// Padding mask from per-example lengths
///
/// `memory` is `(batch, max_time, ...)`. Returns a `u8` tensor of shape
/// `(batch, max_time)` holding `1` where `t >= lengths[b]` (padding) and `0`
/// for valid steps.
pub fn get_mask_from_lengths(memory: &Tensor, lengths: &[usize]) -> Result<Tensor> {
    let batch = memory.dim(0)?;
    let max_time = memory.dim(1)?;
    if lengths.len() != batch {
        return Err(NnError::LengthMismatch {
            batch,
            lengths: lengths.len(),
        });
    }

    let device = memory.device();
    let steps = Tensor::arange(0u32, max_time as u32, device)?.unsqueeze(0)?;
    let limits: Vec<u32> = lengths
        .iter()
        .map(|&len| len.min(max_time) as u32)
        .collect();
    let limits = Tensor::from_vec(limits, (batch, 1), device)?;

    Ok(steps.broadcast_ge(&limits)?.to_dtype(DType::U8)?)
}
