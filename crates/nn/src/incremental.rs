//! Step-by-step convolution support
//!
//! Autoregressive decoding feeds one frame at a time. Instead of re-running
//! the convolution over the whole prefix, the layer keeps the last
//! receptive-field worth of inputs in an [`InputBuffer`] and applies the
//! kernel as a single matrix product over that window.
//!
//! The buffer belongs to exactly one decoding stream. Call
//! [`InputBuffer::clear`] before starting an unrelated sequence.

use candle_core::{Module, Tensor};

use crate::{NnError, Result};

#[derive(Debug, Clone, Default)]
pub struct InputBuffer {
    /// `(B, span, C)`, oldest frame first
    window: Option<Tensor>,
}

impl InputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_none()
    }

    /// Batch size of the buffered stream
    pub fn batch_size(&self) -> Option<usize> {
        self.window.as_ref().and_then(|w| w.dim(0).ok())
    }

    /// Push the last frame of `x` (`(B, T, C)`) and return the kernel taps
    ///
    /// The window covers `k + (k - 1)(d - 1)` frames; every `d`-th frame is
    /// returned, giving `(B, k, C)`. The first call starts from zeros.
    pub fn push(&mut self, x: &Tensor, kernel_size: usize, dilation: usize) -> Result<Tensor> {
        let (batch, time, channels) = x.dims3()?;
        let frame = x.narrow(1, time.saturating_sub(1), 1)?;
        if kernel_size <= 1 {
            return Ok(frame);
        }
        let frame = frame.detach();

        let span = kernel_size + (kernel_size - 1) * (dilation - 1);
        let window = match &self.window {
            None => {
                tracing::trace!(batch, span, channels, "Creating incremental input buffer");
                let history =
                    Tensor::zeros((batch, span - 1, channels), frame.dtype(), frame.device())?;
                Tensor::cat(&[&history, &frame], 1)?
            }
            Some(previous) => {
                let expected = previous.dim(0)?;
                if expected != batch {
                    return Err(NnError::BufferBatchMismatch {
                        expected,
                        actual: batch,
                    });
                }
                Tensor::cat(&[&previous.narrow(1, 1, span - 1)?, &frame], 1)?
            }
        };
        self.window = Some(window.clone());

        if dilation > 1 {
            let taps: Vec<u32> = (0..kernel_size).map(|j| (j * dilation) as u32).collect();
            let taps = Tensor::from_vec(taps, kernel_size, x.device())?;
            return Ok(window.contiguous()?.index_select(&taps, 1)?);
        }
        Ok(window)
    }

    /// Reorder buffered batch rows, e.g. after beam search pruning
    pub fn reorder(&mut self, new_order: &Tensor) -> Result<()> {
        if let Some(window) = &self.window {
            self.window = Some(window.index_select(new_order, 0)?);
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        if self.window.take().is_some() {
            tracing::trace!("Cleared incremental input buffer");
        }
    }
}

/// Apply a linearized kernel to a tap window
///
/// `taps` is `(B, k, C_in)`, `weight` is `(C_out, k * C_in)` with the same
/// tap-major ordering. Returns `(B, 1, C_out)`.
pub(crate) fn linear_step(taps: &Tensor, weight: &Tensor, bias: &Tensor) -> Result<Tensor> {
    let (batch, kernel_size, channels) = taps.dims3()?;
    let flat = taps
        .contiguous()?
        .reshape((batch, kernel_size * channels))?;
    let linear = candle_nn::Linear::new(weight.clone(), Some(bias.clone()));
    Ok(linear.forward(&flat)?.unsqueeze(1)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn frame(value: f32, device: &Device) -> Tensor {
        Tensor::full(value, (1, 1, 2), device).unwrap()
    }

    fn first_channel(taps: &Tensor) -> Vec<f32> {
        taps.narrow(2, 0, 1)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap()
    }

    #[test]
    fn test_window_slides() {
        let device = Device::Cpu;
        let mut buffer = InputBuffer::new();
        assert!(buffer.is_empty());

        assert_eq!(first_channel(&buffer.push(&frame(1.0, &device), 3, 1).unwrap()), vec![0.0, 0.0, 1.0]);
        assert_eq!(first_channel(&buffer.push(&frame(2.0, &device), 3, 1).unwrap()), vec![0.0, 1.0, 2.0]);
        assert_eq!(first_channel(&buffer.push(&frame(3.0, &device), 3, 1).unwrap()), vec![1.0, 2.0, 3.0]);
        assert_eq!(first_channel(&buffer.push(&frame(4.0, &device), 3, 1).unwrap()), vec![2.0, 3.0, 4.0]);
        assert_eq!(buffer.batch_size(), Some(1));
    }

    #[test]
    fn test_dilated_taps() {
        let device = Device::Cpu;
        let mut buffer = InputBuffer::new();
        for step in 1..=4 {
            buffer.push(&frame(step as f32, &device), 2, 3).unwrap();
        }
        let taps = buffer.push(&frame(5.0, &device), 2, 3).unwrap();
        // span 4: frames 2..=5, taps at 0 and 3
        assert_eq!(first_channel(&taps), vec![2.0, 5.0]);
    }

    #[test]
    fn test_clear_restarts_from_zeros() {
        let device = Device::Cpu;
        let mut buffer = InputBuffer::new();
        buffer.push(&frame(7.0, &device), 2, 1).unwrap();
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(first_channel(&buffer.push(&frame(1.0, &device), 2, 1).unwrap()), vec![0.0, 1.0]);
    }

    #[test]
    fn test_batch_change_rejected() {
        let device = Device::Cpu;
        let mut buffer = InputBuffer::new();
        buffer.push(&frame(1.0, &device), 2, 1).unwrap();
        let wider = Tensor::ones((3, 1, 2), DType::F32, &device).unwrap();
        assert!(matches!(
            buffer.push(&wider, 2, 1),
            Err(NnError::BufferBatchMismatch { expected: 1, actual: 3 })
        ));
    }

    #[test]
    fn test_reorder() {
        let device = Device::Cpu;
        let mut buffer = InputBuffer::new();
        let x = Tensor::new(&[[[1f32]], [[2f32]]], &device).unwrap();
        buffer.push(&x, 2, 1).unwrap();
        buffer
            .reorder(&Tensor::new(&[1u32, 1], &device).unwrap())
            .unwrap();

        let y = Tensor::new(&[[[5f32]], [[6f32]]], &device).unwrap();
        let taps = buffer.push(&y, 2, 1).unwrap();
        let values: Vec<f32> = taps.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(values, vec![2.0, 5.0, 2.0, 6.0]);
    }

    #[test]
    fn test_linear_step_shape() {
        let device = Device::Cpu;
        let taps = Tensor::ones((2, 3, 4), DType::F32, &device).unwrap();
        let weight = Tensor::ones((5, 12), DType::F32, &device).unwrap();
        let bias = Tensor::zeros(5, DType::F32, &device).unwrap();
        let out = linear_step(&taps, &weight, &bias).unwrap();
        assert_eq!(out.dims(), &[2, 1, 5]);
        let values: Vec<f32> = out.flatten_all().unwrap().to_vec1().unwrap();
        assert!(values.iter().all(|v| (*v - 12.0).abs() < 1e-6));
    }
}
