//! TBC convolution optimized for step-by-step decoding
//!
//! Training runs the full convolution on `(T, B, C)` input and the caller
//! drops the padded future steps with [`LinearizedConv1d::remove_future_timesteps`].
//! Decoding feeds `(B, T, C)` frames to [`LinearizedConv1d::incremental_forward`],
//! which applies the kernel as one matrix product over a buffered window.

use candle_core::{Module, Tensor};
use candle_nn::{Init, VarBuilder};
use deepvoice_config::constants::{init as init_consts, weight_norm as wn_consts};
use deepvoice_config::ConvConfig;

use crate::conv_tbc::{check_tbc_options, conv_tbc_forward};
use crate::incremental::{linear_step, InputBuffer};
use crate::weight_norm::WeightNorm;
use crate::{init, Layer, NnError, Result};

#[derive(Debug, Clone)]
pub struct LinearizedConv1d {
    /// `(k, C_in, C_out)`, normalized along axis 0
    weight: WeightNorm,
    bias: Tensor,
    padding: usize,
    training: bool,
    buffer: InputBuffer,
}

impl LinearizedConv1d {
    pub fn new(weight: WeightNorm, bias: Tensor, padding: usize) -> Self {
        Self {
            weight,
            bias,
            padding,
            training: true,
            buffer: InputBuffer::new(),
        }
    }

    pub fn weight(&self) -> &WeightNorm {
        &self.weight
    }

    pub fn bias(&self) -> &Tensor {
        &self.bias
    }

    pub fn kernel_size(&self) -> usize {
        self.weight.weight_v().dims()[0]
    }

    pub fn in_channels(&self) -> usize {
        self.weight.weight_v().dims()[1]
    }

    pub fn out_channels(&self) -> usize {
        self.weight.weight_v().dims()[2]
    }

    pub fn padding(&self) -> usize {
        self.padding
    }

    /// Drop the trailing `padding` steps of a `(T, B, C)` output
    pub fn remove_future_timesteps(&self, x: &Tensor) -> Result<Tensor> {
        if self.kernel_size() > 1 && self.padding > 0 {
            let time = x.dim(0)?;
            return Ok(x.narrow(0, 0, time.saturating_sub(self.padding))?);
        }
        Ok(x.clone())
    }

    /// One decoding step over channels-last `(B, T, C_in)`, returning `(B, 1, C_out)`
    pub fn incremental_forward(&mut self, x: &Tensor) -> Result<Tensor> {
        if self.training {
            return Err(NnError::IncrementalInTraining {
                layer: "LinearizedConv1d",
            });
        }
        let taps = self.buffer.push(x, self.kernel_size(), 1)?;
        linear_step(&taps, &self.linearized_weight()?, &self.bias)
    }

    pub fn clear_buffer(&mut self) {
        self.buffer.clear();
    }

    pub fn reorder_buffer(&mut self, new_order: &Tensor) -> Result<()> {
        self.buffer.reorder(new_order)
    }

    fn linearized_weight(&self) -> Result<Tensor> {
        let weight = self.weight.weight()?;
        let (kernel_size, in_channels, out_channels) = weight.dims3()?;
        Ok(weight
            .permute((2, 0, 1))?
            .contiguous()?
            .reshape((out_channels, kernel_size * in_channels))?)
    }
}

impl Module for LinearizedConv1d {
    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        conv_tbc_forward(x, &self.weight.weight()?, &self.bias, self.padding)
    }
}

impl Layer for LinearizedConv1d {
    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn is_training(&self) -> bool {
        self.training
    }
}

/// Weight-normalized linearized convolution, `std_mul` defaulting to 4.0
pub fn linearized_conv1d(
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    config: &ConvConfig,
    vb: VarBuilder,
) -> Result<LinearizedConv1d> {
    check_tbc_options("LinearizedConv1d", config)?;
    init::validate_dims(in_channels, out_channels, kernel_size)?;

    let std = init::conv_std(
        config.std_mul_or(init_consts::CONV_STD_MUL),
        config.dropout,
        kernel_size,
        in_channels,
    );
    let weight = WeightNorm::new(
        (kernel_size, in_channels, out_channels),
        wn_consts::DEFAULT_DIM,
        std,
        &vb,
    )?;
    let bias = vb.get_with_hints(out_channels, "bias", Init::Const(0.0))?;

    tracing::debug!(
        in_channels,
        out_channels,
        kernel_size,
        padding = config.padding,
        std,
        "Created weight-normalized linearized conv1d"
    );

    Ok(LinearizedConv1d::new(weight, bias, config.padding))
}
