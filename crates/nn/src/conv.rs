//! Weight-normalized 1-D convolution with incremental decoding

use candle_core::{Module, Tensor};
use candle_nn::{Init, VarBuilder};
use deepvoice_config::constants::{init as init_consts, weight_norm as wn_consts};
use deepvoice_config::ConvConfig;

use crate::incremental::{linear_step, InputBuffer};
use crate::weight_norm::WeightNorm;
use crate::{init, Layer, NnError, Result};

/// Conv1d over `(B, C_in, T)` with a `(C_out, C_in, k)` weight
#[derive(Debug, Clone)]
pub struct Conv1d {
    weight: WeightNorm,
    bias: Tensor,
    stride: usize,
    padding: usize,
    dilation: usize,
    training: bool,
    buffer: InputBuffer,
}

impl Conv1d {
    pub fn new(weight: WeightNorm, bias: Tensor, config: &ConvConfig) -> Self {
        Self {
            weight,
            bias,
            stride: config.stride,
            padding: config.padding,
            dilation: config.dilation,
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

    pub fn out_channels(&self) -> usize {
        self.weight.weight_v().dims()[0]
    }

    pub fn in_channels(&self) -> usize {
        self.weight.weight_v().dims()[1]
    }

    pub fn kernel_size(&self) -> usize {
        self.weight.weight_v().dims()[2]
    }

    pub fn padding(&self) -> usize {
        self.padding
    }

    pub fn dilation(&self) -> usize {
        self.dilation
    }

    /// One decoding step
    ///
    /// `x` is channels-last `(B, T, C_in)`; only its last step is consumed.
    /// Returns `(B, 1, C_out)`, equal to the matching time step of a causal
    /// [`Module::forward`] over the full history.
    pub fn incremental_forward(&mut self, x: &Tensor) -> Result<Tensor> {
        if self.training {
            return Err(NnError::IncrementalInTraining { layer: "Conv1d" });
        }
        let taps = self
            .buffer
            .push(x, self.kernel_size(), self.dilation)?;
        linear_step(&taps, &self.linearized_weight()?, &self.bias)
    }

    /// Drop the buffered history before decoding an unrelated sequence
    pub fn clear_buffer(&mut self) {
        self.buffer.clear();
    }

    pub fn reorder_buffer(&mut self, new_order: &Tensor) -> Result<()> {
        self.buffer.reorder(new_order)
    }

    /// `(C_out, k * C_in)`, tap-major
    fn linearized_weight(&self) -> Result<Tensor> {
        let weight = self.weight.weight()?;
        let (out_channels, in_channels, kernel_size) = weight.dims3()?;
        Ok(weight
            .transpose(1, 2)?
            .contiguous()?
            .reshape((out_channels, kernel_size * in_channels))?)
    }
}

impl Module for Conv1d {
    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let weight = self.weight.weight()?;
        let y = x.conv1d(&weight, self.padding, self.stride, self.dilation, 1)?;
        let bias = self.bias.reshape((1, self.out_channels(), 1))?;
        y.broadcast_add(&bias)
    }
}

impl Layer for Conv1d {
    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn is_training(&self) -> bool {
        self.training
    }
}

/// Weight-normalized Conv1d, `std_mul` defaulting to 4.0
pub fn conv1d(
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    config: &ConvConfig,
    vb: VarBuilder,
) -> Result<Conv1d> {
    config.validate()?;
    init::validate_dims(in_channels, out_channels, kernel_size)?;

    let std = init::conv_std(
        config.std_mul_or(init_consts::CONV_STD_MUL),
        config.dropout,
        kernel_size,
        in_channels,
    );
    let weight = WeightNorm::new(
        (out_channels, in_channels, kernel_size),
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
        dilation = config.dilation,
        std,
        "Created weight-normalized conv1d"
    );

    Ok(Conv1d::new(weight, bias, config))
}
