//! Time-batch-channel convolution
//!
//! Input and output are `(T, B, C)`. The weight is stored `(k, C_in, C_out)`
//! and weight-normalized along the output-channel axis (2). Only stride 1
//! and dilation 1 are supported.

use candle_core::{Module, Tensor};
use candle_nn::{Init, VarBuilder};
use deepvoice_config::constants::{init as init_consts, weight_norm as wn_consts};
use deepvoice_config::{ConfigError, ConvConfig};

use crate::weight_norm::WeightNorm;
use crate::{init, Layer, NnError, Result};

#[derive(Debug, Clone)]
pub struct ConvTbc {
    weight: WeightNorm,
    bias: Tensor,
    padding: usize,
    training: bool,
}

impl ConvTbc {
    pub fn new(weight: WeightNorm, bias: Tensor, padding: usize) -> Self {
        Self {
            weight,
            bias,
            padding,
            training: true,
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
}

/// Convolve a `(T, B, C_in)` input with a `(k, C_in, C_out)` weight
pub(crate) fn conv_tbc_forward(
    x: &Tensor,
    weight: &Tensor,
    bias: &Tensor,
    padding: usize,
) -> candle_core::Result<Tensor> {
    let kernel = weight.permute((2, 1, 0))?.contiguous()?;
    let y = x
        .permute((1, 2, 0))?
        .contiguous()?
        .conv1d(&kernel, padding, 1, 1, 1)?;
    let out_channels = bias.dim(0)?;
    y.broadcast_add(&bias.reshape((1, out_channels, 1))?)?
        .permute((2, 0, 1))?
        .contiguous()
}

impl Module for ConvTbc {
    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        conv_tbc_forward(x, &self.weight.weight()?, &self.bias, self.padding)
    }
}

impl Layer for ConvTbc {
    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn is_training(&self) -> bool {
        self.training
    }
}

/// Reject options a TBC-layout convolution cannot honor
pub(crate) fn check_tbc_options(layer: &'static str, config: &ConvConfig) -> Result<()> {
    if config.dilation != 1 {
        return Err(NnError::InvalidDilation {
            layer,
            dilation: config.dilation,
        });
    }
    config.validate()?;
    if config.stride != 1 {
        return Err(ConfigError::invalid("stride", format!("{} only supports stride 1", layer)).into());
    }
    Ok(())
}

/// Weight-normalized ConvTBC, `std_mul` defaulting to 4.0
pub fn conv_tbc(
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    config: &ConvConfig,
    vb: VarBuilder,
) -> Result<ConvTbc> {
    check_tbc_options("ConvTBC", config)?;
    init::validate_dims(in_channels, out_channels, kernel_size)?;

    let std = init::conv_std(
        config.std_mul_or(init_consts::CONV_STD_MUL),
        config.dropout,
        kernel_size,
        in_channels,
    );
    let weight = WeightNorm::new(
        (kernel_size, in_channels, out_channels),
        wn_consts::TBC_DIM,
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
        "Created weight-normalized conv_tbc"
    );

    Ok(ConvTbc::new(weight, bias, config.padding))
}
