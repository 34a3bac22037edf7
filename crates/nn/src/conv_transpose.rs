//! Weight-normalized transposed 1-D convolution (upsampling)

use candle_core::{Module, Tensor};
use candle_nn::{Init, VarBuilder};
use deepvoice_config::constants::{init as init_consts, weight_norm as wn_consts};
use deepvoice_config::ConvConfig;

use crate::weight_norm::WeightNorm;
use crate::{init, Layer, Result};

/// Weight layout is `(C_in, C_out, k)`; normalization runs along `C_in`.
#[derive(Debug, Clone)]
pub struct ConvTranspose1d {
    weight: WeightNorm,
    bias: Tensor,
    stride: usize,
    padding: usize,
    output_padding: usize,
    dilation: usize,
    training: bool,
}

impl ConvTranspose1d {
    pub fn new(weight: WeightNorm, bias: Tensor, config: &ConvConfig) -> Self {
        Self {
            weight,
            bias,
            stride: config.stride,
            padding: config.padding,
            output_padding: config.output_padding,
            dilation: config.dilation,
            training: true,
        }
    }

    pub fn weight(&self) -> &WeightNorm {
        &self.weight
    }

    pub fn bias(&self) -> &Tensor {
        &self.bias
    }

    pub fn in_channels(&self) -> usize {
        self.weight.weight_v().dims()[0]
    }

    pub fn out_channels(&self) -> usize {
        self.weight.weight_v().dims()[1]
    }

    pub fn kernel_size(&self) -> usize {
        self.weight.weight_v().dims()[2]
    }

    /// Output length for an input of length `t`
    ///
    /// `None` for an empty input, or when the padding trims away the whole
    /// output.
    pub fn output_len(&self, t: usize) -> Option<usize> {
        let full = t.checked_sub(1)? * self.stride
            + self.dilation * (self.kernel_size() - 1)
            + self.output_padding
            + 1;
        full.checked_sub(2 * self.padding).filter(|&len| len > 0)
    }
}

impl Module for ConvTranspose1d {
    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let weight = self.weight.weight()?;
        let y = x.conv_transpose1d(
            &weight,
            self.padding,
            self.output_padding,
            self.stride,
            self.dilation,
            1,
        )?;
        let bias = self.bias.reshape((1, self.out_channels(), 1))?;
        y.broadcast_add(&bias)
    }
}

impl Layer for ConvTranspose1d {
    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn is_training(&self) -> bool {
        self.training
    }
}

/// Weight-normalized ConvTranspose1d, `std_mul` defaulting to 1.0
pub fn conv_transpose1d(
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    config: &ConvConfig,
    vb: VarBuilder,
) -> Result<ConvTranspose1d> {
    config.validate()?;
    init::validate_dims(in_channels, out_channels, kernel_size)?;

    let std = init::conv_std(
        config.std_mul_or(init_consts::CONV_TRANSPOSE_STD_MUL),
        config.dropout,
        kernel_size,
        in_channels,
    );
    let weight = WeightNorm::new(
        (in_channels, out_channels, kernel_size),
        wn_consts::DEFAULT_DIM,
        std,
        &vb,
    )?;
    let bias = vb.get_with_hints(out_channels, "bias", Init::Const(0.0))?;

    tracing::debug!(
        in_channels,
        out_channels,
        kernel_size,
        stride = config.stride,
        std,
        "Created weight-normalized conv_transpose1d"
    );

    Ok(ConvTranspose1d::new(weight, bias, config))
}
