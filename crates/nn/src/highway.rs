//! Highway convolution block
//!
//! A weight-normalized [`Conv1d`] producing `2 * C` channels, split into a
//! content half `a` and a gate half `b`, combined with the block input:
//!
//! - GLU mode: `(a * sigmoid(b) + x) * sqrt(0.5)`
//! - Highway mode: `sigmoid(b) * a + (1 - sigmoid(b)) * x`
//!
//! Batch mode works on `(B, C, T)`. Incremental mode works on channels-last
//! `(B, T, C)` input, consumes only its last frame and keeps the receptive
//! field in the inner convolution's buffer.

use std::f64::consts::FRAC_1_SQRT_2;

use candle_core::{Module, Tensor, D};
use candle_nn::{ops, Dropout, VarBuilder};
use deepvoice_config::HighwayConfig;

use crate::conv::{conv1d, Conv1d};
use crate::{Layer, NnError, Result};

#[derive(Debug, Clone)]
pub struct HighwayConv1d {
    conv: Conv1d,
    dropout: f64,
    causal: bool,
    glu: bool,
    training: bool,
}

impl HighwayConv1d {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        config: &HighwayConfig,
        vb: VarBuilder,
    ) -> Result<Self> {
        config.validate()?;
        if in_channels != out_channels {
            return Err(NnError::ChannelMismatch {
                in_channels,
                out_channels,
            });
        }

        let conv = conv1d(
            in_channels,
            2 * out_channels,
            config.kernel_size,
            &config.conv_config(),
            vb.pp("conv"),
        )?;

        tracing::debug!(
            channels = out_channels,
            kernel_size = config.kernel_size,
            dilation = config.dilation,
            causal = config.causal,
            glu = config.glu,
            "Created highway conv1d"
        );

        Ok(Self {
            conv,
            dropout: config.dropout,
            causal: config.causal,
            glu: config.glu,
            training: true,
        })
    }

    /// Inner convolution producing the content and gate halves
    pub fn conv(&self) -> &Conv1d {
        &self.conv
    }

    pub fn is_causal(&self) -> bool {
        self.causal
    }

    pub fn is_glu(&self) -> bool {
        self.glu
    }

    /// One decoding step on the last frame of a `(B, T, C)` input
    ///
    /// Returns `(B, 1, C)`.
    pub fn incremental_forward(&mut self, x: &Tensor) -> Result<Tensor> {
        let time = x.dim(1)?;
        let x = x.narrow(1, time.saturating_sub(1), 1)?;
        let h = self.apply_dropout(&x)?;
        let h = self.conv.incremental_forward(&h)?;
        Ok(self.gate(&h, &x, D::Minus1)?)
    }

    pub fn clear_buffer(&mut self) {
        self.conv.clear_buffer();
    }

    pub fn reorder_buffer(&mut self, new_order: &Tensor) -> Result<()> {
        self.conv.reorder_buffer(new_order)
    }

    fn apply_dropout(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        Dropout::new(self.dropout as f32).forward(x, self.training)
    }

    /// Split `h` along `dim` and combine with the residual
    fn gate<Dim: candle_core::shape::Dim>(
        &self,
        h: &Tensor,
        residual: &Tensor,
        dim: Dim,
    ) -> candle_core::Result<Tensor> {
        let halves = h.chunk(2, dim)?;
        let (a, b) = (&halves[0], &halves[1]);
        let gate = ops::sigmoid(b)?;
        if self.glu {
            ((a * gate)? + residual)?.affine(FRAC_1_SQRT_2, 0.0)
        } else {
            let carry = gate.affine(-1.0, 1.0)?;
            (gate * a)? + (carry * residual)?
        }
    }
}

impl Module for HighwayConv1d {
    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let h = self.apply_dropout(x)?;
        let mut h = self.conv.forward(&h)?;
        if self.causal {
            h = h.narrow(2, 0, x.dim(2)?)?;
        }
        self.gate(&h, x, 1)
    }
}

impl Layer for HighwayConv1d {
    fn set_training(&mut self, training: bool) {
        self.training = training;
        self.conv.set_training(training);
    }

    fn is_training(&self) -> bool {
        self.training
    }
}
