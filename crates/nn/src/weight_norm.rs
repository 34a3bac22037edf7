//! Weight Normalization
//!
//! Reparameterizes a weight as a direction `v` and a magnitude `g`:
//! `weight = g * v / ||v||`, where the norm is taken over every axis except
//! `dim`. `g` keeps a size-1 axis everywhere but `dim`, so each slice along
//! `dim` (the output channel of a standard convolution) has its own scale.
//!
//! Parameter names follow `torch.nn.utils.weight_norm` (`weight_g`,
//! `weight_v`) so pretrained checkpoints load without renaming.

use candle_core::{Shape, Tensor};
use candle_nn::VarBuilder;

use crate::{init, Result};

#[derive(Debug, Clone)]
pub struct WeightNorm {
    weight_g: Tensor,
    weight_v: Tensor,
    dim: usize,
}

impl WeightNorm {
    /// Fetch or create `weight_v` and `weight_g` under `vb`
    ///
    /// A new `weight_v` is drawn from `N(0, std)`. A new `weight_g` starts
    /// at `||weight_v||`, so the initial effective weight equals `weight_v`.
    pub fn new<S: Into<Shape>>(shape: S, dim: usize, std: f64, vb: &VarBuilder) -> Result<Self> {
        let shape = shape.into();
        if dim >= shape.rank() {
            let msg = format!(
                "weight norm dim {} out of range for a rank {} weight",
                dim,
                shape.rank()
            );
            return Err(candle_core::Error::Msg(msg).into());
        }

        let weight_v = vb.get_with_hints(shape.clone(), "weight_v", init::normal(std))?;
        let g_dims: Vec<usize> = shape
            .dims()
            .iter()
            .enumerate()
            .map(|(axis, &size)| if axis == dim { size } else { 1 })
            .collect();
        let weight_g = init::get_seeded(vb, g_dims, "weight_g", || {
            Ok(norm_except_dim(&weight_v, dim)?)
        })?;

        Ok(Self {
            weight_g,
            weight_v,
            dim,
        })
    }

    /// Effective weight, recomputed from `g` and `v`
    pub fn weight(&self) -> candle_core::Result<Tensor> {
        let norm = norm_except_dim(&self.weight_v, self.dim)?;
        let scale = self.weight_g.broadcast_div(&norm)?;
        self.weight_v.broadcast_mul(&scale)
    }

    pub fn weight_g(&self) -> &Tensor {
        &self.weight_g
    }

    pub fn weight_v(&self) -> &Tensor {
        &self.weight_v
    }

    pub fn dim(&self) -> usize {
        self.dim
    }
}

/// L2 norm over every axis except `dim`, keeping all axes
pub fn norm_except_dim(v: &Tensor, dim: usize) -> candle_core::Result<Tensor> {
    let axes: Vec<usize> = (0..v.rank()).filter(|&axis| axis != dim).collect();
    v.sqr()?.sum_keepdim(axes)?.sqrt()
}
