//! Parameter initialization

use candle_core::{Shape, Tensor, Var};
use candle_nn::{Init, VarBuilder};
use deepvoice_config::ConfigError;

use crate::Result;

/// Init std for a convolution feeding from a dropout layer
///
/// `sqrt(std_mul * (1 - dropout) / (kernel_size * in_channels))`
pub fn conv_std(std_mul: f64, dropout: f64, kernel_size: usize, in_channels: usize) -> f64 {
    ((std_mul * (1.0 - dropout)) / (kernel_size * in_channels) as f64).sqrt()
}

/// Zero-mean normal init hint
pub fn normal(std: f64) -> Init {
    Init::Randn {
        mean: 0.0,
        stdev: std,
    }
}

/// Fetch `name` from `vb`, seeding it with `seed()` if the builder creates it
///
/// Parameters that already exist (a loaded checkpoint, or a `VarMap` that
/// was populated earlier) are returned untouched.
pub fn get_seeded<S: Into<Shape>>(
    vb: &VarBuilder,
    shape: S,
    name: &str,
    seed: impl FnOnce() -> Result<Tensor>,
) -> Result<Tensor> {
    let fresh = !vb.contains_tensor(name);
    let tensor = vb.get_with_hints(shape, name, Init::Const(0.0))?;
    if fresh && tensor.is_variable() {
        Var::from_tensor(&tensor)?.set(&seed()?)?;
    }
    Ok(tensor)
}

/// Reject empty channel or kernel dimensions
pub fn validate_dims(
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
) -> std::result::Result<(), ConfigError> {
    if in_channels == 0 {
        return Err(ConfigError::invalid("in_channels", "must be positive"));
    }
    if out_channels == 0 {
        return Err(ConfigError::invalid("out_channels", "must be positive"));
    }
    if kernel_size == 0 {
        return Err(ConfigError::invalid("kernel_size", "must be positive"));
    }
    Ok(())
}
