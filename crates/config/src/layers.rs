//! Per-layer configuration
//!
//! Every recognized layer option is an explicit field. Defaults match the
//! DeepVoice3 layer constructors.

use serde::{Deserialize, Serialize};

use crate::constants::{embedding, init, position};
use crate::ConfigError;

/// Convolution factory options
///
/// `std_mul` is optional because each factory has its own default
/// (see [`crate::constants::init`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvConfig {
    /// Stride of the convolution
    pub stride: usize,
    /// Zero padding applied to both ends of the time axis
    pub padding: usize,
    /// Spacing between kernel taps
    pub dilation: usize,
    /// Extra output length (transposed convolution only)
    pub output_padding: usize,
    /// Dropout applied before this layer; scales the init variance
    pub dropout: f64,
    /// Variance multiplier; `None` uses the factory default
    pub std_mul: Option<f64>,
}

impl Default for ConvConfig {
    fn default() -> Self {
        Self {
            stride: 1,
            padding: 0,
            dilation: 1,
            output_padding: 0,
            dropout: 0.0,
            std_mul: None,
        }
    }
}

impl ConvConfig {
    pub fn with_padding(mut self, padding: usize) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_dilation(mut self, dilation: usize) -> Self {
        self.dilation = dilation;
        self
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_dropout(mut self, dropout: f64) -> Self {
        self.dropout = dropout;
        self
    }

    pub fn with_std_mul(mut self, std_mul: f64) -> Self {
        self.std_mul = Some(std_mul);
        self
    }

    /// Resolve `std_mul` against a factory default
    pub fn std_mul_or(&self, default: f64) -> f64 {
        self.std_mul.unwrap_or(default)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stride == 0 {
            return Err(ConfigError::invalid("stride", "must be at least 1"));
        }
        if self.dilation == 0 {
            return Err(ConfigError::invalid("dilation", "must be at least 1"));
        }
        validate_dropout(self.dropout)?;
        validate_std_mul(self.std_mul)
    }
}

/// Highway convolution block options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HighwayConfig {
    pub kernel_size: usize,
    /// `None` derives padding from `causal`, `kernel_size` and `dilation`
    pub padding: Option<usize>,
    pub dilation: usize,
    /// No output step may depend on future input steps
    pub causal: bool,
    pub dropout: f64,
    /// `None` picks the gating-mode default
    pub std_mul: Option<f64>,
    /// Gated linear unit instead of sigmoid highway gating
    pub glu: bool,
}

impl Default for HighwayConfig {
    fn default() -> Self {
        Self {
            kernel_size: 1,
            padding: None,
            dilation: 1,
            causal: false,
            dropout: 0.0,
            std_mul: None,
            glu: false,
        }
    }
}

impl HighwayConfig {
    pub fn causal(mut self, causal: bool) -> Self {
        self.causal = causal;
        self
    }

    pub fn glu(mut self, glu: bool) -> Self {
        self.glu = glu;
        self
    }

    pub fn with_kernel_size(mut self, kernel_size: usize) -> Self {
        self.kernel_size = kernel_size;
        self
    }

    pub fn with_dilation(mut self, dilation: usize) -> Self {
        self.dilation = dilation;
        self
    }

    pub fn with_dropout(mut self, dropout: f64) -> Self {
        self.dropout = dropout;
        self
    }

    /// Effective padding
    ///
    /// Causal: `(k - 1) * d`, trimmed from the tail after the convolution.
    /// Non-causal: `(k - 1) / 2 * d`, length preserving for odd `k`.
    pub fn resolved_padding(&self) -> usize {
        self.padding.unwrap_or_else(|| {
            let span = self.kernel_size.saturating_sub(1);
            if self.causal {
                span * self.dilation
            } else {
                span / 2 * self.dilation
            }
        })
    }

    /// Effective variance multiplier
    pub fn resolved_std_mul(&self) -> f64 {
        self.std_mul.unwrap_or(if self.glu {
            init::HIGHWAY_GLU_STD_MUL
        } else {
            init::HIGHWAY_STD_MUL
        })
    }

    /// Options handed to the inner convolution factory
    pub fn conv_config(&self) -> ConvConfig {
        ConvConfig {
            padding: self.resolved_padding(),
            dilation: self.dilation,
            dropout: self.dropout,
            std_mul: Some(self.resolved_std_mul()),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.kernel_size == 0 {
            return Err(ConfigError::invalid("kernel_size", "must be at least 1"));
        }
        if self.dilation == 0 {
            return Err(ConfigError::invalid("dilation", "must be at least 1"));
        }
        validate_dropout(self.dropout)?;
        validate_std_mul(self.std_mul)
    }
}

/// Embedding lookup options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Rows at this index get no gradient
    pub padding_idx: Option<usize>,
    /// Rows with a larger norm are rescaled to this norm
    pub max_norm: Option<f64>,
    /// p of the p-norm used with `max_norm`
    pub norm_type: f64,
    /// Divide row gradients by their frequency in the mini-batch
    pub scale_grad_by_freq: bool,
    /// Sparse gradients (accepted; dense gradients are produced)
    pub sparse: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            padding_idx: None,
            max_norm: None,
            norm_type: embedding::DEFAULT_NORM_TYPE,
            scale_grad_by_freq: false,
            sparse: false,
        }
    }
}

impl EmbeddingConfig {
    pub fn with_padding_idx(mut self, padding_idx: usize) -> Self {
        self.padding_idx = Some(padding_idx);
        self
    }

    pub fn with_max_norm(mut self, max_norm: f64) -> Self {
        self.max_norm = Some(max_norm);
        self
    }

    /// Check everything that does not depend on the table size
    pub fn validate_options(&self) -> Result<(), ConfigError> {
        if let Some(max_norm) = self.max_norm {
            if !(max_norm > 0.0) {
                return Err(ConfigError::invalid("max_norm", "must be positive"));
            }
        }
        if !(self.norm_type > 0.0) {
            return Err(ConfigError::invalid("norm_type", "must be positive"));
        }
        Ok(())
    }

    pub fn validate(&self, num_embeddings: usize) -> Result<(), ConfigError> {
        if let Some(idx) = self.padding_idx {
            if idx >= num_embeddings {
                return Err(ConfigError::invalid(
                    "padding_idx",
                    format!("{} is out of range for {} embeddings", idx, num_embeddings),
                ));
            }
        }
        self.validate_options()
    }
}

/// Sinusoidal position encoding options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionalConfig {
    /// Number of positions, including the padding row
    pub num_positions: usize,
    pub embedding_dim: usize,
    pub position_rate: f64,
    pub padding_idx: usize,
}

impl Default for PositionalConfig {
    fn default() -> Self {
        Self {
            num_positions: 1024,
            embedding_dim: 256,
            position_rate: position::DEFAULT_RATE,
            padding_idx: position::PADDING_IDX,
        }
    }
}

impl PositionalConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_positions == 0 {
            return Err(ConfigError::invalid("num_positions", "must be positive"));
        }
        if self.embedding_dim == 0 {
            return Err(ConfigError::invalid("embedding_dim", "must be positive"));
        }
        if self.padding_idx >= self.num_positions {
            return Err(ConfigError::invalid(
                "padding_idx",
                "must be smaller than num_positions",
            ));
        }
        Ok(())
    }

    /// Lookup options for the encoding layer
    pub fn embedding_config(&self) -> EmbeddingConfig {
        EmbeddingConfig {
            padding_idx: Some(self.padding_idx),
            ..Default::default()
        }
    }
}

fn validate_dropout(dropout: f64) -> Result<(), ConfigError> {
    if !(0.0..1.0).contains(&dropout) {
        return Err(ConfigError::invalid("dropout", "must be in [0, 1)"));
    }
    Ok(())
}

fn validate_std_mul(std_mul: Option<f64>) -> Result<(), ConfigError> {
    match std_mul {
        Some(v) if !(v > 0.0) => Err(ConfigError::invalid("std_mul", "must be positive")),
        _ => Ok(()),
    }
}
