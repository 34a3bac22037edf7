//! Centralized constants for the layer building blocks
//!
//! Single source of truth for initialization and encoding defaults.
//! Factories and config defaults read from here instead of repeating
//! literals.

/// Weight initialization
///
/// Convolution weights are drawn from `N(0, sqrt(std_mul * (1 - dropout) / (k * in)))`.
pub mod init {
    /// Plain, linearized and TBC convolutions (usually feeding a GLU)
    pub const CONV_STD_MUL: f64 = 4.0;

    /// Transposed convolution
    pub const CONV_TRANSPOSE_STD_MUL: f64 = 1.0;

    /// Highway block in sigmoid-gate mode
    pub const HIGHWAY_STD_MUL: f64 = 1.0;

    /// Highway block in GLU mode
    pub const HIGHWAY_GLU_STD_MUL: f64 = 4.0;

    /// Fixed std for plain embedding tables
    pub const EMBEDDING_STD: f64 = 0.01;
}

/// Positional encoding
pub mod position {
    /// Wavelength base of the sinusoidal table
    pub const WAVELENGTH_BASE: f64 = 10000.0;

    /// Position rate used for the stored base table
    pub const DEFAULT_RATE: f64 = 1.0;

    /// Row reserved for the padding position
    pub const PADDING_IDX: usize = 0;
}

/// Embedding lookup
pub mod embedding {
    /// p of the p-norm used with `max_norm`
    pub const DEFAULT_NORM_TYPE: f64 = 2.0;

    /// Added to row norms before rescaling
    pub const MAX_NORM_EPS: f64 = 1e-7;
}

/// Weight normalization
pub mod weight_norm {
    /// Convolution weights normalize over every axis except the first
    pub const DEFAULT_DIM: usize = 0;

    /// TBC weights are laid out `(k, in, out)`; the output axis is last
    pub const TBC_DIM: usize = 2;
}

/// Environment variable handling for layered settings
pub mod env {
    /// Prefix for overrides, e.g. `DEEPVOICE__HIGHWAY__KERNEL_SIZE=5`
    pub const PREFIX: &str = "DEEPVOICE";

    /// Separator between nested keys
    pub const SEPARATOR: &str = "__";
}
