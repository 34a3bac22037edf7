//! Error types for layer construction and execution

use deepvoice_config::ConfigError;

/// Layer errors
///
/// Everything except `Candle` is a caller configuration error detected
/// before any numeric work.
#[derive(Debug, thiserror::Error)]
pub enum NnError {
    #[error("Tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("{layer} does not support dilation {dilation} (only 1)")]
    InvalidDilation { layer: &'static str, dilation: usize },

    #[error("Residual connection needs in_channels == out_channels, got {in_channels} and {out_channels}")]
    ChannelMismatch {
        in_channels: usize,
        out_channels: usize,
    },

    #[error("{layer}: incremental forward is only available in eval mode")]
    IncrementalInTraining { layer: &'static str },

    #[error("Incremental buffer holds batch size {expected}, got {actual}; clear the buffer first")]
    BufferBatchMismatch { expected: usize, actual: usize },

    #[error("Got {lengths} lengths for a batch of {batch}")]
    LengthMismatch { batch: usize, lengths: usize },

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),
}

pub type Result<T> = std::result::Result<T, NnError>;
