//! Configuration for the DeepVoice3 layer building blocks
//!
//! Explicit per-layer option structures replace keyword-argument
//! forwarding: each recognized option is a typed field with a documented
//! default. Settings can be loaded from a file and overridden from the
//! environment.

pub mod constants;
pub mod layers;
pub mod settings;

pub use layers::{ConvConfig, EmbeddingConfig, HighwayConfig, PositionalConfig};
pub use settings::{load_settings, NnSettings};

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
