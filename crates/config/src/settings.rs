//! Layered settings loading
//!
//! Layers are merged in order:
//! 1. Built-in defaults
//! 2. Settings file (TOML, YAML or JSON, by extension)
//! 3. `DEEPVOICE__*` environment overrides

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::env;
use crate::layers::{ConvConfig, EmbeddingConfig, HighwayConfig, PositionalConfig};
use crate::ConfigError;

/// Settings for a set of layers built together
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NnSettings {
    pub positional: PositionalConfig,
    pub embedding: EmbeddingConfig,
    pub conv: ConvConfig,
    pub highway: HighwayConfig,
}

impl NnSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.positional.validate()?;
        self.embedding.validate_options()?;
        self.conv.validate()?;
        self.highway.validate()
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::invalid("settings", e.to_string()))
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::invalid("settings", e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::invalid("settings", e.to_string()))
    }
}

/// Load settings from an optional file plus environment overrides
pub fn load_settings(path: Option<&Path>) -> Result<NnSettings, ConfigError> {
    let defaults = config::Config::try_from(&NnSettings::default())?;

    let mut builder = config::Config::builder().add_source(defaults);
    if let Some(path) = path {
        tracing::debug!(path = %path.display(), "Loading layer settings file");
        builder = builder.add_source(config::File::from(path));
    }
    builder = builder.add_source(
        config::Environment::with_prefix(env::PREFIX)
            .prefix_separator(env::SEPARATOR)
            .separator(env::SEPARATOR)
            .try_parsing(true),
    );

    let settings: NnSettings = builder.build()?.try_deserialize()?;
    settings.validate()?;

    tracing::info!(
        highway_kernel = settings.highway.kernel_size,
        highway_causal = settings.highway.causal,
        highway_glu = settings.highway.glu,
        positions = settings.positional.num_positions,
        "Layer settings loaded"
    );

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_file() {
        let settings = load_settings(None).unwrap();
        assert_eq!(settings.highway, HighwayConfig::default());
        assert_eq!(settings.positional.padding_idx, 0);
    }

    #[test]
    fn test_load_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[highway]
kernel_size = 3
causal = true
dropout = 0.05

[positional]
num_positions = 512
embedding_dim = 128
position_rate = 1.5
"#
        )
        .unwrap();

        let settings = load_settings(Some(file.path())).unwrap();
        assert_eq!(settings.highway.kernel_size, 3);
        assert!(settings.highway.causal);
        assert!((settings.highway.dropout - 0.05).abs() < 1e-12);
        assert_eq!(settings.positional.num_positions, 512);
        assert_eq!(settings.positional.embedding_dim, 128);
        // untouched sections keep their defaults
        assert_eq!(settings.conv, ConvConfig::default());
    }

    #[test]
    fn test_load_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "highway:\n  kernel_size: 5\n  glu: true\n").unwrap();

        let settings = load_settings(Some(file.path())).unwrap();
        assert_eq!(settings.highway.kernel_size, 5);
        assert!(settings.highway.glu);
    }

    #[test]
    fn test_invalid_file_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[highway]\nkernel_size = 0\n").unwrap();

        let err = load_settings(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "kernel_size", .. }));
    }

    #[test]
    fn test_invalid_embedding_section_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[embedding]\nmax_norm = -1.0\n").unwrap();

        let err = load_settings(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "max_norm", .. }));

        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[embedding]\nnorm_type = 0.0\n").unwrap();
        let err = load_settings(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "norm_type", .. }));
    }

    #[test]
    fn test_toml_roundtrip() {
        let settings = NnSettings::default();
        let text = settings.to_toml().unwrap();
        let parsed: NnSettings = toml::from_str(&text).unwrap();
        assert_eq!(parsed, settings);
    }
}
