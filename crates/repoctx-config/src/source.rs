//! Configuration source loading and composition
//!
//! File sources are parsed into a complete [`ApplicationConfig`] (missing
//! fields take their defaults through `#[serde(default)]`). The environment
//! is always layered last, on top of whatever the highest-priority file
//! produced.

use crate::validation::Validate;
use crate::{ApplicationConfig, ConfigResult};
use std::path::{Path, PathBuf};

/// Trait for loading configuration from different sources
pub trait ConfigurationSource: Send + Sync {
    /// Load configuration from this source
    ///
    /// # Errors
    /// Returns configuration loading errors
    fn load(&self) -> ConfigResult<ApplicationConfig>;

    /// Get the name of this configuration source
    fn name(&self) -> &str;

    /// Get the priority of this source (higher number = higher priority)
    fn priority(&self) -> u8;
}

/// Load configuration from TOML file
pub struct TomlFileSource {
    path: PathBuf,
}

impl TomlFileSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl ConfigurationSource for TomlFileSource {
    fn load(&self) -> ConfigResult<ApplicationConfig> {
        let content = std::fs::read_to_string(&self.path)?;
        let config: ApplicationConfig = toml::from_str(&content)?;
        Ok(config)
    }

    fn name(&self) -> &'static str {
        "toml_file"
    }

    fn priority(&self) -> u8 {
        50
    }
}

/// Load configuration from YAML file
pub struct YamlFileSource {
    path: PathBuf,
}

impl YamlFileSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl ConfigurationSource for YamlFileSource {
    fn load(&self) -> ConfigResult<ApplicationConfig> {
        let content = std::fs::read_to_string(&self.path)?;
        let config: ApplicationConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    fn name(&self) -> &'static str {
        "yaml_file"
    }

    fn priority(&self) -> u8 {
        50
    }
}

/// Pick the file source matching a path's extension
pub fn file_source<P: AsRef<Path>>(path: P) -> Box<dyn ConfigurationSource> {
    let path = path.as_ref();
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml" | "yml") => Box::new(YamlFileSource::new(path)),
        _ => Box::new(TomlFileSource::new(path)),
    }
}

/// Type alias for configuration sources
type ConfigSources = Vec<Box<dyn ConfigurationSource>>;

/// Configuration loader that combines multiple sources
pub struct ConfigurationLoader {
    sources: ConfigSources,
}

impl ConfigurationLoader {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
        }
    }

    #[must_use]
    pub fn add_source(mut self, source: Box<dyn ConfigurationSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Load configuration from all sources with priority ordering
    ///
    /// A configured file that cannot be read or parsed is an error.
    ///
    /// # Errors
    /// Returns configuration loading or validation errors
    pub fn load(&self) -> ConfigResult<ApplicationConfig> {
        let mut sorted_sources = self.sources.iter().collect::<Vec<_>>();
        sorted_sources.sort_by_key(|source| source.priority());

        let mut config = ApplicationConfig::default();
        for source in sorted_sources {
            config = source.load()?;
            tracing::debug!(source = source.name(), "Loaded configuration source");
        }

        let config = config.with_env_overrides();
        config.validate()?;
        Ok(config)
    }
}

impl Default for ConfigurationLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ConfigError;
    use std::io::Write;

    #[test]
    fn test_partial_toml_file_keeps_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[chunking]\nchunk_size = 1200\n\n[embedding]\nbatch_size = 16").unwrap();

        let config = ConfigurationLoader::new()
            .add_source(file_source(file.path()))
            .load()
            .unwrap();

        assert_eq!(config.chunking.chunk_size, 1200);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.embedding.batch_size, 16);
    }

    #[test]
    fn test_yaml_file_source() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "embedding:\n  model: local-model\n  dimension: 384").unwrap();

        let config = file_source(file.path()).load().unwrap();

        assert_eq!(config.embedding.model, "local-model");
        assert_eq!(config.embedding.dimension, 384);
    }

    #[test]
    fn test_invalid_file_values_fail_validation() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[chunking]\nchunk_size = 100\nchunk_overlap = 150").unwrap();

        let result = ConfigurationLoader::new()
            .add_source(file_source(file.path()))
            .load();

        assert!(matches!(result, Err(ConfigError::Inconsistent { .. })));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = ConfigurationLoader::new()
            .add_source(Box::new(TomlFileSource::new("/nonexistent/repoctx.toml")))
            .load();

        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
