//! Configuration loader with environment variable expansion

use super::{expand_env_vars, Config, ConfigError};
use std::path::Path;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse configuration from YAML text
    ///
    /// `${VAR}` and `${VAR:-default}` placeholders are expanded before parsing.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Config, ConfigError> {
        let expanded = expand_env_vars(content);
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }
}
