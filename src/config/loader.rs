//! Configuration loader with environment variable expansion

use super::{expand_env_vars, Config, ConfigError};
use std::path::Path;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::load_str(&content)
    }

    /// Parse and validate configuration from YAML text
    pub fn load_str(content: &str) -> Result<Config, ConfigError> {
        let expanded = expand_env_vars(content);
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_str_defaults() {
        let config = ConfigLoader::load_str(
            r#"
accounts:
  - name: logs
    key: c2VjcmV0LWtleQ==
"#,
        )
        .unwrap();

        assert_eq!(config.accounts[0].timeout_seconds, 30);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "pretty");
        assert!(config.metrics.enabled);
        assert!(config.tracing.is_none());
    }

    #[test]
    fn test_load_str_rejects_unknown_yaml() {
        let result = ConfigLoader::load_str("accounts: [");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }
}
