//! Configuration module for Kasane Appendr
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use thiserror::Error;

use base64::Engine as _;

mod loader;

pub use loader::ConfigLoader;

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - Simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - Expansion with default value
///
/// Variable names must start with an uppercase letter or underscore and
/// contain only uppercase letters, digits, and underscores.
pub(crate) fn expand_env_vars(s: &str) -> String {
    let re = match regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}") {
        Ok(re) => re,
        Err(_) => return s.to_string(),
    };
    let mut last_match = 0;
    let mut result = String::with_capacity(s.len());

    for cap in re.captures_iter(s) {
        let Some(full_match) = cap.get(0) else {
            continue;
        };
        let var_name = &cap[1];

        result.push_str(&s[last_match..full_match.start()]);

        match (std::env::var(var_name), cap.get(2)) {
            (Ok(value), _) => result.push_str(&value),
            (Err(_), Some(default)) => result.push_str(default.as_str()),
            // No env var and no default. Keep the original placeholder.
            (Err(_), None) => result.push_str(full_match.as_str()),
        }

        last_match = full_match.end();
    }

    result.push_str(&s[last_match..]);
    result
}

/// Custom deserializer for strings with environment variable expansion
fn deserialize_with_env<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::de::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(expand_env_vars(&s))
}

// ============================================================================
// Validation Helpers
// ============================================================================

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: &[&str] = &["pretty", "json"];

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub accounts: Vec<AccountConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub tracing: Option<TracingConfig>,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.accounts.is_empty() {
            return Err(ConfigError::ValidationError(
                "At least one storage account must be configured".into(),
            ));
        }

        let mut seen = HashSet::new();
        for account in &self.accounts {
            account.validate()?;
            if !seen.insert(account.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate storage account '{}'",
                    account.name
                )));
            }
        }

        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level '{}': must be one of {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            )));
        }

        if !LOG_FORMATS.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log format '{}': must be 'pretty' or 'json'",
                self.logging.format
            )));
        }

        if let Some(ref tracing) = self.tracing {
            if tracing.enabled {
                if tracing.service_name.trim().is_empty() {
                    return Err(ConfigError::ValidationError(
                        "Service name cannot be empty when tracing is enabled".into(),
                    ));
                }

                if !is_valid_http_url(&tracing.otlp_endpoint) {
                    return Err(ConfigError::ValidationError(
                        "Invalid OTLP endpoint: must start with http:// or https://".into(),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Look up an account by name
    pub fn account(&self, name: &str) -> Option<&AccountConfig> {
        self.accounts.iter().find(|a| a.name == name)
    }
}

/// Storage account configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub name: String,

    /// Base64 shared key. Supports ${VAR} and ${VAR:-default} expansion.
    #[serde(deserialize_with = "deserialize_with_env")]
    pub key: String,

    /// Blob service endpoint; defaults to `https://<name>.blob.core.windows.net`
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl AccountConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().len() < 2 {
            return Err(ConfigError::ValidationError(format!(
                "Account name '{}' must be at least 2 characters",
                self.name
            )));
        }

        if self.key.len() < 2 {
            return Err(ConfigError::ValidationError(format!(
                "Account '{}' has a missing or too short key",
                self.name
            )));
        }

        if base64::engine::general_purpose::STANDARD
            .decode(&self.key)
            .is_err()
        {
            return Err(ConfigError::ValidationError(format!(
                "Account '{}' key is not valid base64",
                self.name
            )));
        }

        if let Some(ref endpoint) = self.endpoint {
            if !is_valid_http_url(endpoint) {
                return Err(ConfigError::ValidationError(format!(
                    "Account '{}' endpoint must start with http:// or https://",
                    self.name
                )));
            }
        }

        if self.timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(format!(
                "Account '{}' timeout_seconds must be positive",
                self.name
            )));
        }

        Ok(())
    }
}

impl fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountConfig")
            .field("name", &self.name)
            .field("key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

fn default_timeout_seconds() -> u64 {
    30
}

/// Log output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error. RUST_LOG takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// pretty or json
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

/// OpenTelemetry span export, used when built with the `tracing` feature.
///
/// ```yaml
/// tracing:
///   enabled: true
///   service_name: "kasane-appendr"
///   otlp_endpoint: "${OTLP_ENDPOINT:-http://localhost:4317}"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(
        default = "default_service_name",
        deserialize_with = "deserialize_with_env"
    )]
    pub service_name: String,

    /// OTLP gRPC collector endpoint
    #[serde(
        default = "default_otlp_endpoint",
        deserialize_with = "deserialize_with_env"
    )]
    pub otlp_endpoint: String,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            service_name: default_service_name(),
            otlp_endpoint: default_otlp_endpoint(),
        }
    }
}

fn default_service_name() -> String {
    "kasane-appendr".to_string()
}

fn default_otlp_endpoint() -> String {
    "http://localhost:4317".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(name: &str) -> AccountConfig {
        AccountConfig {
            name: name.to_string(),
            key: "c2VjcmV0LWtleQ==".to_string(),
            endpoint: None,
            timeout_seconds: 30,
        }
    }

    fn config(accounts: Vec<AccountConfig>) -> Config {
        Config {
            accounts,
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
            tracing: None,
        }
    }

    #[test]
    fn test_config_validation_empty_accounts() {
        assert!(config(vec![]).validate().is_err());
    }

    #[test]
    fn test_config_validation_ok() {
        let cfg = config(vec![account("logs"), account("audit")]);
        cfg.validate().unwrap();
        assert!(cfg.account("audit").is_some());
        assert!(cfg.account("missing").is_none());
    }

    #[test]
    fn test_duplicate_account_names() {
        let err = config(vec![account("logs"), account("logs")])
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("Duplicate"));
    }

    #[test]
    fn test_short_name_and_bad_key() {
        assert!(config(vec![account("x")]).validate().is_err());

        let mut bad = account("logs");
        bad.key = "not base64!".to_string();
        assert!(config(vec![bad]).validate().is_err());
    }

    #[test]
    fn test_endpoint_scheme() {
        let mut acct = account("logs");
        acct.endpoint = Some("ftp://example".to_string());
        assert!(config(vec![acct.clone()]).validate().is_err());

        acct.endpoint = Some("http://127.0.0.1:10000/devstoreaccount1".to_string());
        config(vec![acct]).validate().unwrap();
    }

    #[test]
    fn test_logging_sets() {
        let mut cfg = config(vec![account("logs")]);
        cfg.logging.level = "verbose".to_string();
        assert!(cfg.validate().is_err());

        cfg.logging.level = "debug".to_string();
        cfg.logging.format = "xml".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_key() {
        let rendered = format!("{:?}", account("logs"));
        assert!(!rendered.contains("c2VjcmV0"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_expand_env_default() {
        assert_eq!(
            expand_env_vars("${KASANE_SURELY_UNSET_VAR:-fallback}"),
            "fallback"
        );
        assert_eq!(
            expand_env_vars("${KASANE_SURELY_UNSET_VAR}"),
            "${KASANE_SURELY_UNSET_VAR}"
        );
    }
}
