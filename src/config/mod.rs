pub mod validation;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::protocol::canonical::ConvertOptions;

use self::validation::validate_config;

pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Gemini endpoint and HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub use_env_proxy: bool,
    #[serde(default)]
    pub proxy: Option<String>,
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_timeout_secs() -> u64 {
    180
}
fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            use_env_proxy: false,
            proxy: None,
        }
    }
}

/// Stream driver settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Whole-stream deadline; 0 disables it.
    #[serde(default)]
    pub timeout_secs: u64,
    #[serde(default = "default_pool_max_retained")]
    pub pool_max_retained: usize,
}

fn default_channel_capacity() -> usize {
    crate::stream::DEFAULT_CHANNEL_CAPACITY
}
fn default_pool_max_retained() -> usize {
    crate::protocol::gemini::stream_state::DEFAULT_POOL_MAX_RETAINED
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            timeout_secs: 0,
            pool_max_retained: default_pool_max_retained(),
        }
    }
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub json_logs: bool,
    #[serde(default)]
    pub embed_thought_signatures: bool,
    #[serde(default)]
    pub standalone_signature_parts: bool,
    #[serde(default)]
    pub tool_results_as_user: bool,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            embed_thought_signatures: false,
            standalone_signature_parts: false,
            tool_results_as_user: false,
        }
    }
}

/// Top-level adapter configuration. Every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdapterConfig {
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

impl AdapterConfig {
    /// Conversion flags derived from `features`.
    #[must_use]
    pub fn convert_options(&self) -> ConvertOptions {
        ConvertOptions {
            embed_thought_signatures: self.features.embed_thought_signatures,
            standalone_signature_parts: self.features.standalone_signature_parts,
            tool_results_as_user: self.features.tool_results_as_user,
        }
    }

    /// Fill an empty `upstream.api_key` from `GEMINI_API_KEY`.
    pub fn apply_env(&mut self) {
        self.apply_api_key(std::env::var(API_KEY_ENV).ok());
    }

    fn apply_api_key(&mut self, from_env: Option<String>) {
        if !self.upstream.api_key.trim().is_empty() {
            return;
        }
        if let Some(key) = from_env.filter(|key| !key.trim().is_empty()) {
            self.upstream.api_key = key;
        }
    }
}

/// Parse, apply the environment, and validate.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] when parsing fails or
/// [`ConfigError::Validation`] when semantic validation fails.
pub fn parse_config(contents: &str) -> Result<AdapterConfig, ConfigError> {
    let mut config: AdapterConfig = if contents.trim().is_empty() {
        AdapterConfig::default()
    } else {
        serde_yaml::from_str(contents)?
    };
    config.apply_env();
    validate_config(&config)?;
    Ok(config)
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: impl AsRef<Path>) -> Result<AdapterConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_example_config() {
        let config = load_config("config.example.yaml");
        assert!(
            config.is_ok(),
            "Failed to load example config: {:?}",
            config.err()
        );
        let config = config.unwrap();
        assert_eq!(config.stream.channel_capacity, 64);
        assert_eq!(config.upstream.timeout_secs, 180);
        assert!(config.features.embed_thought_signatures);
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.upstream.base_url, default_base_url());
        assert_eq!(config.stream.pool_max_retained, 64);
        assert_eq!(config.features.log_level, "INFO");
        assert!(!config.features.json_logs);
    }

    #[test]
    fn test_partial_sections() {
        let config = parse_config("stream:\n  channel_capacity: 8\nfeatures:\n  json_logs: true\n").unwrap();
        assert_eq!(config.stream.channel_capacity, 8);
        assert_eq!(config.stream.timeout_secs, 0);
        assert!(config.features.json_logs);
        assert_eq!(config.upstream.connect_timeout_secs, 10);
    }

    #[test]
    fn test_env_key_only_fills_empty_key() {
        let mut config = AdapterConfig::default();
        config.apply_api_key(Some("from-env".into()));
        assert_eq!(config.upstream.api_key, "from-env");

        config.apply_api_key(Some("other".into()));
        assert_eq!(config.upstream.api_key, "from-env");
    }

    #[test]
    fn test_convert_options_follow_features() {
        let mut config = AdapterConfig::default();
        config.features.standalone_signature_parts = true;
        let options = config.convert_options();
        assert!(options.standalone_signature_parts);
        assert!(!options.embed_thought_signatures);
        assert!(!options.tool_results_as_user);
    }
}
