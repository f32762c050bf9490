pub mod validation;

use serde::{Deserialize, Serialize};

use self::validation::validate_config;

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

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub base_path: String,
    /// Upstream request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_http_pool_max_idle_per_host")]
    pub http_pool_max_idle_per_host: usize,
    #[serde(default = "default_http_pool_idle_timeout_secs")]
    pub http_pool_idle_timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_worker_threads: Option<usize>,
}

fn default_port() -> u16 {
    3000
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_timeout() -> u64 {
    180
}
fn default_http_pool_max_idle_per_host() -> usize {
    16
}
fn default_http_pool_idle_timeout_secs() -> u64 {
    15
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            base_path: String::new(),
            timeout: default_timeout(),
            http_pool_max_idle_per_host: default_http_pool_max_idle_per_host(),
            http_pool_idle_timeout_secs: default_http_pool_idle_timeout_secs(),
            runtime_worker_threads: None,
        }
    }
}

/// Upstream chat-completion service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_base_url")]
    pub base_url: String,
    #[serde(default = "default_chat_path")]
    pub chat_path: String,
    /// When unset, the caller's own `Authorization` header is forwarded.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

fn default_upstream_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_chat_path() -> String {
    "/v1/chat/completions".to_string()
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_upstream_base_url(),
            chat_path: default_chat_path(),
            api_key: None,
        }
    }
}

/// Usage collector settings. A missing `stat_url` disables metering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeteringConfig {
    #[serde(default)]
    pub stat_url: Option<String>,
    #[serde(default = "default_metering_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_metering_timeout_secs() -> u64 {
    10
}

impl Default for MeteringConfig {
    fn default() -> Self {
        Self {
            stat_url: None,
            timeout_secs: default_metering_timeout_secs(),
        }
    }
}

impl MeteringConfig {
    /// The configured collector base URL, treating blank values as unset.
    #[must_use]
    pub fn stat_url(&self) -> Option<&str> {
        self.stat_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub metering: MeteringConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

impl AppConfig {
    /// Apply `STAT_URL`, `OPENAI_API_KEY` and `BASE_URL` overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_blank = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(stat_url) = non_blank("STAT_URL") {
            self.metering.stat_url = Some(stat_url);
        }
        if let Some(api_key) = non_blank("OPENAI_API_KEY") {
            self.upstream.api_key = Some(api_key);
        }
        if let Some(base_url) = non_blank("BASE_URL") {
            self.upstream.base_url = base_url;
        }
    }
}

/// Load configuration from a YAML file, apply environment overrides and
/// validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let mut config: AppConfig = serde_yaml::from_str(&contents)?;
    config.apply_env_overrides();
    validate_config(&config)?;
    Ok(config)
}
