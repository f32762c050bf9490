use super::{AppConfig, ConfigError};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_upstream(config)?;
    validate_metering(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.http_pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "server.http_pool_max_idle_per_host must be greater than 0",
        ));
    }
    if server.timeout == 0 {
        return Err(validation_err("server.timeout must be greater than 0"));
    }
    if let Some(worker_threads) = server.runtime_worker_threads {
        if worker_threads == 0 {
            return Err(validation_err(
                "server.runtime_worker_threads must be greater than 0 when set",
            ));
        }
    }
    Ok(())
}

fn validate_upstream(config: &AppConfig) -> Result<(), ConfigError> {
    let upstream = &config.upstream;
    validate_http_url("upstream.base_url", &upstream.base_url)?;
    if !upstream.chat_path.starts_with('/') {
        return Err(validation_err("upstream.chat_path must start with '/'"));
    }
    if let Some(api_key) = upstream.api_key.as_deref() {
        if api_key.trim().is_empty() {
            return Err(validation_err("upstream.api_key cannot be empty when set"));
        }
    }
    Ok(())
}

fn validate_metering(config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(stat_url) = config.metering.stat_url() {
        validate_http_url("metering.stat_url", stat_url)?;
    }
    if config.metering.timeout_secs == 0 {
        return Err(validation_err(
            "metering.timeout_secs must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_http_url(field_name: &str, value: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(value.trim())
        .map_err(|err| validation_err(format!("{field_name} is not a valid URL: {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(validation_err(format!(
            "{field_name} must start with http:// or https://"
        )));
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let valid_levels = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}
