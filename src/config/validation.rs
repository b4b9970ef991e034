use super::{AdapterConfig, ConfigError};

/// Validate the full adapter config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AdapterConfig) -> Result<(), ConfigError> {
    validate_upstream(config)?;
    validate_stream(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_upstream(config: &AdapterConfig) -> Result<(), ConfigError> {
    let upstream = &config.upstream;
    let base_url = upstream.base_url.trim();
    if base_url.is_empty() {
        return Err(validation_err("upstream.base_url cannot be empty"));
    }
    validate_http_url("upstream.base_url", base_url)?;
    if upstream.timeout_secs == 0 {
        return Err(validation_err("upstream.timeout_secs must be greater than 0"));
    }
    if upstream.connect_timeout_secs == 0 {
        return Err(validation_err(
            "upstream.connect_timeout_secs must be greater than 0",
        ));
    }
    if let Some(proxy) = upstream.proxy.as_deref().map(str::trim) {
        if proxy.is_empty() {
            return Err(validation_err("upstream.proxy cannot be empty when set"));
        }
        validate_http_url("upstream.proxy", proxy)?;
    }
    Ok(())
}

fn validate_http_url(field_name: &str, value: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(value)
        .map_err(|err| validation_err(format!("{field_name} is not a valid URL: {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(validation_err(format!(
            "{field_name} must use http:// or https://"
        )));
    }
    Ok(())
}

fn validate_stream(config: &AdapterConfig) -> Result<(), ConfigError> {
    if config.stream.channel_capacity == 0 {
        return Err(validation_err(
            "stream.channel_capacity must be greater than 0",
        ));
    }
    if config.stream.pool_max_retained == 0 {
        return Err(validation_err(
            "stream.pool_max_retained must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_log_level(config: &AdapterConfig) -> Result<(), ConfigError> {
    let valid_levels = [
        "TRACE", "DEBUG", "INFO", "WARN", "WARNING", "ERROR", "CRITICAL", "DISABLED",
    ];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}
