//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::InstrumentationConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value {value:?} for environment variable {key}")]
    Env { key: &'static str, value: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load a TOML file, apply process environment overrides, and validate.
pub fn load_config(path: &Path) -> Result<InstrumentationConfig, ConfigError> {
    load_config_with(path, |key| std::env::var(key).ok())
}

/// Like [`load_config`], reading overrides through `lookup` instead of the
/// process environment.
pub fn load_config_with<F>(path: &Path, lookup: F) -> Result<InstrumentationConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let content = fs::read_to_string(path)?;
    let mut config: InstrumentationConfig = toml::from_str(&content)?;

    apply_env_overrides(&mut config, lookup)?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Build a configuration from defaults and the process environment only.
pub fn from_env() -> Result<InstrumentationConfig, ConfigError> {
    let mut config = InstrumentationConfig::default();
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Override configuration values from environment-style variables.
///
/// Values set in the environment win over values from the file.
pub fn apply_env_overrides<F>(config: &mut InstrumentationConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("SERVICE_NAME") {
        tracing::debug!(service_name = %v, "Service name set in environment");
        config.service_name = v;
    }

    if let Some(v) = lookup("JAEGER_HOST") {
        config.tracing.agent_host = v;
    }
    if let Some(v) = lookup("JAEGER_PORT") {
        config.tracing.agent_port = v
            .trim()
            .parse()
            .map_err(|_| ConfigError::Env { key: "JAEGER_PORT", value: v.clone() })?;
    }
    if let Some(v) = lookup("ENABLE_JAEGER_TRACING") {
        config.tracing.enabled = parse_flag("ENABLE_JAEGER_TRACING", &v)?;
    }

    if let Some(v) = lookup("ENABLE_PROMETHEUS_METRICS") {
        config.metrics.enabled = parse_flag("ENABLE_PROMETHEUS_METRICS", &v)?;
    }
    if let Some(v) = lookup("ENABLE_PROMETHEUS_AUTH") {
        config.metrics.auth_enabled = parse_flag("ENABLE_PROMETHEUS_AUTH", &v)?;
    }
    if let Some(v) = lookup("PROMETHEUS_AUTH_TOKEN") {
        config.metrics.auth_token = Some(v);
    }
    if let Some(v) = lookup("PROMETHEUS_METRICS") {
        config.metrics.metrics = split_list(&v);
    }

    if let Some(v) = lookup("OCTOPUS_INCLUSION_PATTERNS") {
        config.instrumentation.include = split_list(&v);
    }
    if let Some(v) = lookup("OCTOPUS_EXCLUSION_PATTERNS") {
        config.instrumentation.exclude = split_list(&v);
    }

    if let Some(v) = lookup("LOG_LEVEL") {
        config.logging.level = v;
    }

    Ok(())
}

fn parse_flag(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" => Ok(true),
        "false" | "f" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::Env {
            key,
            value: value.to_string(),
        }),
    }
}

/// Split a comma-separated list, dropping empty entries.
fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
