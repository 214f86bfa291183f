//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check cross-field rules (auth enabled requires a token)
//! - Validate value ranges (port, sampler param)
//! - Compile filter patterns
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: InstrumentationConfig → Result<(), Vec<ValidationError>>
//! - Runs before any plugin is installed

use regex::Regex;
use std::fmt;

use crate::config::schema::{InstrumentationConfig, SamplerKind};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a configuration, collecting every error.
pub fn validate_config(config: &InstrumentationConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let any_enabled = config.tracing.enabled || config.metrics.enabled;
    if any_enabled && config.service_name.trim().is_empty() {
        errors.push(ValidationError::new(
            "service_name",
            "required when tracing or metrics are enabled",
        ));
    }

    if config.tracing.enabled {
        if config.tracing.agent_host.trim().is_empty() {
            errors.push(ValidationError::new("tracing.agent_host", "must not be empty"));
        }
        if config.tracing.agent_port == 0 {
            errors.push(ValidationError::new("tracing.agent_port", "must be non-zero"));
        }
    }

    let sampler = &config.tracing.sampler;
    let param_ok = match sampler.kind {
        SamplerKind::Const => sampler.param == 0.0 || sampler.param == 1.0,
        SamplerKind::Probabilistic => (0.0..=1.0).contains(&sampler.param),
    };
    if !param_ok {
        errors.push(ValidationError::new(
            "tracing.sampler.param",
            format!("{} is out of range for a {:?} sampler", sampler.param, sampler.kind),
        ));
    }

    if config.metrics.enabled {
        if !config.metrics.path.starts_with('/') {
            errors.push(ValidationError::new("metrics.path", "must start with '/'"));
        }
        let has_token = config
            .metrics
            .auth_token
            .as_deref()
            .is_some_and(|t| !t.is_empty());
        if config.metrics.auth_enabled && !has_token {
            errors.push(ValidationError::new(
                "metrics.auth_token",
                "required when metrics auth is enabled",
            ));
        }
    }

    for (field, patterns) in [
        ("instrumentation.include", &config.instrumentation.include),
        ("instrumentation.exclude", &config.instrumentation.exclude),
    ] {
        for pattern in patterns {
            if let Err(e) = Regex::new(pattern) {
                errors.push(ValidationError::new(field, format!("invalid pattern {:?}: {}", pattern, e)));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
