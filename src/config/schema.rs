//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! instrumentation layer. All types derive Serde traits for deserialization
//! from config files; environment overrides are applied on top by the loader.

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct InstrumentationConfig {
    /// Service name used to label spans and metrics.
    pub service_name: String,

    /// Distributed tracing settings.
    pub tracing: TracingConfig,

    /// Prometheus metrics settings.
    pub metrics: MetricsConfig,

    /// Which operations of instrumented instances get traced.
    pub instrumentation: FilterConfig,

    /// Log output settings.
    pub logging: LoggingConfig,
}

/// Tracing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TracingConfig {
    /// Enable route tracing.
    pub enabled: bool,

    /// Tracing agent host.
    pub agent_host: String,

    /// Tracing agent UDP port.
    pub agent_port: u16,

    /// Root span sampling.
    pub sampler: SamplerConfig,

    /// Header carrying the authenticated user id.
    pub user_header: String,

    /// Largest JSON response body inspected for outcome tags.
    pub max_tagged_body_bytes: usize,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            agent_host: "localhost".to_string(),
            agent_port: 6831,
            sampler: SamplerConfig::default(),
            user_header: "x-authenticated-userid".to_string(),
            max_tagged_body_bytes: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SamplerKind {
    /// Sample everything (param >= 1) or nothing.
    Const,
    /// Sample a fraction `param` of root spans.
    Probabilistic,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SamplerConfig {
    #[serde(rename = "type")]
    pub kind: SamplerKind,
    pub param: f64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            kind: SamplerKind::Const,
            param: 1.0,
        }
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable request metrics and the exposition route.
    pub enabled: bool,

    /// Path of the exposition route.
    pub path: String,

    /// Require a bearer token on the exposition route.
    pub auth_enabled: bool,

    /// Expected bearer token.
    pub auth_token: Option<String>,

    /// Metric kinds applied to each route, in order.
    /// Known kinds: `latency`, `request_count`, `processing_requests`.
    pub metrics: Vec<String>,

    /// Header carrying the authenticated user id.
    pub user_header: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/metrics".to_string(),
            auth_enabled: false,
            auth_token: None,
            metrics: vec![
                "latency".to_string(),
                "request_count".to_string(),
                "processing_requests".to_string(),
            ],
            user_header: "x-authenticated-userid".to_string(),
        }
    }
}

/// Operation name filters (regular expressions).
///
/// When inclusion patterns are present they take precedence and exclusion
/// patterns are ignored.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct FilterConfig {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,

    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}
