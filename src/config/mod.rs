//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → loader.rs (environment overrides: SERVICE_NAME, JAEGER_*, ...)
//!     → validation.rs (semantic checks)
//!     → InstrumentationConfig (validated, immutable)
//!     → owned by Telemetry, shared via Arc with plugins
//! ```
//!
//! # Design Decisions
//! - Config is read once at startup; plugins are installed from it exactly once
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - An invalid configuration is fatal: the service must not start

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{apply_env_overrides, from_env, load_config, load_config_with, ConfigError};
pub use schema::{
    FilterConfig, InstrumentationConfig, LogFormat, LoggingConfig, MetricsConfig, SamplerConfig,
    SamplerKind, TracingConfig,
};
pub use validation::{validate_config, ValidationError};
