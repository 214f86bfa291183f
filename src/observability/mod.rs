//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Instrumented handlers produce:
//!     → metrics.rs (counters, gauges, latency summaries)
//!     → logging.rs (structured log events about the instrumentation itself)
//!
//! Consumers:
//!     → Metrics endpoint (Prometheus scrape, see http::exposition)
//!     → Log aggregation (stdout)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON optional) for machine parsing
//! - Metrics are cheap (atomic increments)
//! - Spans live in the `tracer` module, not here

pub mod logging;
pub mod metrics;

pub use metrics::{MetricKind, MetricsRegistry, UPKEEP_INTERVAL};
