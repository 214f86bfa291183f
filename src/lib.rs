//! HTTP instrumentation middleware.
//!
//! Attaches distributed-tracing spans and request metrics to an axum
//! application, propagates trace context across process boundaries through
//! Jaeger headers, and builds its tracer client and metrics registry lazily.

pub mod config;
pub mod http;
pub mod instrument;
pub mod lazy;
pub mod observability;
pub mod telemetry;
pub mod tracer;

pub use config::schema::InstrumentationConfig;
pub use http::{App, MetricsPlugin, PlatformPlugin, TracedClient, TracingPlugin};
pub use instrument::{instrument, Instance, Instrumentable, Operations};
pub use lazy::LazySingleton;
pub use telemetry::{Telemetry, TelemetryError};
pub use tracer::Tracer;
