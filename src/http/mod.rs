//! HTTP instrumentation subsystem.
//!
//! # Data Flow
//! ```text
//! App::route / App::install
//!     → plugin.rs (compose installed plugins over every route)
//!     → middleware/ (tracing policy, metric policies per route)
//!     → handler
//!     → client.rs (outbound calls carry the active span's child context)
//!
//! Scrapes:
//!     → exposition.rs (/metrics, optional bearer auth)
//! ```

pub mod client;
pub mod exposition;
pub mod middleware;
pub mod plugin;

pub use client::{TracedClient, TracedRequest};
pub use exposition::exposition_route;
pub use plugin::{
    App, MetricsPlugin, PlatformPlugin, Plugin, PluginError, PluginKind, RouteContext,
    TracingPlugin,
};
