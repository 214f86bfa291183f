//! Per-route request middleware.
//!
//! Each function here is an axum `from_fn_with_state` middleware bound to one
//! route. The plugins in `http::plugin` attach them to every registered route.

pub mod metrics;
pub mod trace;

use axum::http::HeaderMap;
use std::sync::Arc;

use crate::observability::MetricsRegistry;
use crate::telemetry::Telemetry;

pub use self::metrics::{count_requests, time_requests, track_in_progress};
pub use trace::trace_request;

/// State shared by the middleware of one route.
#[derive(Clone)]
pub struct RouteState {
    pub telemetry: Telemetry,
    pub route: Arc<str>,
}

impl RouteState {
    pub fn new(telemetry: Telemetry, route: &str) -> Self {
        Self {
            telemetry,
            route: Arc::from(route),
        }
    }

    /// The metrics registry, or `None` (logged) if it cannot be built.
    fn metrics(&self) -> Option<Arc<MetricsRegistry>> {
        match self.telemetry.metrics() {
            Ok(registry) => Some(registry),
            Err(e) => {
                tracing::warn!(
                    route = %self.route,
                    error = %e,
                    "Metrics unavailable, request not measured"
                );
                None
            }
        }
    }
}

/// Value of header `name` if present and valid UTF-8.
fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    if name.is_empty() {
        return None;
    }
    headers.get(name).and_then(|v| v.to_str().ok())
}
