//! Metrics exposition endpoint.
//!
//! Serves the Prometheus text format. When auth is enabled the request must
//! carry `Authorization: Bearer <token>` matching the configured token.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, MethodRouter},
    Json,
};
use serde_json::json;

use crate::config::MetricsConfig;
use crate::telemetry::Telemetry;

pub const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// GET route rendering the metrics of `telemetry`.
pub fn exposition_route(telemetry: Telemetry) -> MethodRouter {
    get(render_metrics).with_state(telemetry)
}

pub async fn render_metrics(State(telemetry): State<Telemetry>, headers: HeaderMap) -> Response {
    let config = &telemetry.config().metrics;
    if !is_authorized(config, &headers) {
        tracing::warn!("Rejected unauthorized metrics scrape");
        return unauthorized();
    }

    match telemetry.metrics() {
        Ok(registry) => (
            [(header::CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)],
            registry.render(),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Metrics registry unavailable");
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
        }
    }
}

fn is_authorized(config: &MetricsConfig, headers: &HeaderMap) -> bool {
    if !config.auth_enabled {
        return true;
    }
    let Some(token) = config.auth_token.as_deref().filter(|t| !t.is_empty()) else {
        return false;
    };

    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    match auth_header {
        Some(value) => value == format!("Bearer {}", token),
        None => false,
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"http_code": 401, "message": "unauthorized"})),
    )
        .into_response()
}
