//! Metric policies.
//!
//! - `track_in_progress`: in-flight gauge held for the duration of the handler
//! - `count_requests`: one increment after the handler, labeled with the observed status
//! - `time_requests`: wall-clock latency of the handler

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use super::{header_str, RouteState};

pub async fn track_in_progress(
    State(state): State<RouteState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(registry) = state.metrics() else {
        return next.run(request).await;
    };
    let _in_progress = registry.track_in_progress();
    next.run(request).await
}

pub async fn count_requests(
    State(state): State<RouteState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(registry) = state.metrics() else {
        return next.run(request).await;
    };

    let method = request.method().to_string();
    let user_header = &state.telemetry.config().metrics.user_header;
    let user = header_str(request.headers(), user_header).map(str::to_string);

    let response = next.run(request).await;

    registry.record_request(
        &method,
        &state.route,
        user.as_deref(),
        response.status().as_u16(),
    );
    response
}

pub async fn time_requests(
    State(state): State<RouteState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(registry) = state.metrics() else {
        return next.run(request).await;
    };
    let _timer = registry.start_timer(&state.route);
    next.run(request).await
}
