//! Tracing policy for routes.
//!
//! Every request runs inside a span named `{METHOD} - {route}`. The parent is
//! taken from the inbound `uber-trace-id` header when it carries a valid
//! context; otherwise a new trace is started. The span stays active while the
//! handler runs, so outbound calls made by the handler become its children.

use axum::{
    body::{Body, Bytes, HttpBody},
    extract::{Request, State},
    http::header::CONTENT_TYPE,
    middleware::Next,
    response::Response,
};
use futures_util::stream;
use serde_json::Value;

use super::{header_str, RouteState};
use crate::tracer::{propagation, tag_outcome, tags, Scoped, Span, SpanGuard};

pub async fn trace_request(
    State(state): State<RouteState>,
    request: Request,
    next: Next,
) -> Response {
    let tracer = match state.telemetry.tracer() {
        Ok(tracer) => tracer,
        Err(e) => {
            tracing::warn!(route = %state.route, error = %e, "Tracer unavailable, request not traced");
            return next.run(request).await;
        }
    };
    let config = &state.telemetry.config().tracing;

    let (parent, inferred) = propagation::extract(request.headers());
    let method = request.method().clone();
    let span = tracer.start_span(&format!("{} - {}", method, state.route), parent.as_ref());

    for (key, value) in inferred {
        span.set_tag(key, value);
    }
    span.set_tag(tags::HTTP_METHOD, method.as_str());
    span.set_tag(tags::HTTP_URL, request.uri().path());
    if let Some(user) = header_str(request.headers(), &config.user_header) {
        span.set_tag(tags::USER, user);
    }

    tracing::debug!(
        route = %state.route,
        trace_id = %span.trace_id(),
        span_id = %span.span_id(),
        propagated = parent.is_some(),
        "Tracing request"
    );

    let guard = SpanGuard::new(span.clone());
    let response = Scoped::new(span, next.run(request)).await;

    let status = response.status();
    guard.span().set_tag(tags::HTTP_STATUS_CODE, status.as_u16());
    if status.is_server_error() {
        guard.span().set_tag(tags::ERROR, true);
    }

    tag_json_body(guard.span(), response, config.max_tagged_body_bytes).await
}

/// Copy outcome keys from a JSON response body onto `span`.
///
/// Bodies without a known size no larger than `limit` are passed through
/// untouched.
async fn tag_json_body(span: &Span, response: Response, limit: usize) -> Response {
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"));
    let fits = response
        .body()
        .size_hint()
        .upper()
        .is_some_and(|len| len <= limit as u64);

    if !is_json || !fits {
        return response;
    }

    let (parts, body) = response.into_parts();
    match axum::body::to_bytes(body, limit).await {
        Ok(bytes) => {
            if let Ok(value) = serde_json::from_slice::<Value>(&bytes) {
                tag_outcome(span, &value);
            }
            Response::from_parts(parts, Body::from(bytes))
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to buffer response body for tagging");
            span.set_error(&e);
            Response::from_parts(parts, failed_body(e))
        }
    }
}

/// Body that fails with `error` when read, so the server aborts the
/// response instead of completing it with an empty body.
fn failed_body(error: axum::Error) -> Body {
    Body::from_stream(stream::once(async move { Err::<Bytes, _>(error) }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracer::{InMemoryReporter, Tracer};
    use axum::http::{HeaderValue, StatusCode};
    use std::sync::Arc;

    fn span() -> Span {
        Tracer::new("orders", Arc::new(InMemoryReporter::new())).start_span("GET - /orders", None)
    }

    fn json_response(body: Body) -> Response {
        let mut response = Response::new(body);
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }

    #[tokio::test]
    async fn test_failed_body_surfaces_error_when_read() {
        let body = failed_body(axum::Error::new("connection reset"));
        let err = axum::body::to_bytes(body, usize::MAX).await.unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_json_body_is_tagged_and_preserved() {
        let span = span();
        let payload = r#"{"success":true,"items":[]}"#;
        let response = tag_json_body(&span, json_response(Body::from(payload)), 1024).await;

        assert_eq!(span.tag("success"), Some(true.into()));
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], payload.as_bytes());
    }

    #[tokio::test]
    async fn test_oversized_body_passes_through() {
        let span = span();
        let payload = r#"{"success":false,"padding":"xxxxxxxxxxxxxxxx"}"#;
        let response = tag_json_body(&span, json_response(Body::from(payload)), 8).await;

        assert!(span.tag("success").is_none());
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], payload.as_bytes());
    }
}
