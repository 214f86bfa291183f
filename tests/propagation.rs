//! Trace context across inbound requests and outbound calls.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

use octopus::http::{App, TracedClient, TracingPlugin};
use octopus::tracer::propagation::{format_trace_header, parse_trace_header, TRACE_ID_HEADER};
use octopus::tracer::{tags, SpanContext, SpanId, TagValue, TraceId};

mod common;

fn parent_context() -> SpanContext {
    SpanContext::new(
        TraceId::new(0x4bf9_2f35_77b3_4da6).unwrap(),
        SpanId::new(0x00f0_67aa_0ba9_02b7).unwrap(),
        1,
    )
}

fn traced_orders() -> (Router, Arc<octopus::tracer::InMemoryReporter>) {
    let (telemetry, reporter) = common::telemetry(common::config());
    let mut app = App::new(telemetry);
    app.route(
        "/orders",
        get(|| async { Json(json!({"http_code": 200, "success": true, "items": []})) }),
    );
    app.route(
        "/broken",
        get(|| async { (StatusCode::BAD_GATEWAY, Json(json!({"success": false}))) }),
    );
    app.install(TracingPlugin).unwrap();
    (app.into_router(), reporter)
}

#[tokio::test]
async fn test_propagated_parent_becomes_span_parent() {
    let (router, reporter) = traced_orders();
    let parent = parent_context();

    let request = Request::builder()
        .uri("/orders")
        .header(TRACE_ID_HEADER, format_trace_header(&parent))
        .body(Body::empty())
        .unwrap();
    let response = common::send(&router, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    // The body survives outcome tagging.
    assert_eq!(common::body_json(response).await["items"], json!([]));

    let span = reporter.find("GET - /orders").unwrap();
    assert_eq!(span.trace_id, parent.trace_id);
    assert_eq!(span.parent_id, Some(parent.span_id));
    assert_ne!(span.span_id, parent.span_id);
    assert_eq!(span.tags.get("http_code"), Some(&TagValue::Int(200)));
    assert_eq!(span.tags.get("success"), Some(&TagValue::Bool(true)));
    assert_eq!(span.tags.get(tags::HTTP_METHOD), Some(&TagValue::from("GET")));
    assert_eq!(span.tags.get(tags::HTTP_URL), Some(&TagValue::from("/orders")));
    assert_eq!(span.tags.get(tags::HTTP_STATUS_CODE), Some(&TagValue::Int(200)));
    assert_eq!(span.tags.get(tags::SPAN_KIND), Some(&TagValue::from("server")));
}

#[tokio::test]
async fn test_no_headers_starts_root_span() {
    let (router, reporter) = traced_orders();
    common::send(&router, common::get("/orders")).await;

    let span = reporter.find("GET - /orders").unwrap();
    assert!(span.parent_id.is_none());
    assert_eq!(span.service_name, "orders");
}

#[tokio::test]
async fn test_malformed_header_starts_root_span() {
    let (router, reporter) = traced_orders();
    let request = Request::builder()
        .uri("/orders")
        .header(TRACE_ID_HEADER, "0:0:0:1")
        .body(Body::empty())
        .unwrap();
    let response = common::send(&router, request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let span = reporter.find("GET - /orders").unwrap();
    assert!(span.parent_id.is_none());
}

#[tokio::test]
async fn test_server_errors_are_tagged() {
    let (router, reporter) = traced_orders();
    let response = common::send(&router, common::get("/broken")).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let span = reporter.find("GET - /broken").unwrap();
    assert_eq!(span.tags.get(tags::ERROR), Some(&TagValue::Bool(true)));
    assert_eq!(span.tags.get("success"), Some(&TagValue::Bool(false)));
}

#[tokio::test]
async fn test_authenticated_user_is_tagged() {
    let (router, reporter) = traced_orders();
    let request = Request::builder()
        .uri("/orders")
        .header("X-Authenticated-Userid", "u-7")
        .body(Body::empty())
        .unwrap();
    common::send(&router, request).await;

    let span = reporter.find("GET - /orders").unwrap();
    assert_eq!(span.tags.get(tags::USER), Some(&TagValue::from("u-7")));
}

#[derive(Clone)]
struct Downstream {
    client: TracedClient,
    url: String,
}

#[tokio::test]
async fn test_outbound_call_carries_new_child_span() {
    // Downstream service records the trace header it receives.
    let seen: Arc<Mutex<Option<String>>> = Arc::default();
    let recorder = seen.clone();
    let downstream = Router::new().route(
        "/inventory",
        get(move |headers: HeaderMap| {
            let recorder = recorder.clone();
            async move {
                let value = headers
                    .get(TRACE_ID_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                *recorder.lock().unwrap() = value;
                Json(json!({"success": true}))
            }
        }),
    );
    let addr = common::spawn_router(downstream).await;

    let (telemetry, reporter) = common::telemetry(common::config());
    let state = Downstream {
        client: TracedClient::new(telemetry.clone()),
        url: format!("http://{}/inventory", addr),
    };
    let mut app = App::new(telemetry);
    app.route(
        "/checkout",
        get(|State(state): State<Downstream>| async move {
            let response = state.client.get(&state.url).send().await.unwrap();
            let body: Value = response.json().await.unwrap();
            Json(json!({"http_code": 200, "success": body["success"]}))
        })
        .with_state(state.clone()),
    );
    app.install(TracingPlugin).unwrap();
    let router = app.into_router();

    let parent = parent_context();
    let request = Request::builder()
        .uri("/checkout")
        .header(TRACE_ID_HEADER, format_trace_header(&parent))
        .body(Body::empty())
        .unwrap();
    let response = common::send(&router, request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let header = seen.lock().unwrap().clone().expect("trace header forwarded");
    let forwarded = parse_trace_header(&header).unwrap();

    let server_span = reporter.find("GET - /checkout").unwrap();
    let client_span = reporter.find(&state.url).unwrap();

    assert_eq!(forwarded.trace_id, parent.trace_id);
    assert_eq!(forwarded.span_id, client_span.span_id);
    assert_ne!(forwarded.span_id, parent.span_id);
    assert_ne!(forwarded.span_id, server_span.span_id);
    assert_eq!(client_span.parent_id, Some(server_span.span_id));
    assert_eq!(client_span.tags.get(tags::SPAN_KIND), Some(&TagValue::from("client")));
    assert_eq!(client_span.tags.get(tags::HTTP_STATUS_CODE), Some(&TagValue::Int(200)));
}

#[tokio::test]
async fn test_outbound_call_without_active_span_is_untraced() {
    let seen: Arc<Mutex<Option<bool>>> = Arc::default();
    let recorder = seen.clone();
    let downstream = Router::new().route(
        "/ping",
        get(move |headers: HeaderMap| {
            let recorder = recorder.clone();
            async move {
                *recorder.lock().unwrap() = Some(headers.contains_key(TRACE_ID_HEADER));
                "pong"
            }
        }),
    );
    let addr = common::spawn_router(downstream).await;

    let (telemetry, reporter) = common::telemetry(common::config());
    let client = TracedClient::new(telemetry);
    let response = client
        .get(&format!("http://{}/ping", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(*seen.lock().unwrap(), Some(false));
    assert!(reporter.spans().is_empty());
}
