//! Shared utilities for integration tests.

#![allow(dead_code)]

use axum::{body::Body, http::Request, response::Response, Router};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceExt;

use octopus::config::InstrumentationConfig;
use octopus::tracer::InMemoryReporter;
use octopus::Telemetry;

/// Default configuration for a service called `orders`.
pub fn config() -> InstrumentationConfig {
    InstrumentationConfig {
        service_name: "orders".into(),
        ..Default::default()
    }
}

/// Telemetry whose finished spans land in the returned reporter.
pub fn telemetry(config: InstrumentationConfig) -> (Telemetry, Arc<InMemoryReporter>) {
    let reporter = Arc::new(InMemoryReporter::new());
    (Telemetry::with_reporter(config, reporter.clone()), reporter)
}

/// Drive one request through `router`.
pub async fn send(router: &Router, request: Request<Body>) -> Response {
    router.clone().oneshot(request).await.unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Serve `router` on an ephemeral local port.
pub async fn spawn_router(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}
