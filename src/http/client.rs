//! Traced outbound HTTP client.
//!
//! Requests sent while a span is active run inside a client child span, and
//! that child's context is written to the outgoing `uber-trace-id` header.
//! Without an active span the request goes out untouched.

use axum::http::{HeaderMap, Method};
use reqwest::{RequestBuilder, Response};
use serde::Serialize;
use std::time::Duration;

use crate::telemetry::Telemetry;
use crate::tracer::{active_span, propagation, tags, SpanGuard};

#[derive(Clone)]
pub struct TracedClient {
    inner: reqwest::Client,
    telemetry: Telemetry,
}

impl TracedClient {
    pub fn new(telemetry: Telemetry) -> Self {
        Self::with_client(reqwest::Client::new(), telemetry)
    }

    pub fn with_client(inner: reqwest::Client, telemetry: Telemetry) -> Self {
        Self { inner, telemetry }
    }

    pub fn request(&self, method: Method, url: &str) -> TracedRequest {
        TracedRequest {
            builder: self.inner.request(method.clone(), url),
            telemetry: self.telemetry.clone(),
            method,
            url: url.to_string(),
        }
    }

    pub fn get(&self, url: &str) -> TracedRequest {
        self.request(Method::GET, url)
    }

    pub fn post(&self, url: &str) -> TracedRequest {
        self.request(Method::POST, url)
    }

    pub fn put(&self, url: &str) -> TracedRequest {
        self.request(Method::PUT, url)
    }

    pub fn patch(&self, url: &str) -> TracedRequest {
        self.request(Method::PATCH, url)
    }

    pub fn delete(&self, url: &str) -> TracedRequest {
        self.request(Method::DELETE, url)
    }

    pub fn head(&self, url: &str) -> TracedRequest {
        self.request(Method::HEAD, url)
    }

    pub fn options(&self, url: &str) -> TracedRequest {
        self.request(Method::OPTIONS, url)
    }
}

impl std::fmt::Debug for TracedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TracedClient")
            .field("service_name", &self.telemetry.service_name())
            .finish()
    }
}

/// A pending outbound request.
pub struct TracedRequest {
    builder: RequestBuilder,
    telemetry: Telemetry,
    method: Method,
    url: String,
}

impl TracedRequest {
    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.builder = self.builder.header(key, value);
        self
    }

    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Self {
        self.builder = self.builder.json(body);
        self
    }

    pub fn body(mut self, body: impl Into<reqwest::Body>) -> Self {
        self.builder = self.builder.body(body);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.builder = self.builder.timeout(timeout);
        self
    }

    pub async fn send(self) -> reqwest::Result<Response> {
        let Some(parent) = active_span() else {
            return self.builder.send().await;
        };
        let tracer = match self.telemetry.tracer() {
            Ok(tracer) => tracer,
            Err(e) => {
                tracing::debug!(error = %e, url = %self.url, "Tracer unavailable, sending untraced");
                return self.builder.send().await;
            }
        };

        let span = tracer.start_span(&self.url, Some(parent.context()));
        let mut headers = HeaderMap::new();
        propagation::inject(&span, &self.method, &self.url, &mut headers);
        let guard = SpanGuard::new(span);

        let result = self.builder.headers(headers).send().await;
        match &result {
            Ok(response) => {
                let status = response.status();
                guard.span().set_tag(tags::HTTP_STATUS_CODE, status.as_u16());
                if status.is_server_error() {
                    guard.span().set_tag(tags::ERROR, true);
                }
            }
            Err(e) => guard.span().set_error(e),
        }
        result
    }
}
