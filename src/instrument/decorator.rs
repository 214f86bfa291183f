//! Tracing policy for a single callable.
//!
//! A `TracedOperation` runs a closure or future inside a span named
//! `{owner} - {operation}`. The span's parent is the active span of the
//! caller, if any. The callable's return value passes through unchanged after
//! being recorded on the span.

use std::future::Future;
use std::sync::Arc;
use std::time::SystemTime;

use crate::tracer::span::epoch_micros;
use crate::tracer::{tags, Outcome, Scoped, Span, SpanGuard, Tracer};

/// Span name for an operation owned by `owner`.
pub fn operation_name(owner: &str, operation: &str) -> String {
    format!("{} - {}", owner, operation)
}

/// A callable bound to a span name.
#[derive(Clone)]
pub struct TracedOperation {
    tracer: Arc<Tracer>,
    name: String,
}

impl TracedOperation {
    pub fn new(tracer: Arc<Tracer>, owner: &str, operation: &str) -> Self {
        Self {
            tracer,
            name: operation_name(owner, operation),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `f` inside an active span.
    ///
    /// The span closes on every exit path. A panic inside `f` tags it as an
    /// error before unwinding continues.
    pub fn call<R, F>(&self, f: F) -> R
    where
        R: Outcome,
        F: FnOnce() -> R,
    {
        let scope = self.tracer.start_active_span(&self.name, None);
        mark_start(scope.span());

        let result = f();

        mark_finish(scope.span());
        result.record(scope.span());
        result
    }

    /// Await `future` with a span active on every poll.
    pub async fn call_async<R, Fut>(&self, future: Fut) -> R
    where
        R: Outcome,
        Fut: Future<Output = R>,
    {
        let guard = SpanGuard::new(self.tracer.start_span(&self.name, None));
        mark_start(guard.span());

        let result = Scoped::new(guard.span().clone(), future).await;

        mark_finish(guard.span());
        result.record(guard.span());
        result
    }
}

impl std::fmt::Debug for TracedOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TracedOperation")
            .field("name", &self.name)
            .finish()
    }
}

fn mark_start(span: &Span) {
    span.set_tag(tags::START_TIMESTAMP, epoch_micros(SystemTime::now()));
}

fn mark_finish(span: &Span) {
    span.set_tag(tags::FINISH_TIMESTAMP, epoch_micros(SystemTime::now()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracer::{active_span, InMemoryReporter, TagValue};
    use serde_json::json;

    fn tracer() -> (Arc<Tracer>, Arc<InMemoryReporter>) {
        let reporter = Arc::new(InMemoryReporter::new());
        (Arc::new(Tracer::new("svc", reporter.clone())), reporter)
    }

    #[test]
    fn test_sync_call_records_outcome() {
        let (tracer, reporter) = tracer();
        let op = TracedOperation::new(tracer, "Orders", "create");

        let result = op.call(|| json!({"success": true, "http_code": 201, "id": 7}));
        assert_eq!(result["id"], 7);

        let span = reporter.find("Orders - create").unwrap();
        assert_eq!(span.tags.get("success"), Some(&TagValue::Bool(true)));
        assert_eq!(span.tags.get("http_code"), Some(&TagValue::Int(201)));
        assert!(span.tags.contains_key(tags::START_TIMESTAMP));
        assert!(span.tags.contains_key(tags::FINISH_TIMESTAMP));
    }

    #[test]
    fn test_error_passes_through_and_tags_span() {
        let (tracer, reporter) = tracer();
        let op = TracedOperation::new(tracer, "Orders", "cancel");

        let result: Result<(), String> = op.call(|| Err("not found".to_string()));
        assert_eq!(result, Err("not found".to_string()));

        let span = reporter.find("Orders - cancel").unwrap();
        assert_eq!(span.tags.get(tags::ERROR), Some(&TagValue::Bool(true)));
    }

    #[test]
    fn test_nested_calls_link_parent() {
        let (tracer, reporter) = tracer();
        let outer = TracedOperation::new(tracer.clone(), "Orders", "outer");
        let inner = TracedOperation::new(tracer, "Orders", "inner");

        outer.call(|| inner.call(|| ()));

        let outer_span = reporter.find("Orders - outer").unwrap();
        let inner_span = reporter.find("Orders - inner").unwrap();
        assert_eq!(inner_span.parent_id, Some(outer_span.span_id));
        assert!(active_span().is_none());
    }

    #[tokio::test]
    async fn test_async_call_keeps_span_active() {
        let (tracer, reporter) = tracer();
        let op = TracedOperation::new(tracer, "Orders", "fetch");

        let seen = op
            .call_async(async {
                tokio::task::yield_now().await;
                active_span().map(|s| s.operation_name().to_string())
            })
            .await;

        assert_eq!(seen.as_deref(), Some("Orders - fetch"));
        assert!(reporter.find("Orders - fetch").is_some());
    }
}
