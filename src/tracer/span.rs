//! Span and trace context model.

use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use super::reporter::SpanReporter;

/// Well-known tag keys (OpenTracing semantic conventions).
pub mod tags {
    pub const HTTP_METHOD: &str = "http.method";
    pub const HTTP_URL: &str = "http.url";
    pub const HTTP_STATUS_CODE: &str = "http.status_code";
    pub const SPAN_KIND: &str = "span.kind";
    pub const SPAN_KIND_CLIENT: &str = "client";
    pub const SPAN_KIND_SERVER: &str = "server";
    pub const ERROR: &str = "error";
    pub const ERROR_MESSAGE: &str = "error.message";
    pub const USER: &str = "user";
    pub const START_TIMESTAMP: &str = "start_timestamp";
    pub const FINISH_TIMESTAMP: &str = "finish_timestamp";
}

/// Sampled bit of the propagated flags.
pub const FLAG_SAMPLED: u8 = 0x01;

/// 128-bit trace identifier. Zero is never a valid id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId(u128);

impl TraceId {
    pub fn new(value: u128) -> Option<Self> {
        (value != 0).then_some(Self(value))
    }

    pub fn generate() -> Self {
        loop {
            let value: u128 = rand::random();
            if value != 0 {
                return Self(value);
            }
        }
    }

    pub fn value(&self) -> u128 {
        self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl Serialize for TraceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// 64-bit span identifier. Zero is never a valid id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId(u64);

impl SpanId {
    pub fn new(value: u64) -> Option<Self> {
        (value != 0).then_some(Self(value))
    }

    pub fn generate() -> Self {
        loop {
            let value: u64 = rand::random();
            if value != 0 {
                return Self(value);
            }
        }
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl Serialize for SpanId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Cross-process identity of a span.
///
/// Only ever constructed from valid ids, so an absent context is expressed
/// as `Option<SpanContext>` rather than a zeroed value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub flags: u8,
    pub baggage: BTreeMap<String, String>,
}

impl SpanContext {
    pub fn new(trace_id: TraceId, span_id: SpanId, flags: u8) -> Self {
        Self {
            trace_id,
            span_id,
            flags,
            baggage: BTreeMap::new(),
        }
    }

    pub fn is_sampled(&self) -> bool {
        self.flags & FLAG_SAMPLED != 0
    }

    pub fn with_baggage_item(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.baggage.insert(key.into(), value.into());
        self
    }
}

/// Scalar tag value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TagValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl TagValue {
    /// Convert a JSON value, stringifying anything that is not a scalar.
    pub fn from_json(value: &serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Bool(b) => TagValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => TagValue::Int(i),
                None => TagValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => TagValue::Str(s.clone()),
            other => TagValue::Str(other.to_string()),
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Bool(b) => write!(f, "{}", b),
            TagValue::Int(i) => write!(f, "{}", i),
            TagValue::Float(x) => write!(f, "{}", x),
            TagValue::Str(s) => f.write_str(s),
        }
    }
}

impl From<bool> for TagValue {
    fn from(v: bool) -> Self {
        TagValue::Bool(v)
    }
}

impl From<i64> for TagValue {
    fn from(v: i64) -> Self {
        TagValue::Int(v)
    }
}

impl From<i32> for TagValue {
    fn from(v: i32) -> Self {
        TagValue::Int(v.into())
    }
}

impl From<u16> for TagValue {
    fn from(v: u16) -> Self {
        TagValue::Int(v.into())
    }
}

impl From<u64> for TagValue {
    fn from(v: u64) -> Self {
        i64::try_from(v)
            .map(TagValue::Int)
            .unwrap_or_else(|_| TagValue::Str(v.to_string()))
    }
}

impl From<f64> for TagValue {
    fn from(v: f64) -> Self {
        TagValue::Float(v)
    }
}

impl From<&str> for TagValue {
    fn from(v: &str) -> Self {
        TagValue::Str(v.to_string())
    }
}

impl From<String> for TagValue {
    fn from(v: String) -> Self {
        TagValue::Str(v)
    }
}

pub type Tags = BTreeMap<String, TagValue>;

/// Record handed to a reporter once a span closes.
#[derive(Debug, Clone, Serialize)]
pub struct FinishedSpan {
    pub service_name: String,
    pub operation_name: String,
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_id: Option<SpanId>,
    pub start_micros: u64,
    pub duration_micros: u64,
    pub tags: Tags,
}

/// Where finished spans go.
pub(crate) struct SpanSink {
    pub(crate) service_name: Arc<str>,
    pub(crate) reporter: Arc<dyn SpanReporter>,
}

impl SpanSink {
    fn submit(&self, span: FinishedSpan) {
        let span_id = span.span_id;
        if let Err(e) = self.reporter.report(span) {
            tracing::warn!(span_id = %span_id, error = %e, "Failed to report span");
        }
    }
}

struct SpanInner {
    context: SpanContext,
    parent_id: Option<SpanId>,
    operation_name: String,
    start_time: SystemTime,
    started: Instant,
    tags: Mutex<Tags>,
    finished: AtomicBool,
    sink: Arc<SpanSink>,
}

/// A named, timed operation. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Span {
    inner: Arc<SpanInner>,
}

impl Span {
    pub(crate) fn new(
        context: SpanContext,
        parent_id: Option<SpanId>,
        operation_name: String,
        sink: Arc<SpanSink>,
    ) -> Self {
        Self {
            inner: Arc::new(SpanInner {
                context,
                parent_id,
                operation_name,
                start_time: SystemTime::now(),
                started: Instant::now(),
                tags: Mutex::new(Tags::new()),
                finished: AtomicBool::new(false),
                sink,
            }),
        }
    }

    pub fn context(&self) -> &SpanContext {
        &self.inner.context
    }

    pub fn trace_id(&self) -> TraceId {
        self.inner.context.trace_id
    }

    pub fn span_id(&self) -> SpanId {
        self.inner.context.span_id
    }

    pub fn parent_id(&self) -> Option<SpanId> {
        self.inner.parent_id
    }

    pub fn operation_name(&self) -> &str {
        &self.inner.operation_name
    }

    /// Set a tag. Ignored once the span has finished.
    pub fn set_tag(&self, key: impl Into<String>, value: impl Into<TagValue>) {
        if self.is_finished() {
            return;
        }
        self.lock_tags().insert(key.into(), value.into());
    }

    pub fn tag(&self, key: &str) -> Option<TagValue> {
        self.lock_tags().get(key).cloned()
    }

    pub fn tags(&self) -> Tags {
        self.lock_tags().clone()
    }

    /// Mark the span as failed.
    pub fn set_error(&self, message: impl fmt::Display) {
        self.set_tag(tags::ERROR, true);
        self.set_tag(tags::ERROR_MESSAGE, message.to_string());
    }

    pub fn is_finished(&self) -> bool {
        self.inner.finished.load(Ordering::Acquire)
    }

    pub fn elapsed(&self) -> Duration {
        self.inner.started.elapsed()
    }

    /// Close the span and report it. Returns false if it was already closed.
    pub fn finish(&self) -> bool {
        if self.inner.finished.swap(true, Ordering::AcqRel) {
            return false;
        }

        if !self.inner.context.is_sampled() {
            return true;
        }

        let record = FinishedSpan {
            service_name: self.inner.sink.service_name.to_string(),
            operation_name: self.inner.operation_name.clone(),
            trace_id: self.trace_id(),
            span_id: self.span_id(),
            parent_id: self.inner.parent_id,
            start_micros: epoch_micros(self.inner.start_time),
            duration_micros: u64::try_from(self.elapsed().as_micros()).unwrap_or(u64::MAX),
            tags: self.tags(),
        };
        self.inner.sink.submit(record);
        true
    }

    fn lock_tags(&self) -> std::sync::MutexGuard<'_, Tags> {
        self.inner.tags.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Span")
            .field("operation_name", &self.inner.operation_name)
            .field("trace_id", &self.inner.context.trace_id)
            .field("span_id", &self.inner.context.span_id)
            .field("parent_id", &self.inner.parent_id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Microseconds since the Unix epoch.
pub fn epoch_micros(time: SystemTime) -> u64 {
    let micros = time
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros();
    u64::try_from(micros).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracer::reporter::InMemoryReporter;

    fn test_span(flags: u8) -> (Span, Arc<InMemoryReporter>) {
        let reporter = Arc::new(InMemoryReporter::new());
        let sink = Arc::new(SpanSink {
            service_name: "svc".into(),
            reporter: reporter.clone(),
        });
        let ctx = SpanContext::new(TraceId::generate(), SpanId::generate(), flags);
        (Span::new(ctx, None, "op".into(), sink), reporter)
    }

    #[test]
    fn test_zero_ids_are_rejected() {
        assert!(TraceId::new(0).is_none());
        assert!(SpanId::new(0).is_none());
        assert_eq!(TraceId::new(0xabc).unwrap().to_string(), "abc");
    }

    #[test]
    fn test_finish_reports_exactly_once() {
        let (span, reporter) = test_span(FLAG_SAMPLED);
        span.set_tag("http_code", 200u16);

        assert!(span.finish());
        assert!(!span.finish());

        let spans = reporter.spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].tags.get("http_code"), Some(&TagValue::Int(200)));
        assert_eq!(spans[0].service_name, "svc");
    }

    #[test]
    fn test_tags_frozen_after_finish() {
        let (span, _) = test_span(FLAG_SAMPLED);
        span.finish();
        span.set_tag("late", true);
        assert!(span.tag("late").is_none());
    }

    #[test]
    fn test_unsampled_span_not_reported() {
        let (span, reporter) = test_span(0);
        assert!(span.finish());
        assert!(reporter.spans().is_empty());
    }

    #[test]
    fn test_tag_value_from_json() {
        use serde_json::json;
        assert_eq!(TagValue::from_json(&json!(true)), TagValue::Bool(true));
        assert_eq!(TagValue::from_json(&json!(404)), TagValue::Int(404));
        assert_eq!(TagValue::from_json(&json!(1.5)), TagValue::Float(1.5));
        assert_eq!(TagValue::from_json(&json!("ok")), TagValue::Str("ok".into()));
        assert_eq!(
            TagValue::from_json(&json!([1, 2])),
            TagValue::Str("[1,2]".into())
        );
    }
}
