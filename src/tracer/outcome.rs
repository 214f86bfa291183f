//! Outcome tagging from structured results.

use serde_json::Value;
use std::fmt::Display;

use super::span::{Span, TagValue};

/// Result keys copied onto a span (matched case-insensitively).
pub const OUTCOME_KEYS: [&str; 5] = ["success", "http_code", "internal_code", "message", "msg"];

pub fn is_outcome_key(key: &str) -> bool {
    OUTCOME_KEYS.iter().any(|k| k.eq_ignore_ascii_case(key))
}

/// Copy recognized outcome keys of a JSON object onto `span`.
///
/// Keys keep their original spelling. Non-object values tag nothing.
/// Returns the number of tags written.
pub fn tag_outcome(span: &Span, result: &Value) -> usize {
    let Value::Object(map) = result else {
        return 0;
    };

    let mut written = 0;
    for (key, value) in map {
        if is_outcome_key(key) {
            span.set_tag(key.clone(), TagValue::from_json(value));
            written += 1;
        }
    }
    written
}

/// A value that knows how to describe itself on a span.
pub trait Outcome {
    fn record(&self, span: &Span);
}

impl Outcome for () {
    fn record(&self, _span: &Span) {}
}

impl Outcome for Value {
    fn record(&self, span: &Span) {
        tag_outcome(span, self);
    }
}

impl Outcome for String {
    fn record(&self, _span: &Span) {}
}

impl<T: Outcome> Outcome for Option<T> {
    fn record(&self, span: &Span) {
        if let Some(value) = self {
            value.record(span);
        }
    }
}

impl<T: Outcome, E: Display> Outcome for Result<T, E> {
    fn record(&self, span: &Span) {
        match self {
            Ok(value) => value.record(span),
            Err(e) => span.set_error(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracer::reporter::InMemoryReporter;
    use crate::tracer::Tracer;
    use serde_json::json;
    use std::sync::Arc;

    fn span() -> Span {
        Tracer::new("svc", Arc::new(InMemoryReporter::new())).start_span("op", None)
    }

    #[test]
    fn test_recognized_keys_only() {
        let span = span();
        let n = tag_outcome(
            &span,
            &json!({"HTTP_CODE": 201, "success": true, "Msg": "created", "data": [1]}),
        );
        assert_eq!(n, 3);
        assert_eq!(span.tag("HTTP_CODE"), Some(TagValue::Int(201)));
        assert_eq!(span.tag("success"), Some(TagValue::Bool(true)));
        assert_eq!(span.tag("Msg"), Some(TagValue::Str("created".into())));
        assert!(span.tag("data").is_none());
    }

    #[test]
    fn test_non_object_tags_nothing() {
        let span = span();
        assert_eq!(tag_outcome(&span, &json!([{"success": true}])), 0);
        assert_eq!(tag_outcome(&span, &json!("success")), 0);
        assert!(span.tags().is_empty());
    }

    #[test]
    fn test_result_error_is_tagged() {
        let span = span();
        let result: Result<Value, String> = Err("db down".into());
        result.record(&span);
        assert_eq!(span.tag("error"), Some(TagValue::Bool(true)));
        assert_eq!(
            span.tag("error.message"),
            Some(TagValue::Str("db down".into()))
        );
    }
}
