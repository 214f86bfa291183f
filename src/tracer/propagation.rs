//! Trace context propagation over HTTP headers.
//!
//! Uses the Jaeger header format so that spans link up with any existing
//! Jaeger-instrumented service:
//!
//! ```text
//! uber-trace-id: {trace-id}:{span-id}:{parent-span-id}:{flags}
//! uberctx-{key}: {baggage value}
//! ```
//!
//! Missing or malformed headers extract as `None`, which callers treat as
//! "start a new trace".

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};

use super::span::{tags, Span, SpanContext, SpanId, TagValue, Tags, TraceId};

pub const TRACE_ID_HEADER: &str = "uber-trace-id";
pub const BAGGAGE_HEADER_PREFIX: &str = "uberctx-";

/// Tag `span` as an outbound call and write its context into `headers`.
pub fn inject(span: &Span, method: &Method, url: &str, headers: &mut HeaderMap) {
    span.set_tag(tags::HTTP_METHOD, method.as_str());
    span.set_tag(tags::HTTP_URL, url);
    span.set_tag(tags::SPAN_KIND, tags::SPAN_KIND_CLIENT);

    inject_context(span.context(), headers);
}

/// Write a span context into `headers`.
pub fn inject_context(context: &SpanContext, headers: &mut HeaderMap) {
    match HeaderValue::from_str(&format_trace_header(context)) {
        Ok(value) => {
            headers.insert(HeaderName::from_static(TRACE_ID_HEADER), value);
        }
        Err(e) => tracing::warn!(error = %e, "Failed to encode trace header"),
    }

    for (key, value) in &context.baggage {
        let name = HeaderName::from_bytes(format!("{}{}", BAGGAGE_HEADER_PREFIX, key).as_bytes());
        match (name, HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::debug!(key = %key, "Skipping baggage item that is not a valid header"),
        }
    }
}

/// Read a span context from `headers`.
///
/// Returns the context (if any) and the tags an inbound span should carry.
pub fn extract(headers: &HeaderMap) -> (Option<SpanContext>, Tags) {
    let mut inferred = Tags::new();
    inferred.insert(
        tags::SPAN_KIND.to_string(),
        TagValue::from(tags::SPAN_KIND_SERVER),
    );

    let context = headers
        .get(TRACE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_trace_header)
        .map(|mut ctx| {
            for (name, value) in headers {
                let Some(key) = name.as_str().strip_prefix(BAGGAGE_HEADER_PREFIX) else {
                    continue;
                };
                if let Ok(value) = value.to_str() {
                    ctx.baggage.insert(key.to_string(), value.to_string());
                }
            }
            ctx
        });

    if context.is_none() && headers.contains_key(TRACE_ID_HEADER) {
        tracing::debug!("Ignoring malformed trace header");
    }

    (context, inferred)
}

/// Encode a context as an `uber-trace-id` value.
pub fn format_trace_header(context: &SpanContext) -> String {
    format!(
        "{}:{}:0:{:x}",
        context.trace_id, context.span_id, context.flags
    )
}

/// Decode an `uber-trace-id` value. URL-encoded separators are accepted.
pub fn parse_trace_header(value: &str) -> Option<SpanContext> {
    let value = value.trim().replace("%3A", ":").replace("%3a", ":");
    let mut parts = value.split(':');
    let (trace, span, parent, flags) = (parts.next()?, parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    let trace_id = TraceId::new(parse_hex(trace, 32)?)?;
    let span_id = SpanId::new(u64::try_from(parse_hex(span, 16)?).ok()?)?;
    // Parent ids are deprecated in the format but must still be well formed.
    parse_hex(parent, 16)?;
    let flags = u8::try_from(parse_hex(flags, 2)?).ok()?;

    Some(SpanContext::new(trace_id, span_id, flags))
}

fn parse_hex(field: &str, max_len: usize) -> Option<u128> {
    if field.is_empty() || field.len() > max_len || !field.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u128::from_str_radix(field, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracer::reporter::InMemoryReporter;
    use crate::tracer::Tracer;
    use std::sync::Arc;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_str(v).unwrap());
        }
        map
    }

    #[test]
    fn test_extract_without_headers_is_absent() {
        let (ctx, tags) = extract(&HeaderMap::new());
        assert!(ctx.is_none());
        assert_eq!(
            tags.get("span.kind"),
            Some(&TagValue::Str("server".into()))
        );
    }

    #[test]
    fn test_extract_ignores_unrelated_headers() {
        let (ctx, _) = extract(&headers(&[
            ("content-type", "application/json"),
            ("x-request-id", "abc"),
        ]));
        assert!(ctx.is_none());
    }

    #[test]
    fn test_extract_malformed_is_absent() {
        for bad in [
            "",
            "abc",
            "1:2:3",
            "1:2:3:4:5",
            "0:1:0:1",
            "1:0:0:1",
            "zz:1:0:1",
            "1:1:0:fff",
            "+1:1:0:1",
            "123456789012345678901234567890123:1:0:1",
            "1:12345678901234567:0:1",
        ] {
            let (ctx, _) = extract(&headers(&[(TRACE_ID_HEADER, bad)]));
            assert!(ctx.is_none(), "accepted malformed header {:?}", bad);
        }
    }

    #[test]
    fn test_extract_valid_header_with_baggage() {
        let (ctx, _) = extract(&headers(&[
            (TRACE_ID_HEADER, "4bf92f3577b34da6a3ce929d0e0e4736:00f067aa0ba902b7:0:1"),
            ("uberctx-tenant", "acme"),
        ]));
        let ctx = ctx.unwrap();
        assert_eq!(ctx.trace_id.value(), 0x4bf92f3577b34da6a3ce929d0e0e4736);
        assert_eq!(ctx.span_id.value(), 0x00f067aa0ba902b7);
        assert!(ctx.is_sampled());
        assert_eq!(ctx.baggage.get("tenant").map(String::as_str), Some("acme"));
    }

    #[test]
    fn test_extract_url_encoded_separators() {
        let (ctx, _) = extract(&headers(&[(TRACE_ID_HEADER, "abc%3Adef%3A0%3A1")]));
        let ctx = ctx.unwrap();
        assert_eq!(ctx.trace_id.to_string(), "abc");
        assert_eq!(ctx.span_id.to_string(), "def");
    }

    #[test]
    fn test_inject_tags_span_and_writes_headers() {
        let reporter = Arc::new(InMemoryReporter::new());
        let tracer = Tracer::new("svc", reporter);
        let parent = SpanContext::new(TraceId::generate(), SpanId::generate(), 1)
            .with_baggage_item("tenant", "acme");
        let span = tracer.start_span("call", Some(&parent));

        let mut map = HeaderMap::new();
        inject(&span, &Method::POST, "http://billing/charge", &mut map);

        assert_eq!(span.tag("http.method"), Some(TagValue::Str("POST".into())));
        assert_eq!(
            span.tag("http.url"),
            Some(TagValue::Str("http://billing/charge".into()))
        );
        assert_eq!(span.tag("span.kind"), Some(TagValue::Str("client".into())));

        let (ctx, _) = extract(&map);
        let ctx = ctx.unwrap();
        assert_eq!(ctx.trace_id, parent.trace_id);
        assert_eq!(ctx.span_id, span.span_id());
        assert_eq!(ctx.baggage.get("tenant").map(String::as_str), Some("acme"));
    }
}
