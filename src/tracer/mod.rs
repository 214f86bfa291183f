//! Distributed tracing client.
//!
//! # Data Flow
//! ```text
//! inbound headers
//!     → propagation.rs (extract parent context or None)
//!     → Tracer::start_span (explicit parent → active scope → new root)
//!     → scope.rs (span becomes active for the handler)
//!     → outbound calls: propagation.rs (inject active child span)
//!     → Span::finish → reporter.rs (best-effort delivery)
//! ```
//!
//! # Design Decisions
//! - The tracer is an explicit object owned by `Telemetry`, not a global
//! - Sampling is decided once on the root span and inherited via flags
//! - Reporting failures are logged, never returned to request handlers

pub mod outcome;
pub mod propagation;
pub mod reporter;
pub mod scope;
pub mod span;

pub use outcome::{tag_outcome, Outcome, OUTCOME_KEYS};
pub use reporter::{InMemoryReporter, LogReporter, ReportError, SpanReporter, UdpReporter};
pub use scope::{active_span, ScopeHandle, Scoped, SpanGuard};
pub use span::{tags, FinishedSpan, Span, SpanContext, SpanId, TagValue, Tags, TraceId};

use std::future::Future;
use std::sync::Arc;

use crate::config::{SamplerConfig, SamplerKind, TracingConfig};
use span::{SpanSink, FLAG_SAMPLED};

/// Root-span sampling decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sampler {
    Const(bool),
    Probabilistic(f64),
}

impl Sampler {
    pub fn from_config(config: &SamplerConfig) -> Self {
        match config.kind {
            SamplerKind::Const => Sampler::Const(config.param >= 1.0),
            SamplerKind::Probabilistic => Sampler::Probabilistic(config.param.clamp(0.0, 1.0)),
        }
    }

    fn sample(&self) -> bool {
        match *self {
            Sampler::Const(on) => on,
            Sampler::Probabilistic(rate) => rand::random::<f64>() < rate,
        }
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Sampler::Const(true)
    }
}

/// Creates spans for one service.
#[derive(Clone)]
pub struct Tracer {
    sink: Arc<SpanSink>,
    sampler: Sampler,
}

impl Tracer {
    /// Create a tracer that samples everything.
    pub fn new(service_name: impl Into<String>, reporter: Arc<dyn SpanReporter>) -> Self {
        let service_name: String = service_name.into();
        Self {
            sink: Arc::new(SpanSink {
                service_name: service_name.into(),
                reporter,
            }),
            sampler: Sampler::default(),
        }
    }

    /// Create a tracer reporting to the agent named in `config`.
    pub fn from_config(service_name: &str, config: &TracingConfig) -> std::io::Result<Self> {
        tracing::info!(
            service = %service_name,
            agent_host = %config.agent_host,
            agent_port = config.agent_port,
            "Creating tracer"
        );
        let reporter = UdpReporter::connect(&config.agent_host, config.agent_port)?;
        Ok(Self::new(service_name, Arc::new(reporter))
            .with_sampler(Sampler::from_config(&config.sampler)))
    }

    pub fn with_sampler(mut self, sampler: Sampler) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn service_name(&self) -> &str {
        &self.sink.service_name
    }

    /// Start a span without activating it.
    ///
    /// The parent is `parent` if given, else the active span of the calling
    /// context, else none (a new trace is started).
    pub fn start_span(&self, operation_name: &str, parent: Option<&SpanContext>) -> Span {
        let inherited = match parent {
            Some(ctx) => Some(ctx.clone()),
            None => active_span().map(|s| s.context().clone()),
        };

        let (context, parent_id) = match inherited {
            Some(parent) => {
                let context = SpanContext {
                    trace_id: parent.trace_id,
                    span_id: SpanId::generate(),
                    flags: parent.flags,
                    baggage: parent.baggage,
                };
                (context, Some(parent.span_id))
            }
            None => {
                let flags = if self.sampler.sample() { FLAG_SAMPLED } else { 0 };
                (SpanContext::new(TraceId::generate(), SpanId::generate(), flags), None)
            }
        };

        tracing::trace!(
            operation = %operation_name,
            trace_id = %context.trace_id,
            span_id = %context.span_id,
            root = parent_id.is_none(),
            "Span started"
        );

        Span::new(context, parent_id, operation_name.to_string(), self.sink.clone())
    }

    /// Start a span and make it the active span until the handle drops.
    pub fn start_active_span(&self, operation_name: &str, parent: Option<&SpanContext>) -> ScopeHandle {
        ScopeHandle::enter(self.start_span(operation_name, parent), true)
    }

    /// Run `future` with `span` active, closing the span when it completes.
    pub fn in_span<F: Future>(&self, span: Span, future: F) -> Scoped<F> {
        Scoped::owned(span, future)
    }

    pub fn flush(&self) {
        self.sink.reporter.flush();
    }
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer")
            .field("service_name", &self.service_name())
            .field("sampler", &self.sampler)
            .finish()
    }
}
