//! Shared instrumentation collaborators.
//!
//! `Telemetry` is the one object passed to every plugin and middleware. It
//! owns the configuration plus the lazily constructed tracer client and
//! metrics registry. Nothing is built until the first request needs it, and
//! each collaborator is built at most once per `Telemetry`.
//!
//! Lifecycle: construct at startup, optionally `warm_up` before serving,
//! clone freely, call `shutdown` before the process exits. Tests create a
//! fresh `Telemetry` per test.
//!
//! Building the UDP tracer resolves the agent address, which blocks. A failed
//! build is remembered for [`TRACER_RETRY_BACKOFF`], so an unreachable agent
//! costs one resolution per window rather than one per request.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::InstrumentationConfig;
use crate::instrument::{Instance, Instrumentable, OperationFilter};
use crate::lazy::LazySingleton;
use crate::observability::{MetricsRegistry, UPKEEP_INTERVAL};
use crate::tracer::{SpanReporter, Tracer};

/// How long a failed tracer build is reused before it is attempted again.
pub const TRACER_RETRY_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Error, Clone)]
pub enum TelemetryError {
    #[error("failed to initialise tracer: {0}")]
    Tracer(String),

    #[error("failed to initialise metrics registry: {0}")]
    Metrics(String),

    #[error("invalid instrumentation pattern: {0}")]
    Filter(String),
}

struct TelemetryInner {
    config: InstrumentationConfig,
    tracer: LazySingleton<Tracer, TelemetryError>,
    metrics: LazySingleton<MetricsRegistry, TelemetryError>,
}

/// Cheaply cloneable handle to the tracer and metrics registry.
#[derive(Clone)]
pub struct Telemetry {
    inner: Arc<TelemetryInner>,
}

impl Telemetry {
    /// Tracer reports to the UDP agent named in the configuration.
    pub fn new(config: InstrumentationConfig) -> Self {
        let service = config.service_name.clone();
        let tracing_config = config.tracing.clone();
        Self::build(config, move || {
            Tracer::from_config(&service, &tracing_config)
                .map_err(|e| TelemetryError::Tracer(e.to_string()))
        })
    }

    /// Tracer reports to the given reporter.
    pub fn with_reporter(config: InstrumentationConfig, reporter: Arc<dyn SpanReporter>) -> Self {
        let service = config.service_name.clone();
        let sampler = crate::tracer::Sampler::from_config(&config.tracing.sampler);
        Self::build(config, move || {
            Ok(Tracer::new(service.clone(), reporter.clone()).with_sampler(sampler))
        })
    }

    fn build<F>(config: InstrumentationConfig, tracer_factory: F) -> Self
    where
        F: Fn() -> Result<Tracer, TelemetryError> + Send + Sync + 'static,
    {
        let service = config.service_name.clone();
        let metrics = LazySingleton::new(move || {
            tracing::info!(service = %service, "Creating metrics registry");
            Ok(MetricsRegistry::new(service.clone()).with_upkeep(UPKEEP_INTERVAL))
        });
        let tracer = LazySingleton::new(tracer_factory).with_retry_backoff(TRACER_RETRY_BACKOFF);

        Self {
            inner: Arc::new(TelemetryInner {
                config,
                tracer,
                metrics,
            }),
        }
    }

    /// Build the enabled collaborators on the blocking pool.
    ///
    /// Call before serving so the first requests do not pay for agent
    /// resolution. Failures are logged; middleware degrades as usual.
    pub async fn warm_up(&self) {
        let config = &self.inner.config;
        if config.tracing.enabled {
            let telemetry = self.clone();
            match tokio::task::spawn_blocking(move || telemetry.tracer()).await {
                Ok(Ok(_)) => tracing::info!(service = %self.service_name(), "Tracer ready"),
                Ok(Err(e)) => tracing::warn!(error = %e, "Tracer unavailable at startup"),
                Err(e) => tracing::error!(error = %e, "Tracer warm-up task failed"),
            }
        }
        if config.metrics.enabled {
            if let Err(e) = self.metrics() {
                tracing::warn!(error = %e, "Metrics registry unavailable at startup");
            }
        }
    }

    pub fn config(&self) -> &InstrumentationConfig {
        &self.inner.config
    }

    pub fn service_name(&self) -> &str {
        &self.inner.config.service_name
    }

    /// The tracer client, created on first use.
    pub fn tracer(&self) -> Result<Arc<Tracer>, TelemetryError> {
        self.inner.tracer.get()
    }

    /// The metrics registry, created on first use.
    pub fn metrics(&self) -> Result<Arc<MetricsRegistry>, TelemetryError> {
        self.inner.metrics.get()
    }

    /// Wrap `target` with the tracing policy, honoring the configured
    /// inclusion / exclusion patterns and `omissions`.
    ///
    /// With tracing disabled, or when the tracer cannot be built, the instance
    /// is returned untraced. Only invalid patterns are an error.
    pub fn instrument<T: Instrumentable>(
        &self,
        target: T,
        omissions: &[&str],
    ) -> Result<Instance<T>, TelemetryError> {
        let mut instance = Instance::new(target);
        if !self.inner.config.tracing.enabled {
            return Ok(instance);
        }
        let filter = OperationFilter::from_config(&self.inner.config.instrumentation)
            .map_err(|e| TelemetryError::Filter(e.to_string()))?;
        match self.tracer() {
            Ok(tracer) => {
                instance.instrument_filtered(tracer, omissions, &filter);
            }
            Err(e) => {
                tracing::warn!(owner = %instance.owner(), error = %e, "Tracer unavailable, instance left untraced");
            }
        }
        Ok(instance)
    }

    /// Flush and release the collaborators that were created.
    pub fn shutdown(&self) {
        if let Some(tracer) = self.inner.tracer.take() {
            tracer.flush();
            tracing::info!(service = %tracer.service_name(), "Tracer shut down");
        }
        // Upkeep stops once the last handle to the registry drops.
        if self.inner.metrics.take().is_some() {
            tracing::debug!("Metrics registry released");
        }
    }
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry")
            .field("service_name", &self.service_name())
            .field("tracer", &self.inner.tracer)
            .field("metrics", &self.inner.metrics)
            .finish()
    }
}
