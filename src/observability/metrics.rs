//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define request metrics (in-flight, count, latency)
//! - Render them in the Prometheus text format
//! - Map configured metric names to metric kinds
//!
//! # Metrics
//! - `inprogress_requests` (gauge): requests currently being processed, by service
//! - `http_requests_total` (counter): requests by method, route, service, user, status
//! - `http_request_latency_seconds` (summary): latency by route, service
//!
//! # Design Decisions
//! - Each registry owns its own recorder instead of installing a global one,
//!   so tests get a fresh registry each
//! - Updates go through atomic metric handles; no read-modify-write
//! - Gauge and latency updates are scoped guards that record on drop
//! - Latency samples are buffered by the recorder until upkeep drains them;
//!   a registry built inside a tokio runtime runs upkeep on an interval

use metrics::{Counter, Gauge, Histogram, Key, Label, Level, Metadata, Recorder, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

pub const IN_PROGRESS: &str = "inprogress_requests";
pub const REQUEST_COUNT: &str = "http_requests_total";
pub const REQUEST_LATENCY: &str = "http_request_latency_seconds";

/// Label value used when a request carries no user id.
pub const NO_USER: &str = "none";

/// How often buffered histogram samples are drained.
pub const UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

/// A metric policy that can be applied to a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Latency,
    RequestCount,
    ProcessingRequests,
}

impl MetricKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim() {
            "latency" => Some(MetricKind::Latency),
            "request_count" => Some(MetricKind::RequestCount),
            "processing_requests" => Some(MetricKind::ProcessingRequests),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Latency => "latency",
            MetricKind::RequestCount => "request_count",
            MetricKind::ProcessingRequests => "processing_requests",
        }
    }

    /// Resolve configured names in order, skipping unknown ones with a warning.
    pub fn resolve(names: &[String]) -> Vec<MetricKind> {
        names
            .iter()
            .filter_map(|name| {
                let kind = MetricKind::parse(name);
                if kind.is_none() {
                    tracing::warn!(metric = %name, "Undefined metric mapping, skipping");
                }
                kind
            })
            .collect()
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-wide request metrics for one service.
pub struct MetricsRegistry {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
    service_name: String,
    upkeep: Option<JoinHandle<()>>,
}

impl MetricsRegistry {
    pub fn new(service_name: impl Into<String>) -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        recorder.describe_gauge(
            IN_PROGRESS.into(),
            Some(Unit::Count),
            "number of requests currently being processed".into(),
        );
        recorder.describe_counter(
            REQUEST_COUNT.into(),
            Some(Unit::Count),
            "total number of incoming requests".into(),
        );
        recorder.describe_histogram(
            REQUEST_LATENCY.into(),
            Some(Unit::Seconds),
            "request latency".into(),
        );

        Self {
            recorder,
            handle,
            service_name: service_name.into(),
            upkeep: None,
        }
    }

    /// Run upkeep every `every` on the current tokio runtime.
    ///
    /// Outside a runtime no task is started and upkeep only happens through
    /// [`MetricsRegistry::run_upkeep`]. The task is aborted when the registry
    /// drops.
    pub fn with_upkeep(mut self, every: Duration) -> Self {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(service = %self.service_name, "No tokio runtime, metrics upkeep not scheduled");
            return self;
        };

        let handle = self.handle.clone();
        if let Some(previous) = self.upkeep.take() {
            previous.abort();
        }
        self.upkeep = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                handle.run_upkeep();
            }
        }));
        tracing::debug!(service = %self.service_name, interval = ?every, "Metrics upkeep scheduled");
        self
    }

    /// Drain buffered histogram samples into their summaries.
    pub fn run_upkeep(&self) {
        self.handle.run_upkeep();
    }

    pub fn upkeep_scheduled(&self) -> bool {
        self.upkeep.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Render every metric in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Increment the in-flight gauge until the guard drops.
    pub fn track_in_progress(&self) -> InProgressGuard {
        let gauge = self.gauge(IN_PROGRESS, vec![self.service_label()]);
        gauge.increment(1.0);
        InProgressGuard { gauge }
    }

    /// Count one completed request.
    pub fn record_request(&self, method: &str, route: &str, user: Option<&str>, status: u16) {
        let labels = vec![
            Label::new("method", method.to_string()),
            Label::new("route", route.to_string()),
            self.service_label(),
            Label::new("user", user.unwrap_or(NO_USER).to_string()),
            Label::new("status", status.to_string()),
        ];
        self.counter(REQUEST_COUNT, labels).increment(1);
    }

    /// Start timing a request; the elapsed time is recorded when the timer drops.
    pub fn start_timer(&self, route: &str) -> LatencyTimer {
        let histogram = self.histogram(
            REQUEST_LATENCY,
            vec![Label::new("route", route.to_string()), self.service_label()],
        );
        LatencyTimer {
            histogram,
            started: Instant::now(),
        }
    }

    /// Read one sample back from the rendered output.
    ///
    /// Matches the first series of `name` carrying every `labels` pair.
    pub fn read_sample(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        find_sample(&self.render(), name, labels)
    }

    fn service_label(&self) -> Label {
        Label::new("service", self.service_name.clone())
    }

    fn counter(&self, name: &'static str, labels: Vec<Label>) -> Counter {
        self.recorder
            .register_counter(&Key::from_parts(name, labels), &metadata())
    }

    fn gauge(&self, name: &'static str, labels: Vec<Label>) -> Gauge {
        self.recorder
            .register_gauge(&Key::from_parts(name, labels), &metadata())
    }

    fn histogram(&self, name: &'static str, labels: Vec<Label>) -> Histogram {
        self.recorder
            .register_histogram(&Key::from_parts(name, labels), &metadata())
    }
}

impl Drop for MetricsRegistry {
    fn drop(&mut self) {
        if let Some(task) = self.upkeep.take() {
            task.abort();
        }
    }
}

impl fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("service_name", &self.service_name)
            .field("upkeep_scheduled", &self.upkeep_scheduled())
            .finish()
    }
}

fn metadata() -> Metadata<'static> {
    Metadata::new(module_path!(), Level::INFO, Some(module_path!()))
}

/// Find a sample value in Prometheus text output.
pub fn find_sample(rendered: &str, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
    rendered
        .lines()
        .filter(|line| !line.starts_with('#'))
        .find(|line| {
            let Some(rest) = line.strip_prefix(name) else {
                return false;
            };
            if !(rest.starts_with('{') || rest.starts_with(' ')) {
                return false;
            }
            labels
                .iter()
                .all(|(k, v)| rest.contains(&format!("{}=\"{}\"", k, v)))
        })
        .and_then(|line| line.rsplit(' ').next())
        .and_then(|value| value.parse().ok())
}

/// Holds one unit of the in-flight gauge.
pub struct InProgressGuard {
    gauge: Gauge,
}

impl Drop for InProgressGuard {
    fn drop(&mut self) {
        self.gauge.decrement(1.0);
    }
}

/// Records elapsed wall-clock time on drop.
pub struct LatencyTimer {
    histogram: Histogram,
    started: Instant,
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        self.histogram.record(self.started.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_skips_unknown() {
        let names = vec![
            "request_count".to_string(),
            "throughput".to_string(),
            "latency".to_string(),
        ];
        assert_eq!(
            MetricKind::resolve(&names),
            vec![MetricKind::RequestCount, MetricKind::Latency]
        );
    }

    #[test]
    fn test_request_counter_labels() {
        let registry = MetricsRegistry::new("orders");
        registry.record_request("GET", "/orders", None, 200);
        registry.record_request("GET", "/orders", None, 200);
        registry.record_request("GET", "/orders", Some("u-1"), 500);

        let none_200 = registry.read_sample(
            REQUEST_COUNT,
            &[("method", "GET"), ("route", "/orders"), ("service", "orders"), ("user", "none"), ("status", "200")],
        );
        assert_eq!(none_200, Some(2.0));

        let user_500 = registry.read_sample(REQUEST_COUNT, &[("user", "u-1"), ("status", "500")]);
        assert_eq!(user_500, Some(1.0));
    }

    #[test]
    fn test_in_progress_guard_returns_to_baseline() {
        let registry = MetricsRegistry::new("orders");
        {
            let _a = registry.track_in_progress();
            let _b = registry.track_in_progress();
            assert_eq!(registry.read_sample(IN_PROGRESS, &[("service", "orders")]), Some(2.0));
        }
        assert_eq!(registry.read_sample(IN_PROGRESS, &[("service", "orders")]), Some(0.0));
    }

    #[test]
    fn test_registries_are_independent() {
        let a = MetricsRegistry::new("a");
        let b = MetricsRegistry::new("b");
        a.record_request("POST", "/x", None, 201);
        assert!(b.read_sample(REQUEST_COUNT, &[]).is_none());
    }

    #[test]
    fn test_find_sample_requires_exact_name() {
        let text = "# TYPE http_requests_total_extra counter\nhttp_requests_total_extra 5\nhttp_requests_total{a=\"1\"} 3\n";
        assert_eq!(find_sample(text, "http_requests_total", &[]), Some(3.0));
    }

    #[test]
    fn test_upkeep_keeps_latency_summary_current() {
        let registry = MetricsRegistry::new("orders");
        for _ in 0..3 {
            drop(registry.start_timer("/orders"));
        }
        registry.run_upkeep();

        let count = registry.read_sample(
            &format!("{}_count", REQUEST_LATENCY),
            &[("route", "/orders"), ("service", "orders")],
        );
        assert_eq!(count, Some(3.0));
    }

    #[test]
    fn test_upkeep_needs_a_runtime() {
        let registry = MetricsRegistry::new("orders").with_upkeep(UPKEEP_INTERVAL);
        assert!(!registry.upkeep_scheduled());
    }

    #[tokio::test]
    async fn test_upkeep_task_runs_until_drop() {
        let registry = MetricsRegistry::new("orders").with_upkeep(Duration::from_millis(10));
        assert!(registry.upkeep_scheduled());

        drop(registry.start_timer("/orders"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        let count = registry.read_sample(&format!("{}_count", REQUEST_LATENCY), &[("route", "/orders")]);
        assert_eq!(count, Some(1.0));

        let task = registry.upkeep.as_ref().map(|t| t.abort_handle()).unwrap();
        drop(registry);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(task.is_finished());
    }
}
