use std::sync::Arc;

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

// ---------------------------------------------------------------------------
// Label types
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    pub endpoint: String,
    pub outcome: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct EndpointLabels {
    pub endpoint: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ServiceLabels {
    pub service: String,
}

// ---------------------------------------------------------------------------
// Metrics struct
// ---------------------------------------------------------------------------

/// Central container for every Prometheus metric exposed by the gateway.
pub struct Metrics {
    // -- requests --
    pub requests: Family<RequestLabels, Counter>,
    pub request_duration_seconds: Family<EndpointLabels, Histogram>,

    // -- git children --
    pub git_processes_started: Family<ServiceLabels, Counter>,

    // -- CGI backends --
    pub cgi_backends_started: Counter,
}

impl Metrics {
    /// Create a new [`Metrics`] instance and register every metric with the
    /// supplied `registry`.
    pub fn new(registry: &mut Registry) -> Self {
        let requests = Family::<RequestLabels, Counter>::default();
        registry.register(
            "packgate_requests",
            "Gateway requests by endpoint and outcome",
            requests.clone(),
        );

        let request_duration_seconds =
            Family::<EndpointLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.005, 2.0, 12))
            });
        registry.register(
            "packgate_request_duration_seconds",
            "Gateway request latency in seconds",
            request_duration_seconds.clone(),
        );

        let git_processes_started = Family::<ServiceLabels, Counter>::default();
        registry.register(
            "packgate_git_processes_started",
            "git child processes spawned, by service",
            git_processes_started.clone(),
        );

        let cgi_backends_started = Counter::default();
        registry.register(
            "packgate_cgi_backends_started",
            "Per-request CGI backends spawned",
            cgi_backends_started.clone(),
        );

        Self {
            requests,
            request_duration_seconds,
            git_processes_started,
            cgi_backends_started,
        }
    }
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

/// Thread-safe wrapper for the metrics registry, used in [`AppState`].
#[derive(Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub metrics: Arc<Metrics>,
}

impl MetricsRegistry {
    /// Build a fresh registry and pre-register all gateway metrics.
    pub fn new() -> Self {
        let mut registry = Registry::default();
        let metrics = Metrics::new(&mut registry);
        Self {
            registry: Arc::new(registry),
            metrics: Arc::new(metrics),
        }
    }
}
