//! Prometheus metrics for the HTTP surface and its protection layers.

use std::fmt;

use prometheus_client::encoding::{EncodeLabelSet, text::encode};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;

/// HTTP request labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HttpLabels {
    pub method: String,
    /// Matched route template, not the raw path.
    pub path: String,
    pub status: u16,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct LimiterLabels {
    pub limiter: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct BreakerLabels {
    pub name: String,
    pub to: String,
}

/// Counter names omit `_total`; the text encoder appends it.
pub struct HttpMetrics {
    registry: Registry,
    pub http_requests: Family<HttpLabels, Counter>,
    pub http_duration_seconds: Family<HttpLabels, Histogram>,
    pub in_flight: Gauge,
    pub rate_limit_rejections: Family<LimiterLabels, Counter>,
    pub breaker_transitions: Family<BreakerLabels, Counter>,
}

impl HttpMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let http_requests = Family::<HttpLabels, Counter>::default();
        registry.register("http_requests", "Total HTTP requests", http_requests.clone());

        let http_duration_seconds = Family::<HttpLabels, Histogram>::new_with_constructor(|| {
            Histogram::new(exponential_buckets(0.001, 2.0, 12))
        });
        registry.register(
            "http_request_duration_seconds",
            "HTTP request duration in seconds",
            http_duration_seconds.clone(),
        );

        let in_flight = Gauge::default();
        registry.register(
            "http_requests_in_flight",
            "HTTP requests currently being served",
            in_flight.clone(),
        );

        let rate_limit_rejections = Family::<LimiterLabels, Counter>::default();
        registry.register(
            "rate_limit_rejections",
            "Requests rejected by a rate limiter",
            rate_limit_rejections.clone(),
        );

        let breaker_transitions = Family::<BreakerLabels, Counter>::default();
        registry.register(
            "circuit_breaker_transitions",
            "Circuit breaker state transitions",
            breaker_transitions.clone(),
        );

        Self {
            registry,
            http_requests,
            http_duration_seconds,
            in_flight,
            rate_limit_rejections,
            breaker_transitions,
        }
    }

    pub fn record_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let labels = HttpLabels {
            method: method.to_string(),
            path: path.to_string(),
            status,
        };

        self.http_requests.get_or_create(&labels).inc();
        self.http_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    pub fn request_started(&self) {
        self.in_flight.inc();
    }

    pub fn request_finished(&self) {
        self.in_flight.dec();
    }

    pub fn record_rate_limit(&self, limiter: &str) {
        self.rate_limit_rejections
            .get_or_create(&LimiterLabels {
                limiter: limiter.to_string(),
            })
            .inc();
    }

    pub fn record_breaker_transition(&self, name: &str, to: &str) {
        self.breaker_transitions
            .get_or_create(&BreakerLabels {
                name: name.to_string(),
                to: to.to_string(),
            })
            .inc();
    }

    /// Encode every metric in Prometheus text format.
    pub fn encode(&self) -> Result<String, fmt::Error> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }
}

impl Default for HttpMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HttpMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpMetrics").finish_non_exhaustive()
    }
}
