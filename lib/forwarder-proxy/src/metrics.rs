//! Prometheus metrics for decision requests

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;
use anyhow::Result;
use forwarder_core::ForwarderError;
use tracing::debug;
use crate::middleware::{Middleware, MiddlewareContext};

/// Latency bucket boundaries, in seconds
pub const DURATION_BUCKETS: [f64; 4] = [0.1, 0.3, 1.2, 5.0];

/// Prometheus metrics collector for decision requests.
///
/// Clones share the same registry and metric handles; the prometheus types
/// aggregate atomically, so any number of tasks may record concurrently.
#[derive(Clone)]
pub struct MetricsCollector {
    /// Requests by destination host and reply status
    pub http_request_counts: IntCounterVec,
    /// Request latency in seconds
    pub http_request_duration_seconds: Histogram,
    /// Prometheus registry for metrics
    pub registry: Arc<Registry>,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let http_request_counts = IntCounterVec::new(
            Opts::new("http_request_counts", "Total requests"),
            &["destination", "code"],
        )?;

        let http_request_duration_seconds = Histogram::with_opts(
            HistogramOpts::new("http_request_duration_seconds", "Request durations")
                .buckets(DURATION_BUCKETS.to_vec()),
        )?;

        registry.register(Box::new(http_request_counts.clone()))?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;

        Ok(Self {
            http_request_counts,
            http_request_duration_seconds,
            registry,
        })
    }

    /// Record one finished request
    pub fn record(
        &self,
        destination: &str,
        status: u16,
        elapsed: Duration,
    ) -> forwarder_core::Result<()> {
        let code = status.to_string();
        self.http_request_counts
            .get_metric_with_label_values(&[destination, code.as_str()])
            .map_err(|e| ForwarderError::Instrumentation(e.to_string()))?
            .inc();
        self.http_request_duration_seconds
            .observe(elapsed.as_secs_f64());
        Ok(())
    }

    /// Current count for a destination/status pair
    #[cfg(test)]
    pub fn request_count(&self, destination: &str, status: u16) -> u64 {
        let code = status.to_string();
        self.http_request_counts
            .get_metric_with_label_values(&[destination, code.as_str()])
            .map(|counter| counter.get())
            .unwrap_or(0)
    }

    /// Content type of the exposition produced by [`MetricsCollector::gather`]
    pub fn format_type(&self) -> &'static str {
        prometheus::TEXT_FORMAT
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Request instrumentation: counts every decision request and observes its latency
pub struct MetricsMiddleware {
    pub collector: MetricsCollector,
}

impl MetricsMiddleware {
    /// Create a new metrics middleware
    pub fn new(collector: MetricsCollector) -> Self {
        Self { collector }
    }
}

#[async_trait::async_trait]
impl Middleware for MetricsMiddleware {
    fn name(&self) -> &'static str {
        "MetricsMiddleware"
    }

    async fn on_response(
        &self,
        context: &MiddlewareContext,
        status: u16,
    ) -> Result<()> {
        debug!("Recording metrics for {} -> {}", context.destination, status);
        self.collector
            .record(&context.destination, status, context.elapsed())?;
        Ok(())
    }
}
