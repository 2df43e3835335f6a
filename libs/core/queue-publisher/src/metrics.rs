//! Prometheus metrics for the publisher
//!
//! Provides observability into publish outcomes and connection recovery.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::info;

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Initialize Prometheus metrics
///
/// Call this once at startup. Subsequent calls are no-ops.
pub fn init_metrics() {
    let _ = PROMETHEUS_HANDLE.get_or_init(|| {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("Failed to install Prometheus recorder");
        info!("Prometheus metrics initialized");
        handle
    });
}

/// Render metrics in Prometheus format
pub fn render_metrics() -> String {
    PROMETHEUS_HANDLE
        .get()
        .map(|h| h.render())
        .unwrap_or_default()
}

/// Publisher metrics helper, labeled by destination queue.
#[derive(Clone)]
pub struct PublisherMetrics {
    queue: String,
}

impl PublisherMetrics {
    /// Create new PublisherMetrics for a queue.
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
        }
    }

    /// Record a confirmed publish.
    pub fn published(&self, duration: Duration) {
        counter!(
            "queue_publisher_events_published_total",
            "queue" => self.queue.clone()
        )
        .increment(1);

        histogram!(
            "queue_publisher_publish_duration_seconds",
            "queue" => self.queue.clone()
        )
        .record(duration.as_secs_f64());
    }

    /// Record a publish that exhausted its retries or aborted.
    pub fn failed(&self) {
        counter!(
            "queue_publisher_events_failed_total",
            "queue" => self.queue.clone()
        )
        .increment(1);
    }

    /// Record a publish retry.
    pub fn retried(&self) {
        counter!(
            "queue_publisher_publish_retries_total",
            "queue" => self.queue.clone()
        )
        .increment(1);
    }
}

/// Record a successful (re)connection to the broker.
pub fn connection_established() {
    counter!("queue_publisher_connects_total").increment(1);
}

/// Record a reconnect triggered by a broker failure signal.
pub fn reconnect_triggered(signal: &str) {
    counter!(
        "queue_publisher_reconnects_total",
        "signal" => signal.to_string()
    )
    .increment(1);
}

/// Record a connect attempt chain that exhausted its retries.
pub fn connect_failed() {
    counter!("queue_publisher_connect_failures_total").increment(1);
}
