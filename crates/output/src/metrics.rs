//! Prometheus metrics for the output
//!
//! Per-instance counters for record flow and publisher lifecycle.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, Encoder,
    HistogramVec, IntCounterVec, IntGaugeVec, TextEncoder,
};

/// Labels used for metrics
const LABEL_INSTANCE: &str = "instance";
const LABEL_TOPIC: &str = "topic";
const LABEL_KIND: &str = "kind";

/// Topic label for records that never resolved to a publisher. Those names
/// come straight from upstream and must not mint a series each.
pub const UNRESOLVED_TOPIC: &str = "_unresolved";

/// Records successfully handed to the bus
static RECORDS_PUBLISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "msgbus_output_records_published_total",
        "Total records published to the message bus",
        &[LABEL_INSTANCE, LABEL_TOPIC]
    )
    .expect("Failed to register records_published metric")
});

/// Records dropped, by failure kind
static PUBLISH_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "msgbus_output_publish_failures_total",
        "Total records that could not be published",
        &[LABEL_INSTANCE, LABEL_TOPIC, LABEL_KIND]
    )
    .expect("Failed to register publish_failures metric")
});

static PUBLISHERS_CREATED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "msgbus_output_publishers_created_total",
        "Total topic publishers created on the bus connection",
        &[LABEL_INSTANCE]
    )
    .expect("Failed to register publishers_created metric")
});

static PUBLISHERS_ACTIVE: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "msgbus_output_publishers_active",
        "Topic publishers currently registered",
        &[LABEL_INSTANCE]
    )
    .expect("Failed to register publishers_active metric")
});

static PUBLISH_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "msgbus_output_publish_duration_seconds",
        "Time spent in a single publish call",
        &[LABEL_INSTANCE],
        vec![0.00001, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]
    )
    .expect("Failed to register publish_duration metric")
});

/// Handle for recording metrics for one output instance
#[derive(Clone, Debug)]
pub struct OutputMetrics {
    instance: String,
}

impl OutputMetrics {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn inc_published(&self, topic: &str) {
        RECORDS_PUBLISHED
            .with_label_values(&[self.instance.as_str(), topic])
            .inc();
    }

    pub fn inc_failure(&self, topic: &str, kind: &str) {
        PUBLISH_FAILURES
            .with_label_values(&[self.instance.as_str(), topic, kind])
            .inc();
    }

    /// Failure before a publisher was resolved, counted under `UNRESOLVED_TOPIC`
    pub fn inc_unresolved_failure(&self, kind: &str) {
        self.inc_failure(UNRESOLVED_TOPIC, kind);
    }

    pub fn failure_count(&self, topic: &str, kind: &str) -> u64 {
        PUBLISH_FAILURES
            .with_label_values(&[self.instance.as_str(), topic, kind])
            .get()
    }

    pub fn publisher_created(&self) {
        PUBLISHERS_CREATED
            .with_label_values(&[self.instance.as_str()])
            .inc();
        PUBLISHERS_ACTIVE
            .with_label_values(&[self.instance.as_str()])
            .inc();
    }

    pub fn publisher_stopped(&self) {
        PUBLISHERS_ACTIVE
            .with_label_values(&[self.instance.as_str()])
            .dec();
    }

    pub fn observe_publish_duration(&self, seconds: f64) {
        PUBLISH_DURATION
            .with_label_values(&[self.instance.as_str()])
            .observe(seconds);
    }

    pub fn published_count(&self, topic: &str) -> u64 {
        RECORDS_PUBLISHED
            .with_label_values(&[self.instance.as_str(), topic])
            .get()
    }

    pub fn active_publishers(&self) -> i64 {
        PUBLISHERS_ACTIVE
            .with_label_values(&[self.instance.as_str()])
            .get()
    }
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| {
        prometheus::Error::Msg(format!("Failed to encode metrics as UTF-8: {}", e))
    })
}
