// Prometheus metrics for the admission proxy
//
// Exposes metrics on the /metrics HTTP endpoint:
// - Admission decisions by outcome (counter)
// - Shared store fallbacks by component (counter)
// - Downstream attempts by result (counter)
// - Downstream retry delays (histogram)
// - Quota units reserved (counter)

use lazy_static::lazy_static;
use prometheus::{Encoder, Histogram, IntCounter, IntCounterVec, Registry, TextEncoder};
use std::sync::Arc;
use std::sync::Once;

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    pub static ref ADMISSION_DECISIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("admission_decisions_total", "Admission decisions by outcome"),
        &["outcome"]
    ).expect("Failed to create admission decisions metric");

    pub static ref STORE_FALLBACKS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("store_fallbacks_total", "Shared store failures answered by the local fallback"),
        &["component"]
    ).expect("Failed to create store fallbacks metric");

    pub static ref DOWNSTREAM_ATTEMPTS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("downstream_attempts_total", "Downstream call attempts by result"),
        &["result"]
    ).expect("Failed to create downstream attempts metric");

    pub static ref DOWNSTREAM_RETRY_DELAY_SECONDS: Histogram = Histogram::with_opts(
        prometheus::HistogramOpts::new("downstream_retry_delay_seconds", "Backoff delay before a downstream retry"),
    ).expect("Failed to create retry delay metric");

    pub static ref QUOTA_UNITS_RESERVED_TOTAL: IntCounter = IntCounter::new(
        "quota_units_reserved_total",
        "Usage units reserved by successful quota reservations"
    ).expect("Failed to create quota units metric");
}

static INIT: Once = Once::new();

/// Register all metrics with the registry. Safe to call more than once.
pub fn init() {
    INIT.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(ADMISSION_DECISIONS_TOTAL.clone()),
            Box::new(STORE_FALLBACKS_TOTAL.clone()),
            Box::new(DOWNSTREAM_ATTEMPTS_TOTAL.clone()),
            Box::new(DOWNSTREAM_RETRY_DELAY_SECONDS.clone()),
            Box::new(QUOTA_UNITS_RESERVED_TOTAL.clone()),
        ];
        for collector in collectors {
            if let Err(e) = REGISTRY.register(collector) {
                tracing::warn!(error = %e, "Failed to register metric");
            }
        }
    });
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}
