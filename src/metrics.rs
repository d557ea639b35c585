use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, register_int_gauge, Encoder, IntCounterVec, IntGauge, TextEncoder};
use tracing::warn;

lazy_static! {
    pub static ref RELAY_FETCHES: IntCounterVec = register_int_counter_vec!(
        "relay_fetch_total",
        "Upstream playlist fetches per provider and outcome",
        &["provider", "outcome"]
    )
    .unwrap();
    pub static ref CATALOG_CHANNELS: IntGauge = register_int_gauge!(
        "relay_catalog_channels",
        "Number of channels in the currently loaded catalog"
    )
    .unwrap();
}

pub fn record_fetch(provider: &str, outcome: &str) {
    RELAY_FETCHES.with_label_values(&[provider, outcome]).inc();
}

pub fn gather_metrics() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_contains_recorded_fetch() {
        record_fetch("metrics-test", "ok");
        CATALOG_CHANNELS.set(3);
        let text = gather_metrics();
        assert!(text.contains("relay_fetch_total"));
        assert!(text.contains("provider=\"metrics-test\""));
        assert!(text.contains("relay_catalog_channels"));
    }
}
