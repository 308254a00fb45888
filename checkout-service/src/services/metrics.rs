use metrics::counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Calling it twice is a no-op.
pub fn init_metrics() -> anyhow::Result<()> {
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    // A concurrent caller may have won the race; either handle renders the same recorder.
    let _ = METRICS_HANDLE.set(handle);
    Ok(())
}

pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string())
}

/// Record a checkout initiation (`created`, `invalid`, `error`).
pub fn record_initiation(outcome: &'static str) {
    counter!("checkout_initiations_total", "outcome" => outcome).increment(1);
}

/// Record a gateway callback and how it was resolved.
pub fn record_callback(callback: &'static str, resolution: &'static str) {
    counter!(
        "payment_callbacks_total",
        "callback" => callback,
        "resolution" => resolution
    )
    .increment(1);
}

pub fn record_anomaly(kind: &'static str) {
    counter!("reconciliation_anomalies_total", "kind" => kind).increment(1);
}
