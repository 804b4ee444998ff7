use std::sync::OnceLock;

use anyhow::Result;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

const QUEUE_SCANS_TOTAL: &str = "tanggap_sync_queue_scans_total";
const QUEUE_SCAN_DURATION_MS: &str = "tanggap_sync_queue_scan_duration_ms";
const OPEN_SUBMISSIONS_GAUGE: &str = "tanggap_sync_open_submissions";
const RATING_COUNT_GAUGE: &str = "tanggap_sync_rating_count";
const RATING_AVERAGE_GAUGE: &str = "tanggap_sync_rating_average";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub fn init_metrics() -> Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = METRICS_HANDLE.set(handle);
    Ok(())
}

pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

pub fn register_queue_scan(result: &str, duration_ms: f64) {
    counter!(QUEUE_SCANS_TOTAL, "result" => result.to_string()).increment(1);
    histogram!(QUEUE_SCAN_DURATION_MS, "result" => result.to_string()).record(duration_ms.max(0.0));
}

pub fn set_open_submissions(count: usize) {
    gauge!(OPEN_SUBMISSIONS_GAUGE).set(count as f64);
}

pub fn set_rating_summary(count: usize, average: Option<f64>) {
    gauge!(RATING_COUNT_GAUGE).set(count as f64);
    gauge!(RATING_AVERAGE_GAUGE).set(average.unwrap_or(0.0));
}
