//! Prometheus metrics

use crate::models::ModelFormat;
use crate::runtime::Runtime;
use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Setup Prometheus metrics exporter
/// Returns a handle that can be used to render metrics
pub fn setup_metrics() -> Result<metrics_exporter_prometheus::PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    tracing::info!("Prometheus metrics exporter installed");

    Ok(handle)
}

fn outcome(success: bool) -> &'static str {
    if success { "success" } else { "failure" }
}

/// Record a download attempt
pub fn record_download(model_id: &str, success: bool) {
    metrics::counter!("modelbox_downloads_total",
        "model" => model_id.to_string(),
        "outcome" => outcome(success)
    )
    .increment(1);
}

/// Record a conversion attempt
pub fn record_conversion(format: ModelFormat, success: bool) {
    metrics::counter!("modelbox_conversions_total",
        "format" => format.as_str(),
        "outcome" => outcome(success)
    )
    .increment(1);
}

/// Record a successful load and how long instantiation took
pub fn record_load(model_id: &str, runtime: Runtime, seconds: f64) {
    metrics::counter!("modelbox_loads_total",
        "model" => model_id.to_string(),
        "runtime" => runtime.to_string()
    )
    .increment(1);
    metrics::histogram!("modelbox_load_duration_seconds",
        "runtime" => runtime.to_string()
    )
    .record(seconds);
}

pub fn record_load_failure(model_id: &str, runtime: Runtime) {
    metrics::counter!("modelbox_load_failures_total",
        "model" => model_id.to_string(),
        "runtime" => runtime.to_string()
    )
    .increment(1);
}

/// Record a cache entry being superseded or unloaded
pub fn record_eviction(model_id: &str, runtime: Runtime) {
    metrics::counter!("modelbox_evictions_total",
        "model" => model_id.to_string(),
        "runtime" => runtime.to_string()
    )
    .increment(1);
}

/// Record timings of a completed blocking generation
pub fn record_generation(runtime: Runtime, generate_seconds: f64, total_seconds: f64, new_tokens: usize) {
    metrics::histogram!("modelbox_generation_duration_seconds",
        "runtime" => runtime.to_string()
    )
    .record(generate_seconds);
    metrics::histogram!("modelbox_request_duration_seconds",
        "runtime" => runtime.to_string()
    )
    .record(total_seconds);
    metrics::counter!("modelbox_generated_tokens_total",
        "runtime" => runtime.to_string()
    )
    .increment(new_tokens as u64);
}

pub fn record_generation_failure(runtime: Runtime) {
    metrics::counter!("modelbox_generation_failures_total",
        "runtime" => runtime.to_string()
    )
    .increment(1);
}

pub fn record_stream_started(model_id: &str) {
    metrics::counter!("modelbox_streams_started_total",
        "model" => model_id.to_string()
    )
    .increment(1);
}

/// Update resident model gauges
pub fn update_resident(count: usize, bytes: u64) {
    metrics::gauge!("modelbox_resident_models").set(count as f64);
    metrics::gauge!("modelbox_resident_bytes").set(bytes as f64);
}
