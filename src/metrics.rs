//! Prometheus recorder and textfile export.
//!
//! A single run is short-lived, so instead of serving `/metrics` the rendered
//! exposition is written to a file for a node-exporter textfile collector.

use std::fs;
use std::path::Path;

use anyhow::Context;
use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// Register descriptions for every series the run emits.
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("reports_fetched_total", "Reports returned by the feed.");
        describe_counter!(
            "reports_selected_total",
            "Reports inside the recency window and above the watermark."
        );
        describe_counter!(
            "classify_requests_total",
            "Classifier requests sent, by mode (single|batch)."
        );
        describe_counter!(
            "classify_retries_total",
            "Classifier retries scheduled, by mode."
        );
        describe_counter!(
            "classify_batch_fallback_total",
            "Batches re-classified report by report."
        );
        describe_counter!(
            "classify_default_total",
            "Default classifications produced, by reason."
        );
        describe_histogram!(
            "classify_request_ms",
            Unit::Milliseconds,
            "Classifier request latency."
        );
        describe_counter!("sink_failures_total", "Failed sink writes, by sink.");
        describe_gauge!(
            "pipeline_last_run_ts",
            Unit::Seconds,
            "Unix time of the last completed run."
        );
    });
}

/// Install the global recorder. Only called when a textfile is configured.
pub fn install() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("prometheus: install recorder")?;
    ensure_metrics_described();
    Ok(handle)
}

/// Render and write atomically (tmp + rename).
pub fn write_textfile(handle: &PrometheusHandle, path: &Path) -> anyhow::Result<()> {
    let tmp = path.with_extension("prom.tmp");
    fs::write(&tmp, handle.render()).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("renaming onto {}", path.display()))?;
    tracing::debug!(target: "metrics", path = %path.display(), "metrics textfile written");
    Ok(())
}
