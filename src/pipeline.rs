//! One monitoring run: fetch → window → classify → sinks → watermark.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use metrics::{counter, gauge};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::analyze::types::{ClassifiedReport, Impact, Sentiment};
use crate::analyze::Classifier;
use crate::config::Config;
use crate::ingest::{self, types::ReportSource};
use crate::notify::{self, AlertChannel, ReportStore};
use crate::state::RunState;

/// The parts of `Config` a run reads.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub fetch_limit: u32,
    pub window: Duration,
    pub batch_size: usize,
    pub feed_utc_offset_hours: i32,
    pub state_path: PathBuf,
    pub dry_run: bool,
}

impl RunOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            fetch_limit: cfg.tuning.fetch_limit,
            window: cfg.tuning.window(),
            batch_size: cfg.tuning.batch_size,
            feed_utc_offset_hours: cfg.tuning.feed_utc_offset_hours,
            state_path: cfg.tuning.state_path.clone(),
            dry_run: cfg.dry_run,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierCounts {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SentimentCounts {
    pub positive: usize,
    pub negative: usize,
    pub neutral: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub fetched: usize,
    pub selected: usize,
    pub classified: usize,
    pub impact: TierCounts,
    pub sentiment: SentimentCounts,
    pub rows_written: usize,
    pub alerts_sent: usize,
    pub sink_failures: usize,
    pub dry_run: bool,
    pub cancelled: bool,
}

impl RunSummary {
    fn tally(&mut self, reports: &[ClassifiedReport]) {
        self.classified = reports.len();
        for r in reports {
            match r.impact() {
                Impact::Critical => self.impact.critical += 1,
                Impact::High => self.impact.high += 1,
                Impact::Medium => self.impact.medium += 1,
                Impact::Low => self.impact.low += 1,
            }
            match r.sentiment() {
                Sentiment::Positive => self.sentiment.positive += 1,
                Sentiment::Negative => self.sentiment.negative += 1,
                Sentiment::Neutral => self.sentiment.neutral += 1,
            }
        }
    }
}

/// Execute a single run. Only a source failure (or a state write failure)
/// is an error; sink failures are counted in the summary.
pub async fn run_once(
    opts: &RunOptions,
    source: &dyn ReportSource,
    classifier: &Classifier,
    store: &dyn ReportStore,
    alerts: &dyn AlertChannel,
    cancel: &CancellationToken,
) -> anyhow::Result<RunSummary> {
    let mut summary = RunSummary {
        dry_run: opts.dry_run,
        ..RunSummary::default()
    };
    let prev = RunState::load(&opts.state_path);
    tracing::info!(
        target: "pipeline",
        source = source.name(),
        watermark = prev.last_stream_id,
        limit = opts.fetch_limit,
        "run started"
    );

    let fetched = source
        .fetch_reports(opts.fetch_limit, cancel)
        .await
        .with_context(|| format!("fetching from {}", source.name()))?;
    summary.fetched = fetched.len();

    let now = ingest::feed_now(opts.feed_utc_offset_hours);
    let recent = ingest::filter_recent(&fetched, opts.window, now);
    let in_window = recent.len();
    let selected = ingest::filter_unseen(recent, prev.last_stream_id);
    summary.selected = selected.len();
    counter!("reports_selected_total").increment(selected.len() as u64);
    tracing::info!(
        target: "pipeline",
        fetched = summary.fetched,
        in_window,
        selected = summary.selected,
        window_secs = opts.window.as_secs(),
        "reports selected"
    );

    let classified = if selected.is_empty() {
        Vec::new()
    } else {
        classifier.classify_batch(&selected, opts.batch_size).await
    };
    summary.tally(&classified);
    tracing::info!(
        target: "pipeline",
        critical = summary.impact.critical,
        high = summary.impact.high,
        medium = summary.impact.medium,
        low = summary.impact.low,
        "classification finished"
    );

    if cancel.is_cancelled() {
        summary.cancelled = true;
        tracing::warn!(
            target: "pipeline",
            classified = summary.classified,
            "run cancelled, sinks skipped and watermark kept"
        );
        return Ok(summary);
    }

    if !classified.is_empty() {
        if opts.dry_run {
            log_dry_run(&classified);
        } else {
            deliver(&classified, store, alerts, cancel, &mut summary).await;
            if summary.cancelled && summary.rows_written == 0 {
                return Ok(summary);
            }
        }
    }

    let next = prev.advance(&fetched, chrono::Utc::now().to_rfc3339());
    next.save(&opts.state_path)
        .with_context(|| format!("saving state to {}", opts.state_path.display()))?;
    gauge!("pipeline_last_run_ts").set(chrono::Utc::now().timestamp() as f64);

    tracing::info!(
        target: "pipeline",
        watermark = next.last_stream_id,
        rows_written = summary.rows_written,
        alerts_sent = summary.alerts_sent,
        sink_failures = summary.sink_failures,
        dry_run = summary.dry_run,
        "run finished"
    );
    Ok(summary)
}

fn log_dry_run(classified: &[ClassifiedReport]) {
    let (critical, high) = route(classified);
    tracing::info!(
        target: "pipeline",
        rows = classified.len(),
        critical_alerts = critical.len(),
        high_summary = !high.is_empty(),
        "dry run: nothing written"
    );
    for r in classified {
        tracing::debug!(
            target: "pipeline",
            stream_id = r.report.stream_id,
            impact = %r.impact(),
            sentiment = %r.sentiment(),
            title = %r.report.title,
            "dry run row"
        );
    }
}

fn route(classified: &[ClassifiedReport]) -> (Vec<&ClassifiedReport>, Vec<ClassifiedReport>) {
    let critical = classified
        .iter()
        .filter(|r| r.impact() == Impact::Critical)
        .collect();
    let high = classified
        .iter()
        .filter(|r| r.impact() == Impact::High)
        .cloned()
        .collect();
    (critical, high)
}

/// Store first, then alerts. A failing sink never stops the other.
async fn deliver(
    classified: &[ClassifiedReport],
    store: &dyn ReportStore,
    alerts: &dyn AlertChannel,
    cancel: &CancellationToken,
    summary: &mut RunSummary,
) {
    if cancel.is_cancelled() {
        summary.cancelled = true;
        tracing::warn!(target: "pipeline", "run cancelled, store write skipped");
        return;
    }
    match store.append_reports(classified).await {
        Ok(n) => summary.rows_written = n,
        Err(e) => sink_failed(store.name(), &e, summary),
    }

    let (critical, high) = route(classified);
    let mut messages: Vec<String> = critical.into_iter().map(notify::format_critical).collect();
    if !high.is_empty() {
        messages.push(notify::format_high_summary(&high));
    }

    for text in messages {
        if cancel.is_cancelled() {
            summary.cancelled = true;
            tracing::warn!(target: "pipeline", "run cancelled, remaining alerts dropped");
            break;
        }
        match alerts.send_text(&text).await {
            Ok(()) => summary.alerts_sent += 1,
            Err(e) => sink_failed(alerts.name(), &e, summary),
        }
    }
}

fn sink_failed(sink: &'static str, err: &crate::error::SinkError, summary: &mut RunSummary) {
    summary.sink_failures += 1;
    counter!("sink_failures_total", "sink" => sink).increment(1);
    tracing::error!(target: "pipeline", sink, error = %err, "sink write failed");
}
