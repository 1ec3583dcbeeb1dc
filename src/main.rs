//! report-monitor: one fetch → classify → notify run per invocation.
//!
//! Meant to be driven by cron or a systemd timer. Exit status is non-zero
//! when the run aborted (bad configuration or an unreachable feed).

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use report_monitor::analyze::{Classifier, ClassifierSettings, ZChatClient};
use report_monitor::ingest::stockbit::StockbitClient;
use report_monitor::notify::sheets::SheetsClient;
use report_monitor::notify::telegram::TelegramNotifier;
use report_monitor::{metrics, pipeline, Config};

/// `RUST_LOG` controls verbosity; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("report_monitor=info,warn"));
    let json = std::env::var("LOG_FORMAT")
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

async fn run(cfg: Config) -> anyhow::Result<pipeline::RunSummary> {
    let tuning = &cfg.tuning;

    let prom = match &tuning.metrics_textfile {
        Some(_) => Some(metrics::install()?),
        None => None,
    };

    // Deadline for the whole run; in-flight work winds down to defaults.
    let cancel = CancellationToken::new();
    let deadline = tuning.run_deadline();
    let timer = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            tracing::warn!(target: "pipeline", deadline_secs = deadline.as_secs(), "run deadline reached, cancelling");
            cancel.cancel();
        })
    };

    let source = StockbitClient::new(&tuning.feed_url, &cfg.stockbit_token)?;
    let transport = ZChatClient::new(&tuning.classifier_url, &cfg.classifier_api_key)?;
    let classifier = Classifier::new(
        Arc::new(transport),
        ClassifierSettings::from_tuning(tuning),
        cancel.clone(),
    );

    let mut sheets = SheetsClient::new(
        cfg.google_credentials.clone(),
        &cfg.spreadsheet_id,
        &tuning.sheet_name,
        &tuning.source_tag,
    )?
    .with_base_url(&tuning.sheets_base_url);
    if let Some(url) = &tuning.token_url {
        sheets = sheets.with_token_url(url);
    }
    let telegram = TelegramNotifier::new(
        &tuning.telegram_base_url,
        &cfg.telegram_bot_token,
        &cfg.telegram_chat_id,
    );

    let opts = pipeline::RunOptions::from_config(&cfg);
    let result = pipeline::run_once(&opts, &source, &classifier, &sheets, &telegram, &cancel).await;
    timer.abort();

    if let (Some(handle), Some(path)) = (&prom, &tuning.metrics_textfile) {
        if let Err(e) = metrics::write_textfile(handle, path) {
            tracing::warn!(target: "metrics", error = %e, "metrics textfile not written");
        }
    }

    result
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = match Config::from_env().context("loading configuration") {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "configuration invalid, aborting");
            return ExitCode::FAILURE;
        }
    };
    cfg.log_summary();

    match run(cfg).await {
        Ok(summary) => {
            tracing::info!(
                target: "pipeline",
                summary = %serde_json::to_string(&summary).unwrap_or_default(),
                "done"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(target: "pipeline", error = %format!("{e:#}"), "run aborted");
            ExitCode::FAILURE
        }
    }
}
