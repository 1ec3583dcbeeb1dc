use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::error::{excerpt, SourceError};
use crate::ingest::types::{FeedEnvelope, ReportRecord, ReportSource};

const CATEGORY_REPORTS: &str = "STREAM_CATEGORY_REPORTS";
const REPORT_TYPE_ALL: &str = "REPORT_TYPE_ALL";

/// Stockbit stream client. One GET per fetch, no retry; the caller decides.
#[derive(Clone)]
pub struct StockbitClient {
    http: Client,
    url: String,
    bearer_token: String,
}

impl StockbitClient {
    pub fn new(url: impl Into<String>, bearer_token: impl Into<String>) -> Result<Self, SourceError> {
        let http = Client::builder()
            .user_agent("report-monitor/0.1")
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| SourceError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            url: url.into(),
            bearer_token: bearer_token.into(),
        })
    }

    async fn fetch_once(&self, limit: u32) -> Result<Vec<ReportRecord>, SourceError> {
        let limit = limit.to_string();
        let resp = self
            .http
            .get(&self.url)
            .bearer_auth(&self.bearer_token)
            .query(&[
                ("category", CATEGORY_REPORTS),
                ("last_stream_id", "0"),
                ("limit", limit.as_str()),
                ("report_type", REPORT_TYPE_ALL),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SourceError::Unavailable {
                status: status.as_u16(),
                excerpt: excerpt(&body),
            });
        }

        let body = resp.text().await?;
        let envelope: FeedEnvelope =
            serde_json::from_str(&body).map_err(|e| SourceError::Decode(e.to_string()))?;
        Ok(envelope
            .data
            .map(|d| d.stream)
            .unwrap_or_default()
            .into_iter()
            .map(|item| item.into_record())
            .collect())
    }
}

#[async_trait]
impl ReportSource for StockbitClient {
    async fn fetch_reports(
        &self,
        limit: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<ReportRecord>, SourceError> {
        if cancel.is_cancelled() {
            return Err(SourceError::Cancelled);
        }
        let out = tokio::select! {
            res = self.fetch_once(limit) => res,
            _ = cancel.cancelled() => Err(SourceError::Cancelled),
        };
        match &out {
            Ok(v) => counter!("reports_fetched_total").increment(v.len() as u64),
            Err(e) => tracing::warn!(target: "ingest", error = %e, provider = self.name(), "feed fetch failed"),
        }
        out
    }

    fn name(&self) -> &'static str {
        "Stockbit"
    }
}
