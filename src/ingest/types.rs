// src/ingest/types.rs
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::SourceError;

/// Wall-clock format used by the report feed.
pub const FEED_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One report event from the feed. Never mutated after fetch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportRecord {
    pub stream_id: u64,
    pub title: String,
    pub report_type: String,
    /// Comma-joined tickers, e.g. "BBCA, BBRI".
    pub stock: String,
    /// Naive wall-clock in `FEED_TIMESTAMP_FORMAT`.
    pub timestamp: String,
    pub url: Option<String>,
}

impl ReportRecord {
    /// Ticker symbols in feed order, empty entries dropped.
    pub fn tickers(&self) -> Vec<&str> {
        self.stock
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect()
    }

    pub fn primary_ticker(&self) -> Option<&str> {
        self.tickers().into_iter().next()
    }
}

/// Anything that can hand us a bounded list of recent reports.
#[async_trait::async_trait]
pub trait ReportSource: Send + Sync {
    async fn fetch_reports(
        &self,
        limit: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<ReportRecord>, SourceError>;
    fn name(&self) -> &'static str;
}

// ---- Feed wire format ----

#[derive(Debug, Deserialize)]
pub(crate) struct FeedEnvelope {
    #[serde(default)]
    pub data: Option<FeedData>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FeedData {
    #[serde(default)]
    pub stream: Vec<FeedItem>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FeedItem {
    pub stream_id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub reports: Vec<FeedReport>,
    #[serde(default)]
    pub title_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FeedReport {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

impl FeedItem {
    pub(crate) fn into_record(self) -> ReportRecord {
        let report_type = self
            .reports
            .into_iter()
            .next()
            .and_then(|r| r.kind)
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| "Unknown".to_string());
        let url = self
            .title_url
            .filter(|u| !u.is_empty())
            .map(|u| format!("https://stockbit.com/{u}"));
        ReportRecord {
            stream_id: self.stream_id,
            title: self.title,
            report_type,
            stock: self.topics.join(", "),
            timestamp: self.created_at,
            url,
        }
    }
}
