// src/ingest/mod.rs
pub mod stockbit;
pub mod types;

use std::time::Duration;

use chrono::{FixedOffset, NaiveDateTime, Offset, Utc};

use crate::ingest::types::{ReportRecord, FEED_TIMESTAMP_FORMAT};

/// Current wall-clock in the feed's fixed UTC offset, as a naive timestamp.
/// Out-of-range offsets fall back to UTC.
pub fn feed_now(utc_offset_hours: i32) -> NaiveDateTime {
    let offset = FixedOffset::east_opt(utc_offset_hours * 3_600).unwrap_or_else(|| Utc.fix());
    Utc::now().with_timezone(&offset).naive_local()
}

pub fn parse_feed_timestamp(ts: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(ts.trim(), FEED_TIMESTAMP_FORMAT).ok()
}

/// Keep reports stamped at or after `now - window`.
/// Unparseable timestamps are treated as out of window.
pub fn filter_recent(
    reports: &[ReportRecord],
    window: Duration,
    now: NaiveDateTime,
) -> Vec<ReportRecord> {
    // A window reaching past the calendar range keeps everything parseable.
    let cutoff = chrono::Duration::from_std(window)
        .ok()
        .and_then(|w| now.checked_sub_signed(w));
    reports
        .iter()
        .filter(|r| match parse_feed_timestamp(&r.timestamp) {
            Some(ts) => cutoff.map_or(true, |c| ts >= c),
            None => {
                tracing::debug!(
                    target: "ingest",
                    stream_id = r.stream_id,
                    timestamp = %r.timestamp,
                    "unparseable timestamp, skipping"
                );
                false
            }
        })
        .cloned()
        .collect()
}

/// Drop reports at or below the persisted watermark.
pub fn filter_unseen(reports: Vec<ReportRecord>, watermark: u64) -> Vec<ReportRecord> {
    reports
        .into_iter()
        .filter(|r| r.stream_id > watermark)
        .collect()
}

/// Highest `stream_id` in the fetch, if any.
pub fn max_stream_id(reports: &[ReportRecord]) -> Option<u64> {
    reports.iter().map(|r| r.stream_id).max()
}
