//! Output sinks for classified reports: a tabular store and a chat channel.
//!
//! Routing (what goes where) lives in the pipeline; this module only knows
//! how to render and deliver.

pub mod sheets;
pub mod telegram;

use async_trait::async_trait;

use crate::analyze::types::ClassifiedReport;
use crate::error::SinkError;

/// Entries listed in a high-impact summary before "... and N more".
pub const HIGH_SUMMARY_LIMIT: usize = 5;
const SUMMARY_TITLE_CHARS: usize = 60;

/// Append-only store (Google Sheets in production).
#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn append_reports(&self, reports: &[ClassifiedReport]) -> Result<usize, SinkError>;
    fn name(&self) -> &'static str;
}

/// Chat alert channel (Telegram in production). Receives rendered text.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    async fn send_text(&self, text: &str) -> Result<(), SinkError>;
    fn name(&self) -> &'static str;
}

/// Escape the characters legacy Telegram Markdown treats as markup.
pub fn escape_markdown(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        if matches!(ch, '_' | '*' | '[' | '`') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn or_na(s: &str) -> &str {
    if s.trim().is_empty() {
        "N/A"
    } else {
        s
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// One alert per critical report.
pub fn format_critical(r: &ClassifiedReport) -> String {
    format!(
        "🚨 *CRITICAL IMPACT*\n\n\
         *Title*: {title}\n\
         *Stock*: {stock}\n\
         *Report Type*: {report_type}\n\n\
         *Sentiment*: {sentiment}\n\
         *Reasoning*: {reasoning}\n\n\
         📅 {timestamp}\n\
         🔗 {url}",
        title = escape_markdown(&r.report.title),
        stock = escape_markdown(or_na(&r.report.stock)),
        report_type = escape_markdown(or_na(&r.report.report_type)),
        sentiment = r.sentiment(),
        reasoning = escape_markdown(&r.classification.reasoning),
        timestamp = escape_markdown(&r.report.timestamp),
        url = escape_markdown(r.report.url.as_deref().unwrap_or("")),
    )
}

/// One summary for all high-impact reports, first five listed.
pub fn format_high_summary(reports: &[ClassifiedReport]) -> String {
    let mut msg = format!(
        "📊 *High Impact Reports Summary* ({} reports)\n\n",
        reports.len()
    );
    for (i, r) in reports.iter().take(HIGH_SUMMARY_LIMIT).enumerate() {
        msg.push_str(&format!(
            "{}. *{}* - {}...\n   Sentiment: {}\n\n",
            i + 1,
            escape_markdown(or_na(&r.report.stock)),
            escape_markdown(&truncate_chars(&r.report.title, SUMMARY_TITLE_CHARS)),
            r.sentiment(),
        ));
    }
    if reports.len() > HIGH_SUMMARY_LIMIT {
        msg.push_str(&format!(
            "... and {} more",
            reports.len() - HIGH_SUMMARY_LIMIT
        ));
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::types::{Classification, Impact, Sentiment};
    use crate::ingest::types::ReportRecord;

    fn classified(i: u64, title: &str, impact: Impact) -> ClassifiedReport {
        ClassifiedReport::new(
            ReportRecord {
                stream_id: i,
                title: title.into(),
                report_type: "Financial Report".into(),
                stock: "BBCA".into(),
                timestamp: "2024-01-01 11:00:00".into(),
                url: Some("https://stockbit.com/post/1".into()),
            },
            Classification {
                impact,
                sentiment: Sentiment::Positive,
                reasoning: "net_income up".into(),
                keywords: vec![],
            },
        )
    }

    #[test]
    fn markdown_specials_are_escaped() {
        assert_eq!(escape_markdown("a_b*c[d`e"), "a\\_b\\*c\\[d\\`e");
        assert_eq!(escape_markdown("plain"), "plain");
    }

    #[test]
    fn critical_alert_lists_fields() {
        let text = format_critical(&classified(1, "Delisting notice", Impact::Critical));
        assert!(text.starts_with("🚨 *CRITICAL IMPACT*"));
        assert!(text.contains("*Title*: Delisting notice"));
        assert!(text.contains("*Sentiment*: positive"));
        assert!(text.contains("*Reasoning*: net\\_income up"));
        assert!(text.contains("🔗 https://stockbit.com/post/1"));
    }

    #[test]
    fn critical_alert_escapes_url() {
        let mut r = classified(2, "Rights issue", Impact::Critical);
        r.report.url = Some("https://stockbit.com/post/rights_issue_2024".into());
        let text = format_critical(&r);
        assert!(text.ends_with("🔗 https://stockbit.com/post/rights\\_issue\\_2024"));
    }

    #[test]
    fn high_summary_caps_at_five() {
        let reports: Vec<_> = (0..7)
            .map(|i| classified(i, &format!("report {i}"), Impact::High))
            .collect();
        let text = format_high_summary(&reports);
        assert!(text.contains("(7 reports)"));
        assert!(text.contains("5. *BBCA*"));
        assert!(!text.contains("6. *BBCA*"));
        assert!(text.ends_with("... and 2 more"));
    }

    #[test]
    fn high_summary_truncates_titles_by_chars() {
        let long = "é".repeat(80);
        let text = format_high_summary(&[classified(1, &long, Impact::High)]);
        assert!(text.contains(&format!("{}...", "é".repeat(60))));
        assert!(!text.contains("more"));
    }
}
