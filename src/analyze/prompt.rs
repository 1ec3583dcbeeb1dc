//! Prompt text for single and batch classification.

use std::fmt::Write as _;

use crate::ingest::types::ReportRecord;

pub const SYSTEM_PROMPT: &str =
    "You are a stock market analyst assistant that classifies Indonesian stock reports.";

const CRITERIA: &str = "\
Impact Criteria (based on expected stock price impact):
- Critical: MAJOR price movement expected (>10-15%) - bankruptcy, M&A, massive earnings surprise, regulatory shutdown, delisting, major fraud investigation
- High: SIGNIFICANT price movement expected (5-10%) - earnings beats/misses, major guidance changes, large contract wins/losses, dividend cuts/suspension, executive scandals
- Medium: MODERATE price movement expected (2-5%) - routine earnings, normal business updates, moderate guidance, minor contracts, regular dividends
- Low: MINIMAL price movement expected (<2%) - administrative filings, minor corporate actions, routine disclosures, ownership reports

Sentiment Criteria:
- Positive: Revenue growth, expansion, positive guidance, dividend, stock split
- Negative: Losses, guidance cuts, investigations, debt issues, delisting risk
- Neutral: Factual announcements without clear sentiment
";

const SINGLE_SHAPE: &str = r#"{
    "impact": "critical|high|medium|low",
    "sentiment": "positive|negative|neutral",
    "reasoning": "brief explanation",
    "keywords": ["keyword1", "keyword2"]
}"#;

/// Key used for the `i`-th (1-based) report of a batch.
pub fn batch_key(i: usize) -> String {
    format!("report_{i}")
}

pub fn single(title: &str, report_type: &str, primary_topic: Option<&str>) -> String {
    format!(
        "Classify this Indonesian stock report by impact and sentiment:\n\n\
         Title: {title}\n\
         Report Type: {report_type}\n\
         Stock: {stock}\n\n\
         Respond in JSON format:\n{SINGLE_SHAPE}\n\n{CRITERIA}",
        stock = primary_topic.unwrap_or("N/A"),
    )
}

pub fn batch(reports: &[ReportRecord]) -> String {
    let mut out = String::with_capacity(512 + reports.len() * 160);
    let _ = writeln!(
        out,
        "Classify each of these {} Indonesian stock reports by impact and sentiment:\n",
        reports.len()
    );
    for (i, r) in reports.iter().enumerate() {
        let _ = writeln!(out, "{}:", batch_key(i + 1));
        let _ = writeln!(out, "Title: {}", r.title);
        let _ = writeln!(out, "Report Type: {}", r.report_type);
        let _ = writeln!(out, "Stock: {}\n", r.primary_ticker().unwrap_or("N/A"));
    }
    let _ = writeln!(
        out,
        "Respond with ONE JSON object keyed by report id ({}..{}), each value shaped as:\n{SINGLE_SHAPE}\n",
        batch_key(1),
        batch_key(reports.len().max(1)),
    );
    out.push_str(CRITERIA);
    out
}
