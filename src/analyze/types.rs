//! Classification labels and the classified-report shape consumed by sinks.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ingest::types::ReportRecord;

pub const NOT_IN_BATCH: &str = "Not found in batch response";
pub const MALFORMED_IN_BATCH: &str = "Malformed entry in batch response";
pub const UNPARSEABLE_RESPONSE: &str = "Could not parse LLM response";
pub const RUN_CANCELLED: &str = "Run cancelled before classification";

/// Expected market-moving significance of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    Critical,
    High,
    Medium,
    Low,
}

impl Impact {
    pub const ALL: [Impact; 4] = [Impact::Critical, Impact::High, Impact::Medium, Impact::Low];

    pub fn as_str(self) -> &'static str {
        match self {
            Impact::Critical => "critical",
            Impact::High => "high",
            Impact::Medium => "medium",
            Impact::Low => "low",
        }
    }
}

impl FromStr for Impact {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(Impact::Critical),
            "high" => Ok(Impact::High),
            "medium" => Ok(Impact::Medium),
            "low" => Ok(Impact::Low),
            other => Err(format!("unknown impact '{other}'")),
        }
    }
}

impl fmt::Display for Impact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl Sentiment {
    pub const ALL: [Sentiment; 3] = [Sentiment::Positive, Sentiment::Negative, Sentiment::Neutral];

    pub fn as_str(self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
            Sentiment::Neutral => "neutral",
        }
    }
}

impl FromStr for Sentiment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "positive" => Ok(Sentiment::Positive),
            "negative" => Ok(Sentiment::Negative),
            "neutral" => Ok(Sentiment::Neutral),
            other => Err(format!("unknown sentiment '{other}'")),
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model verdict for one report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub impact: Impact,
    pub sentiment: Sentiment,
    pub reasoning: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Loose wire shape: labels arrive as free strings from the model.
#[derive(Deserialize)]
struct RawClassification {
    impact: String,
    sentiment: String,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    keywords: Option<Vec<String>>,
}

impl Classification {
    /// The safe default: medium / neutral / no keywords.
    pub fn fallback(reasoning: impl Into<String>) -> Self {
        Self {
            impact: Impact::Medium,
            sentiment: Sentiment::Neutral,
            reasoning: reasoning.into(),
            keywords: Vec::new(),
        }
    }

    /// Accepts any object with recognizable `impact` and `sentiment` labels.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        let raw: RawClassification = serde_json::from_value(value.clone()).ok()?;
        Some(Self {
            impact: raw.impact.parse().ok()?,
            sentiment: raw.sentiment.parse().ok()?,
            reasoning: raw.reasoning.unwrap_or_default().trim().to_string(),
            keywords: raw
                .keywords
                .unwrap_or_default()
                .into_iter()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect(),
        })
    }
}

/// ReportRecord plus its Classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassifiedReport {
    #[serde(flatten)]
    pub report: ReportRecord,
    #[serde(flatten)]
    pub classification: Classification,
}

impl ClassifiedReport {
    pub fn new(report: ReportRecord, classification: Classification) -> Self {
        Self {
            report,
            classification,
        }
    }

    pub fn impact(&self) -> Impact {
        self.classification.impact
    }

    pub fn sentiment(&self) -> Sentiment {
        self.classification.sentiment
    }
}
