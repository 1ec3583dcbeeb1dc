//! Error taxonomy shared by the source client, classifier and sinks.

use std::error::Error as _;

use thiserror::Error;

/// Longest response excerpt carried inside an error.
pub const EXCERPT_LEN: usize = 200;

/// Cap a response body for inclusion in an error message.
pub fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= EXCERPT_LEN {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(EXCERPT_LEN - 3).collect();
    out.push_str("...");
    out
}

/// Report feed failures. Any of these aborts the run.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("report feed unavailable (HTTP {status}): {excerpt}")]
    Unavailable { status: u16, excerpt: String },

    #[error("report feed timed out")]
    Timeout,

    #[error("report feed transport error: {0}")]
    Transport(String),

    #[error("report feed payload could not be decoded: {0}")]
    Decode(String),

    #[error("run cancelled before fetching reports")]
    Cancelled,
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SourceError::Timeout
        } else if e.is_decode() {
            SourceError::Decode(e.to_string())
        } else {
            SourceError::Transport(e.to_string())
        }
    }
}

/// Classifier failures. These never leave the classifier: they are retried
/// or converted into a default classification.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("classifier rate limited (HTTP 429)")]
    RateLimited,

    #[error("classifier request timed out")]
    Timeout,

    #[error("classifier HTTP {status}: {excerpt}")]
    Http { status: u16, excerpt: String },

    #[error("classifier transport error: {0}")]
    Transport(String),

    #[error("classifier response unparseable: {0}")]
    Unparseable(String),

    #[error("run cancelled")]
    Cancelled,
}

impl ClassifyError {
    /// Stable short name, used in reasoning text and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            ClassifyError::RateLimited => "rate_limited",
            ClassifyError::Timeout => "timeout",
            ClassifyError::Http { .. } => "http_status",
            ClassifyError::Transport(_) => "transport",
            ClassifyError::Unparseable(_) => "unparseable",
            ClassifyError::Cancelled => "cancelled",
        }
    }
}

impl From<reqwest::Error> for ClassifyError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ClassifyError::Timeout
        } else if e.is_decode() {
            ClassifyError::Unparseable(e.to_string())
        } else {
            ClassifyError::Transport(e.to_string())
        }
    }
}

/// Sink write failures. Logged by the orchestrator; the run continues.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink authentication failed: {0}")]
    Auth(String),

    #[error("sink HTTP {status}: {excerpt}")]
    Http { status: u16, excerpt: String },

    /// Built from a URL-stripped reqwest error; Telegram URLs carry the bot token.
    #[error("sink transport error: {0}")]
    Transport(String),

    #[error("invalid sink credentials: {0}")]
    Credentials(String),
}

impl From<reqwest::Error> for SinkError {
    fn from(e: reqwest::Error) -> Self {
        let e = e.without_url();
        let mut msg = e.to_string();
        let mut cause = e.source();
        while let Some(c) = cause {
            msg.push_str(": ");
            msg.push_str(&c.to_string());
            cause = c.source();
        }
        SinkError::Transport(msg)
    }
}

/// Configuration problems detected at startup, before anything is fetched.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not configured")]
    Missing(&'static str),

    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing {path}: {source}")]
    Toml {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}
