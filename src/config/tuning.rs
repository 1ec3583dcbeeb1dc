// src/config/tuning.rs
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

pub const ENV_TUNING_PATH: &str = "MONITOR_CONFIG_PATH";
pub const DEFAULT_TUNING_PATH: &str = "config/monitor.toml";

fn default_fetch_limit() -> u32 {
    50
}
fn default_window_secs() -> u64 {
    3_600
}
fn default_batch_size() -> usize {
    5
}
fn default_min_delay_ms() -> u64 {
    1_000
}
fn default_backoff_unit_ms() -> u64 {
    1_000
}
fn default_max_attempts() -> u32 {
    3
}
fn default_feed_utc_offset_hours() -> i32 {
    7
}
fn default_run_deadline_secs() -> u64 {
    600
}
fn default_state_path() -> PathBuf {
    PathBuf::from("state.json")
}
fn default_sheet_name() -> String {
    "Sheet1".to_string()
}
fn default_source_tag() -> String {
    "Stockbit".to_string()
}
fn default_classifier_model() -> String {
    "glm-4.7".to_string()
}
fn default_feed_url() -> String {
    "https://exodus.stockbit.com/stream/v3".to_string()
}
fn default_classifier_url() -> String {
    "https://api.z.ai/api/paas/v4/chat/completions".to_string()
}
fn default_telegram_base_url() -> String {
    "https://api.telegram.org".to_string()
}
fn default_sheets_base_url() -> String {
    "https://sheets.googleapis.com".to_string()
}

/// Non-secret knobs. Every field has a default so a partial TOML file works.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Tuning {
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: u32,
    /// Recency window for `filter_recent`.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Minimum gap between two classifier requests.
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    /// One unit of backoff; the classic schedule is `unit * 2^attempt`.
    #[serde(default = "default_backoff_unit_ms")]
    pub backoff_unit_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Offset the feed's naive timestamps are written in (WIB by default).
    #[serde(default = "default_feed_utc_offset_hours")]
    pub feed_utc_offset_hours: i32,
    #[serde(default = "default_run_deadline_secs")]
    pub run_deadline_secs: u64,
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
    #[serde(default = "default_sheet_name")]
    pub sheet_name: String,
    #[serde(default = "default_source_tag")]
    pub source_tag: String,
    #[serde(default = "default_classifier_model")]
    pub classifier_model: String,
    #[serde(default = "default_feed_url")]
    pub feed_url: String,
    #[serde(default = "default_classifier_url")]
    pub classifier_url: String,
    #[serde(default = "default_telegram_base_url")]
    pub telegram_base_url: String,
    #[serde(default = "default_sheets_base_url")]
    pub sheets_base_url: String,
    /// Token endpoint override; the service-account key's `token_uri` wins when absent.
    #[serde(default)]
    pub token_url: Option<String>,
    /// Write a Prometheus textfile here at the end of the run.
    #[serde(default)]
    pub metrics_textfile: Option<PathBuf>,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            fetch_limit: default_fetch_limit(),
            window_secs: default_window_secs(),
            batch_size: default_batch_size(),
            min_delay_ms: default_min_delay_ms(),
            backoff_unit_ms: default_backoff_unit_ms(),
            max_attempts: default_max_attempts(),
            feed_utc_offset_hours: default_feed_utc_offset_hours(),
            run_deadline_secs: default_run_deadline_secs(),
            state_path: default_state_path(),
            sheet_name: default_sheet_name(),
            source_tag: default_source_tag(),
            classifier_model: default_classifier_model(),
            feed_url: default_feed_url(),
            classifier_url: default_classifier_url(),
            telegram_base_url: default_telegram_base_url(),
            sheets_base_url: default_sheets_base_url(),
            token_url: None,
            metrics_textfile: None,
        }
    }
}

impl Tuning {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn backoff_unit(&self) -> Duration {
        Duration::from_millis(self.backoff_unit_ms)
    }

    pub fn run_deadline(&self) -> Duration {
        Duration::from_secs(self.run_deadline_secs)
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid {
                name: "batch_size",
                reason: "must be at least 1".into(),
            });
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                name: "max_attempts",
                reason: "must be at least 1".into(),
            });
        }
        if !(-12..=14).contains(&self.feed_utc_offset_hours) {
            return Err(ConfigError::Invalid {
                name: "feed_utc_offset_hours",
                reason: format!("{} is outside -12..=14", self.feed_utc_offset_hours),
            });
        }
        Ok(self)
    }
}

/// Parse tunables from TOML text.
pub fn parse_tuning(s: &str, origin: &str) -> Result<Tuning, ConfigError> {
    let t: Tuning = toml::from_str(s).map_err(|source| ConfigError::Toml {
        path: origin.to_string(),
        source,
    })?;
    t.validate()
}

/// Load tunables from an explicit path.
pub fn load_tuning_from(path: &Path) -> Result<Tuning, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_tuning(&content, &path.display().to_string())
}

/// Resolve tunables:
/// 1) the path in `explicit` (taken from $MONITOR_CONFIG_PATH), which must exist
/// 2) config/monitor.toml
/// 3) built-in defaults
pub fn load_tuning(explicit: Option<&str>) -> Result<Tuning, ConfigError> {
    if let Some(p) = explicit.filter(|p| !p.trim().is_empty()) {
        return load_tuning_from(Path::new(p));
    }
    let fallback = PathBuf::from(DEFAULT_TUNING_PATH);
    if fallback.exists() {
        return load_tuning_from(&fallback);
    }
    Ok(Tuning::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let t = parse_tuning("batch_size = 3\nwindow_secs = 120\n", "inline").unwrap();
        assert_eq!(t.batch_size, 3);
        assert_eq!(t.window(), Duration::from_secs(120));
        assert_eq!(t.fetch_limit, 50);
        assert_eq!(t.classifier_model, "glm-4.7");
        assert_eq!(t.state_path, PathBuf::from("state.json"));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let err = parse_tuning("batch_size = 0", "inline").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "batch_size", .. }));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = parse_tuning("batch_sise = 4", "inline").unwrap_err();
        assert!(matches!(err, ConfigError::Toml { .. }));
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let err = load_tuning(Some("/definitely/not/here/monitor.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
