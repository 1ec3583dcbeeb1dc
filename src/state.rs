//! Persisted watermark between runs.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::ingest::types::ReportRecord;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    /// Highest stream id seen by a successful fetch.
    #[serde(default)]
    pub last_stream_id: u64,
    /// RFC 3339 time of the last completed run.
    #[serde(default)]
    pub last_run: Option<String>,
}

impl RunState {
    /// A missing file is a first run. A corrupt one is logged and ignored.
    pub fn load(path: &Path) -> Self {
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                tracing::warn!(target: "state", path = %path.display(), error = %e, "state unreadable, starting fresh");
                return Self::default();
            }
        };
        serde_json::from_str(&text).unwrap_or_else(|e| {
            tracing::warn!(target: "state", path = %path.display(), error = %e, "state corrupt, starting fresh");
            Self::default()
        })
    }

    /// Write via a sibling tmp file and rename.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating state dir {}", dir.display()))?;
        }
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(self)?;
        fs::write(&tmp, body).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, path).with_context(|| format!("renaming onto {}", path.display()))?;
        Ok(())
    }

    /// Next state after a successful fetch: max id of everything fetched,
    /// or the previous watermark when the feed was empty.
    pub fn advance(&self, fetched: &[ReportRecord], now_rfc3339: String) -> Self {
        let max = crate::ingest::max_stream_id(fetched).unwrap_or(self.last_stream_id);
        Self {
            last_stream_id: max,
            last_run: Some(now_rfc3339),
        }
    }
}
