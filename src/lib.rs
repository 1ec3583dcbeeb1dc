// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod analyze;
pub mod config;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod notify;
pub mod pipeline;
pub mod state;

// ---- Re-exports for stable public API ----
pub use crate::analyze::{Classification, ClassifiedReport, Classifier, ClassifierSettings, Impact, Sentiment};
pub use crate::config::{Config, Tuning};
pub use crate::error::{ClassifyError, ConfigError, SinkError, SourceError};
pub use crate::ingest::types::{ReportRecord, ReportSource};
pub use crate::notify::{AlertChannel, ReportStore};
pub use crate::pipeline::{run_once, RunOptions, RunSummary};
pub use crate::state::RunState;
