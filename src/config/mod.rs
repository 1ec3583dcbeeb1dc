//! Run configuration: secrets from the environment plus tunables from TOML.
//!
//! Built once in `main` and handed to each component by reference.

pub mod tuning;

use base64::Engine as _;

use crate::error::ConfigError;
use crate::notify::sheets::ServiceAccountKey;

pub use tuning::{load_tuning, load_tuning_from, parse_tuning, Tuning, ENV_TUNING_PATH};

pub const ENV_STOCKBIT_TOKEN: &str = "STOCKBIT_TOKEN";
pub const ENV_ZCHAT_API_KEY: &str = "ZCHAT_API_KEY";
pub const ENV_SPREADSHEET_ID: &str = "SPREADSHEET_ID";
pub const ENV_GOOGLE_CREDENTIALS: &str = "GOOGLE_CREDENTIALS";
pub const ENV_TELEGRAM_BOT_TOKEN: &str = "TELEGRAM_BOT_TOKEN";
pub const ENV_TELEGRAM_CHAT_ID: &str = "TELEGRAM_CHAT_ID";
pub const ENV_DRY_RUN: &str = "DRY_RUN";

#[derive(Debug, Clone)]
pub struct Config {
    pub stockbit_token: String,
    pub classifier_api_key: String,
    pub spreadsheet_id: String,
    pub google_credentials: ServiceAccountKey,
    pub telegram_bot_token: String,
    pub telegram_chat_id: String,
    /// Classify but leave both sinks untouched.
    pub dry_run: bool,
    pub tuning: Tuning,
}

impl Config {
    /// Build from the process environment (call `dotenvy::dotenv()` first).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from an arbitrary key lookup. Required values are checked in the
    /// order the run needs them; the first missing one is reported.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| -> Result<String, ConfigError> {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing(name))
        };

        let stockbit_token = required(ENV_STOCKBIT_TOKEN)?;
        let spreadsheet_id = required(ENV_SPREADSHEET_ID)?;
        let telegram_bot_token = required(ENV_TELEGRAM_BOT_TOKEN)?;
        let telegram_chat_id = required(ENV_TELEGRAM_CHAT_ID)?;
        let classifier_api_key = required(ENV_ZCHAT_API_KEY)?;
        let google_credentials = decode_credentials(&required(ENV_GOOGLE_CREDENTIALS)?)?;

        let dry_run = lookup(ENV_DRY_RUN)
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1"))
            .unwrap_or(false);

        let tuning = load_tuning(lookup(ENV_TUNING_PATH).as_deref())?;

        Ok(Self {
            stockbit_token,
            classifier_api_key,
            spreadsheet_id,
            google_credentials,
            telegram_bot_token,
            telegram_chat_id,
            dry_run,
            tuning,
        })
    }

    /// Safe one-line diagnostics: no secret values, only their lengths.
    pub fn log_summary(&self) {
        tracing::info!(
            target: "config",
            stockbit_token_len = self.stockbit_token.len(),
            classifier_key_len = self.classifier_api_key.len(),
            service_account = %self.google_credentials.client_email,
            dry_run = self.dry_run,
            batch_size = self.tuning.batch_size,
            window_secs = self.tuning.window_secs,
            min_delay_ms = self.tuning.min_delay_ms,
            "config loaded"
        );
    }
}

/// Service-account JSON, either base64-encoded or raw.
pub fn decode_credentials(raw: &str) -> Result<ServiceAccountKey, ConfigError> {
    let trimmed = raw.trim();
    if let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(trimmed) {
        if let Ok(text) = String::from_utf8(bytes) {
            if let Ok(key) = serde_json::from_str::<ServiceAccountKey>(&text) {
                return Ok(key);
            }
        }
    }
    serde_json::from_str::<ServiceAccountKey>(trimmed).map_err(|e| ConfigError::Invalid {
        name: ENV_GOOGLE_CREDENTIALS,
        reason: format!("neither base64 nor JSON service-account key ({e})"),
    })
}
