//! Google Sheets store: service-account OAuth + `values.get` / `values.append`.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::ReportStore;
use crate::analyze::types::ClassifiedReport;
use crate::error::{excerpt, SinkError};

pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const TOKEN_LIFETIME_SECS: i64 = 3_600;

pub const HEADER_ROW: [&str; 10] = [
    "Timestamp",
    "Stream ID",
    "Title",
    "Stock",
    "Report Type",
    "Impact",
    "Sentiment",
    "Reasoning",
    "Keywords",
    "Source",
];

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

/// The subset of a service-account JSON key we need.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key", &"<redacted>")
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

pub struct SheetsClient {
    http: Client,
    base_url: String,
    token_url: String,
    spreadsheet_id: String,
    sheet_name: String,
    source_tag: String,
    key: ServiceAccountKey,
}

impl SheetsClient {
    pub fn new(
        key: ServiceAccountKey,
        spreadsheet_id: impl Into<String>,
        sheet_name: impl Into<String>,
        source_tag: impl Into<String>,
    ) -> Result<Self, SinkError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(20))
            .build()?;
        Ok(Self {
            http,
            base_url: "https://sheets.googleapis.com".to_string(),
            token_url: key.token_uri.clone(),
            spreadsheet_id: spreadsheet_id.into(),
            sheet_name: sheet_name.into(),
            source_tag: source_tag.into(),
            key,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self
    }

    /// One row per report, columns as in `HEADER_ROW`.
    pub fn rows(&self, reports: &[ClassifiedReport]) -> Vec<Vec<Value>> {
        reports
            .iter()
            .map(|r| {
                vec![
                    json!(r.report.timestamp),
                    json!(r.report.stream_id),
                    json!(r.report.title),
                    json!(r.report.stock),
                    json!(r.report.report_type),
                    json!(r.impact().as_str()),
                    json!(r.sentiment().as_str()),
                    json!(r.classification.reasoning),
                    json!(r.classification.keywords.join(", ")),
                    json!(self.source_tag),
                ]
            })
            .collect()
    }

    /// Signed RS256 assertion for the token exchange.
    pub fn assertion(&self, now_unix: i64) -> Result<String, SinkError> {
        let claims = Claims {
            iss: &self.key.client_email,
            scope: SHEETS_SCOPE,
            aud: &self.token_url,
            iat: now_unix,
            exp: now_unix + TOKEN_LIFETIME_SECS,
        };
        let key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())
            .map_err(|e| SinkError::Credentials(e.to_string()))?;
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| SinkError::Credentials(e.to_string()))
    }

    async fn access_token(&self) -> Result<String, SinkError> {
        let assertion = self.assertion(chrono::Utc::now().timestamp())?;
        let resp = self
            .http
            .post(&self.token_url)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SinkError::Auth(format!("HTTP {}: {}", status.as_u16(), excerpt(&body))));
        }
        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| SinkError::Auth(format!("token response: {e}")))?;
        Ok(token.access_token)
    }

    fn values_url(&self, range_segment: &str) -> Result<Url, SinkError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| SinkError::Credentials(format!("sheets base url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| SinkError::Credentials("sheets base url cannot be a base".into()))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", self.spreadsheet_id.as_str(), "values", range_segment]);
        Ok(url)
    }

    async fn has_header(&self, token: &str) -> Result<bool, SinkError> {
        let url = self.values_url(&format!("{}!A1:J1", self.sheet_name))?;
        let resp = self.http.get(url).bearer_auth(token).send().await?;
        let resp = check(resp).await?;
        let range: ValueRange = resp.json().await?;
        Ok(range.values.iter().any(|row| !row.is_empty()))
    }

    async fn append(&self, token: &str, anchor: &str, rows: Vec<Vec<Value>>) -> Result<(), SinkError> {
        let url = self.values_url(&format!("{}!{anchor}:append", self.sheet_name))?;
        let resp = self
            .http
            .post(url)
            .bearer_auth(token)
            .query(&[("valueInputOption", "RAW")])
            .json(&json!({ "values": rows }))
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response, SinkError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(SinkError::Http {
        status: status.as_u16(),
        excerpt: excerpt(&body),
    })
}

#[async_trait]
impl ReportStore for SheetsClient {
    async fn append_reports(&self, reports: &[ClassifiedReport]) -> Result<usize, SinkError> {
        if reports.is_empty() {
            return Ok(0);
        }
        let token = self.access_token().await?;

        if !self.has_header(&token).await? {
            let header = HEADER_ROW.iter().map(|h| json!(h)).collect();
            self.append(&token, "A1", vec![header]).await?;
            tracing::info!(target: "sheets", sheet = %self.sheet_name, "header row written");
        }

        self.append(&token, "A2", self.rows(reports)).await?;
        tracing::info!(target: "sheets", rows = reports.len(), "reports appended");
        Ok(reports.len())
    }

    fn name(&self) -> &'static str {
        "sheets"
    }
}
