//! Chat-completion transport: trait seam + the z.ai (GLM) HTTP client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{excerpt, ClassifyError};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

/// Body of one chat-completion call. `timeout` is transport-only.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub stream: bool,
    #[serde(skip)]
    pub timeout: Duration,
}

impl ChatRequest {
    /// The user prompt, for transports that route on content.
    pub fn user_prompt(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }
}

/// One outbound classifier call. Returns the assistant message content.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<String, ClassifyError>;
    fn provider_name(&self) -> &'static str;
}

pub type DynChatTransport = Arc<dyn ChatTransport>;

/// z.ai chat-completions client (OpenAI-compatible wire format).
pub struct ZChatClient {
    http: reqwest::Client,
    url: String,
    api_key: String,
}

impl ZChatClient {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, ClassifyError> {
        let http = reqwest::Client::builder()
            .user_agent("report-monitor/0.1")
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| ClassifyError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            url: url.into(),
            api_key: api_key.into(),
        })
    }
}

#[derive(Deserialize)]
struct Resp {
    #[serde(default)]
    choices: Vec<Choice>,
}
#[derive(Deserialize)]
struct Choice {
    message: ChoiceMsg,
}
#[derive(Deserialize)]
struct ChoiceMsg {
    #[serde(default)]
    content: Option<String>,
}

/// Map HTTP status to the classifier taxonomy. 2xx passes through.
pub async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ClassifyError> {
    let status = resp.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(ClassifyError::RateLimited);
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ClassifyError::Http {
            status: status.as_u16(),
            excerpt: excerpt(&body),
        });
    }
    Ok(resp)
}

/// Pull `choices[0].message.content` out of a completion body.
pub fn extract_content(body: &str) -> Result<String, ClassifyError> {
    let parsed: Resp = serde_json::from_str(body)
        .map_err(|e| ClassifyError::Unparseable(format!("completion envelope: {e}")))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| ClassifyError::Unparseable("completion has no message content".into()))
}

#[async_trait]
impl ChatTransport for ZChatClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String, ClassifyError> {
        let resp = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .timeout(request.timeout)
            .json(request)
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let body = resp.text().await?;
        extract_content(&body)
    }

    fn provider_name(&self) -> &'static str {
        "zchat"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_response(status: u16, body: &str) -> reqwest::Response {
        reqwest::Response::from(
            ::http::Response::builder()
                .status(status)
                .body(body.to_string())
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn status_429_is_rate_limited() {
        let err = check_status(mock_response(429, "slow down")).await.unwrap_err();
        assert_eq!(err, ClassifyError::RateLimited);
    }

    #[tokio::test]
    async fn other_errors_carry_status_and_excerpt() {
        let err = check_status(mock_response(503, "upstream down"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ClassifyError::Http {
                status: 503,
                excerpt: "upstream down".into()
            }
        );
    }

    #[tokio::test]
    async fn success_passes_through() {
        assert!(check_status(mock_response(200, "{}")).await.is_ok());
    }

    #[test]
    fn content_is_extracted_from_first_choice() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"{\"impact\":\"low\"}"}}]}"#;
        assert_eq!(extract_content(body).unwrap(), r#"{"impact":"low"}"#);
    }

    #[test]
    fn empty_choices_are_unparseable() {
        let err = extract_content(r#"{"choices":[]}"#).unwrap_err();
        assert_eq!(err.kind(), "unparseable");
        let err = extract_content("<html>").unwrap_err();
        assert_eq!(err.kind(), "unparseable");
    }

    #[test]
    fn request_serializes_without_timeout() {
        let req = ChatRequest {
            model: "glm-4.7".into(),
            messages: vec![ChatMessage::system("sys"), ChatMessage::user("hi")],
            temperature: 0.3,
            stream: false,
            timeout: Duration::from_secs(30),
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["model"], "glm-4.7");
        assert_eq!(v["stream"], false);
        assert_eq!(v["messages"][1]["role"], "user");
        assert!(v.get("timeout").is_none());
        assert_eq!(req.user_prompt(), "hi");
    }
}
