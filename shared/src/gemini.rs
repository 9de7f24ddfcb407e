//! Gemini `generateContent` client.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::prompt::Prompt;
use crate::{Error, Result};

/// Failure of a single upstream attempt. Every variant is retryable.
#[derive(Error, Debug)]
pub enum UpstreamError {
    /// Network failure, timeout, or unreadable body
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-2xx HTTP status
    #[error("upstream returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// 2xx with a body that lacks the expected fields
    #[error("unexpected response shape: {0}")]
    Shape(String),
}

/// Request body for `models/{model}:generateContent`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    pub tools: Vec<serde_json::Value>,
    pub system_instruction: Content,
}

impl From<&Prompt> for GenerateContentRequest {
    fn from(prompt: &Prompt) -> Self {
        Self {
            contents: vec![Content::text(&prompt.user_query)],
            tools: vec![json!({ "google_search": {} })],
            system_instruction: Content::text(&prompt.system_instruction),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    fn text(text: &str) -> Self {
        Self {
            parts: vec![Part {
                text: Some(text.to_string()),
            }],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Response body from `generateContent`. Every level is optional so that
/// blocked or truncated answers still parse and fail shape checks instead.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub grounding_metadata: Option<GroundingMetadata>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundingMetadata {
    #[serde(default)]
    pub grounding_attributions: Vec<GroundingAttribution>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroundingAttribution {
    #[serde(default)]
    pub web: Option<WebSource>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebSource {
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

/// One call to a generative text backend.
#[async_trait]
pub trait GenerateContent: Send + Sync {
    async fn generate(
        &self,
        request: &GenerateContentRequest,
    ) -> std::result::Result<GenerateContentResponse, UpstreamError>;
}

/// HTTP client for the Gemini REST API.
pub struct GeminiClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl GeminiClient {
    /// Create a new client for `model` under `api_base`.
    pub fn new(api_base: &str, model: &str, api_key: String, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint: format!(
                "{}/models/{}:generateContent",
                api_base.trim_end_matches('/'),
                model
            ),
            api_key,
        })
    }

    /// Full endpoint URL, without the key.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl GenerateContent for GeminiClient {
    async fn generate(
        &self,
        request: &GenerateContentRequest,
    ) -> std::result::Result<GenerateContentResponse, UpstreamError> {
        let response = self
            .http
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(request)
            .send()
            .await
            // reqwest errors can carry the full URL, including the key
            .map_err(|e| UpstreamError::Transport(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body: truncate(&body, 512),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| UpstreamError::Transport(e.without_url().to_string()))?;

        serde_json::from_slice(&bytes)
            .map_err(|e| UpstreamError::Shape(format!("invalid JSON body: {}", e)))
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
