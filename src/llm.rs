//! Chat model client.
//!
//! [`ChatModel`] is the seam the pipeline talks to; [`OllamaClient`] is the
//! implementation for a local model server:
//!
//! | Operation | Endpoint |
//! |-----------|----------|
//! | [`list_models`](ChatModel::list_models) | `GET /api/tags` |
//! | [`complete`](ChatModel::complete) | `POST /api/chat` (non-streaming) |
//!
//! Requests are retried on 429, 5xx and network errors with the same
//! exponential backoff as embeddings. Other 4xx responses fail at once.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::LlmConfig;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("cannot reach model server at {url}: {message}")]
    Connection { url: String, message: String },
    #[error("model server returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("invalid response from model server: {0}")]
    InvalidResponse(String),
}

pub type LlmResult<T> = std::result::Result<T, LlmError>;

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Names of the locally available models.
    async fn list_models(&self) -> LlmResult<Vec<String>>;
    /// Single-turn completion of `prompt` with `model`.
    async fn complete(&self, model: &str, prompt: &str) -> LlmResult<String>;
}

pub struct OllamaClient {
    client: reqwest::Client,
    url: String,
    temperature: f32,
    max_retries: u32,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    name: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: Option<ChatResponseMessage>,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

impl OllamaClient {
    pub fn new(config: &LlmConfig) -> LlmResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Connection {
                url: config.url.clone(),
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }

    /// Send a request built by `build`, retrying transient failures, and
    /// return the successful response body.
    async fn send_with_retry<F>(&self, build: F) -> LlmResult<String>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            match build().send().await {
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();

                    if status.is_success() {
                        return Ok(body);
                    }

                    let err = LlmError::Api {
                        status: status.as_u16(),
                        body,
                    };
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(%status, attempt, "model server request failed, retrying");
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    warn!(error = %e, attempt, "model server unreachable, retrying");
                    last_err = Some(LlmError::Connection {
                        url: self.url.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            LlmError::InvalidResponse("request failed after retries".to_string())
        }))
    }
}

#[async_trait]
impl ChatModel for OllamaClient {
    async fn list_models(&self) -> LlmResult<Vec<String>> {
        let url = format!("{}/api/tags", self.url);
        let body = self.send_with_retry(|| self.client.get(&url)).await?;
        let tags: TagsResponse =
            serde_json::from_str(&body).map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    async fn complete(&self, model: &str, prompt: &str) -> LlmResult<String> {
        let url = format!("{}/api/chat", self.url);
        let payload = serde_json::json!({
            "model": model,
            "messages": [{ "role": "user", "content": prompt }],
            "stream": false,
            "options": { "temperature": self.temperature },
        });

        debug!(model, prompt_chars = prompt.chars().count(), "sending chat request");
        let body = self
            .send_with_retry(|| self.client.post(&url).json(&payload))
            .await?;

        let parsed: ChatResponse =
            serde_json::from_str(&body).map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        parsed
            .message
            .map(|m| m.content)
            .ok_or_else(|| LlmError::InvalidResponse("missing message in chat response".into()))
    }
}
