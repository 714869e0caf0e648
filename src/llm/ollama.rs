//! HTTP client for an Ollama-compatible chat endpoint.
//!
//! Retries are an iterative bounded loop with `2^attempt` seconds of backoff
//! and a hard per-request timeout — a failed call can never block a caller
//! indefinitely or grow the stack.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::LlmError;
use crate::llm::{CompletionClient, CompletionRequest};

/// Configuration for the completion client.
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    /// Base URL of the endpoint, e.g. `http://localhost:11434`.
    pub host: String,
    /// Model identifier, e.g. `mistral:7b`.
    pub model: String,
    /// Hard per-request timeout.
    pub timeout: Duration,
    /// Maximum attempts before giving up.
    pub max_retries: u32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:11434".to_string(),
            model: "mistral:7b".to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatPayload<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    stream: bool,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: ChatResponseMessage,
}

#[derive(Debug, Default, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

/// Async HTTP client for the chat endpoint.
pub struct OllamaClient {
    http: reqwest::Client,
    config: OllamaConfig,
}

impl OllamaClient {
    pub fn new(config: OllamaConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::RequestFailed(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    /// Check whether the endpoint is reachable.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/api/tags", self.config.host);
        match self.http.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!(error = %e, "Completion endpoint health check failed");
                false
            }
        }
    }

    async fn send_once(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(ref system) = request.system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });

        let payload = ChatPayload {
            model: &self.config.model,
            messages,
            temperature: request.temperature,
            stream: false,
            num_predict: request.max_tokens,
        };

        let url = format!("{}/api/chat", self.config.host);
        let resp = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(LlmError::BadStatus(resp.status().as_u16()));
        }

        let body: ChatResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        if body.message.content.is_empty() {
            return Err(LlmError::InvalidResponse("empty completion".into()));
        }

        Ok(body.message.content)
    }
}

#[async_trait]
impl CompletionClient for OllamaClient {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        let mut attempt = 0u32;
        loop {
            match self.send_once(&request).await {
                Ok(text) => {
                    debug!(
                        model = %self.config.model,
                        chars = text.len(),
                        attempt,
                        "Completion received"
                    );
                    return Ok(text);
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.config.max_retries {
                        warn!(
                            model = %self.config.model,
                            attempts = attempt,
                            error = %e,
                            "Completion retries exhausted"
                        );
                        return Err(LlmError::RetriesExhausted { attempts: attempt });
                    }
                    let backoff = Duration::from_secs(2u64.pow(attempt - 1));
                    warn!(
                        model = %self.config.model,
                        attempt,
                        backoff_s = backoff.as_secs(),
                        error = %e,
                        "Completion attempt failed, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = OllamaConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn client_constructs() {
        let client = OllamaClient::new(OllamaConfig::default()).unwrap();
        assert_eq!(client.model_name(), "mistral:7b");
    }

    #[tokio::test]
    async fn unreachable_endpoint_exhausts_retries() {
        // Port 1 refuses connections immediately, so retries stay fast.
        let client = OllamaClient::new(OllamaConfig {
            host: "http://127.0.0.1:1".to_string(),
            model: "test".to_string(),
            timeout: Duration::from_millis(200),
            max_retries: 1,
        })
        .unwrap();

        let err = client
            .complete(CompletionRequest::new("hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::RetriesExhausted { attempts: 1 }));
    }

    #[tokio::test]
    async fn health_check_false_when_unreachable() {
        let client = OllamaClient::new(OllamaConfig {
            host: "http://127.0.0.1:1".to_string(),
            model: "test".to_string(),
            timeout: Duration::from_millis(200),
            max_retries: 1,
        })
        .unwrap();
        assert!(!client.health_check().await);
    }
}
