//! HTTP client for an Ollama-compatible embedding endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::EmbeddingError;

/// Configuration for the embedding client.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Base URL of the endpoint.
    pub host: String,
    /// Embedding model identifier.
    pub model: String,
    /// Expected vector dimensionality; mismatched responses are rejected.
    pub dimensions: usize,
    /// Hard per-request timeout.
    pub timeout: Duration,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:11434".to_string(),
            model: "nomic-embed-text:latest".to_string(),
            dimensions: 768,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Abstraction over the embedding endpoint.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Expected vector length.
    fn dimensions(&self) -> usize;

    /// Embed a text into a fixed-dimension vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

#[derive(Debug, Serialize)]
struct EmbedPayload<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

/// Async HTTP client for the embedding endpoint.
pub struct OllamaEmbeddings {
    http: reqwest::Client,
    config: EmbeddingConfig,
}

impl OllamaEmbeddings {
    pub fn new(config: EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| EmbeddingError::RequestFailed(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }
}

#[async_trait]
impl EmbeddingClient for OllamaEmbeddings {
    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let payload = EmbedPayload {
            model: &self.config.model,
            prompt: text,
        };

        let url = format!("{}/api/embeddings", self.config.host);
        let resp = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| EmbeddingError::RequestFailed(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(EmbeddingError::BadStatus(resp.status().as_u16()));
        }

        let body: EmbedResponse = resp
            .json()
            .await
            .map_err(|e| EmbeddingError::RequestFailed(e.to_string()))?;

        if body.embedding.len() != self.config.dimensions {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.config.dimensions,
                actual: body.embedding.len(),
            });
        }

        debug!(
            chars = text.len(),
            dims = body.embedding.len(),
            "Embedded text"
        );
        Ok(body.embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = EmbeddingConfig::default();
        assert_eq!(config.dimensions, 768);
    }

    #[tokio::test]
    async fn unreachable_endpoint_errors() {
        let client = OllamaEmbeddings::new(EmbeddingConfig {
            host: "http://127.0.0.1:1".to_string(),
            timeout: Duration::from_millis(200),
            ..Default::default()
        })
        .unwrap();
        assert!(matches!(
            client.embed("hello").await,
            Err(EmbeddingError::RequestFailed(_))
        ));
    }
}
