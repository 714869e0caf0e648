//! Completion-endpoint integration for the escalation classifier.
//!
//! The [`CompletionClient`] trait is the seam the escalation classifier
//! talks through; [`ollama::OllamaClient`] is the production implementation
//! against an Ollama-compatible chat endpoint.

pub mod ollama;

pub use ollama::{OllamaClient, OllamaConfig};

use async_trait::async_trait;

use crate::error::LlmError;

/// A chat completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Optional system instruction.
    pub system: Option<String>,
    /// User prompt.
    pub prompt: String,
    /// Sampling temperature (lower = more deterministic).
    pub temperature: f32,
    /// Output-length budget in tokens.
    pub max_tokens: u32,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            temperature: 0.3,
            max_tokens: 500,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Abstraction over a chat-completion endpoint.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Model identifier, for logging.
    fn model_name(&self) -> &str;

    /// Request a completion. Implementations own their timeout and retry
    /// policy; a returned error means the budget is exhausted.
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError>;
}
