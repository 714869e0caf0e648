//! Error types for mailbridge.

use std::path::PathBuf;

use uuid::Uuid;

/// Top-level error type for the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Rule catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("ERP error: {0}")]
    Erp(#[from] ErpError),

    #[error("Action error: {0}")]
    Action(#[from] ActionError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Rule catalog errors — all fatal at load time.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Rules file not found: {0}")]
    NotFound(PathBuf),

    #[error("Empty rules configuration")]
    Empty,

    #[error("No rules found in configuration")]
    NoRules,

    #[error("Unknown category '{0}' in rules configuration")]
    UnknownCategory(String),

    #[error("Rule '{0}' has no keywords, patterns or sender patterns")]
    NoSignals(String),

    #[error("Failed to parse rules configuration: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Failed to open database: {0}")]
    Open(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Completion-endpoint errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Completion request failed: {0}")]
    RequestFailed(String),

    #[error("Completion endpoint returned status {0}")]
    BadStatus(u16),

    #[error("Invalid completion response: {0}")]
    InvalidResponse(String),

    #[error("Retries exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
}

/// Embedding-endpoint errors.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Embedding request failed: {0}")]
    RequestFailed(String),

    #[error("Embedding endpoint returned status {0}")]
    BadStatus(u16),

    #[error("Unexpected embedding dimensions: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// ERP client errors.
///
/// The three variants carry the taxonomy an external retry policy needs:
/// validation errors are non-retryable bad input, connection errors are
/// retryable, client errors are everything else.
#[derive(Debug, thiserror::Error)]
pub enum ErpError {
    #[error("ERP validation error: {0}")]
    Validation(String),

    #[error("ERP connection error: {0}")]
    Connection(String),

    #[error("ERP client error: {0}")]
    Client(String),
}

/// Action state-machine errors.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("Action {id} already in state {from}, cannot transition to {to}")]
    InvalidTransition { id: Uuid, from: String, to: String },
}

/// Pipeline-related errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Action setup failed: {0}")]
    ActionSetup(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Result type alias for the pipeline.
pub type Result<T> = std::result::Result<T, Error>;
