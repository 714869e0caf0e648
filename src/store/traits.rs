//! Storage traits — async persistence seams for actions and exemplars.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::actions::model::Action;
use crate::classify::types::EmailCategory;
use crate::error::DatabaseError;

/// A previously classified email with its stored embedding, used as a
/// few-shot exemplar during escalation.
#[derive(Debug, Clone)]
pub struct StoredExemplar {
    pub message_id: String,
    pub from_email: String,
    pub subject: String,
    pub body_text: String,
    pub category: EmailCategory,
    pub confidence: f32,
    pub embedding: Vec<f32>,
}

/// Persistence for action records.
///
/// `claim_executing` is the single-writer guarantee: the pending→executing
/// transition happens as a conditional update at the storage layer, so only
/// one executor can ever own an in-flight action.
#[async_trait]
pub trait ActionStore: Send + Sync {
    /// Insert a freshly created (pending) action.
    async fn insert_action(&self, action: &Action) -> Result<(), DatabaseError>;

    /// Fetch an action by id.
    async fn get_action(&self, id: Uuid) -> Result<Option<Action>, DatabaseError>;

    /// Conditionally transition pending → executing.
    ///
    /// Returns `true` when this caller won the claim; `false` when the
    /// action is no longer pending (already claimed, completed, or failed).
    async fn claim_executing(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, DatabaseError>;

    /// Persist a completed action — status, ERP reference, payload summary,
    /// and timestamp in one write.
    async fn record_completed(&self, action: &Action) -> Result<(), DatabaseError>;

    /// Persist a failed action — status, error message, retry count, and
    /// timestamp in one write.
    async fn record_failed(&self, action: &Action) -> Result<(), DatabaseError>;

    /// Actions stuck in `executing` since before `older_than` — candidates
    /// for external reconciliation.
    async fn stale_executing(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Action>, DatabaseError>;
}

/// Persistence for classified emails and their embeddings.
#[async_trait]
pub trait ExemplarStore: Send + Sync {
    /// Upsert a classified email so it can serve as a future exemplar.
    async fn insert_classified(
        &self,
        message_id: &str,
        from_email: &str,
        subject: &str,
        body_text: &str,
        category: EmailCategory,
        confidence: f32,
        received_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    /// Attach an embedding vector to a stored email.
    async fn store_embedding(
        &self,
        message_id: &str,
        embedding: &[f32],
    ) -> Result<(), DatabaseError>;

    /// All classified emails that have an embedding, most recent first,
    /// up to `limit`.
    async fn classified_exemplars(&self, limit: usize)
        -> Result<Vec<StoredExemplar>, DatabaseError>;
}
