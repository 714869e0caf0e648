//! libSQL backend — async implementation of the storage traits.
//!
//! Stores a single connection reused for all operations;
//! `libsql::Connection` is `Send + Sync` and safe for concurrent async use.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::actions::model::{Action, ActionStatus};
use crate::classify::types::{ActionType, EmailCategory};
use crate::error::DatabaseError;
use crate::store::traits::{ActionStore, ExemplarStore, StoredExemplar};

/// libSQL storage backend for actions and exemplars.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and initialize the schema.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Open(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Open(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Open(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| DatabaseError::Open(format!("Failed to create in-memory database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Open(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), DatabaseError> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS email_actions (
                    id TEXT PRIMARY KEY,
                    email_id TEXT NOT NULL,
                    action_type TEXT NOT NULL,
                    payload TEXT,
                    status TEXT NOT NULL DEFAULT 'pending',
                    retry_count INTEGER NOT NULL DEFAULT 0,
                    error_message TEXT,
                    erp_entity_type TEXT,
                    erp_entity_id TEXT,
                    executed_at TEXT,
                    created_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_actions_status ON email_actions(status);
                CREATE INDEX IF NOT EXISTS idx_actions_email ON email_actions(email_id);

                CREATE TABLE IF NOT EXISTS classified_emails (
                    message_id TEXT PRIMARY KEY,
                    from_email TEXT NOT NULL,
                    subject TEXT NOT NULL DEFAULT '',
                    body_text TEXT NOT NULL DEFAULT '',
                    category TEXT,
                    confidence REAL,
                    embedding TEXT,
                    received_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_classified_category
                    ON classified_emails(category);",
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("Schema init failed: {e}")))?;
        debug!("Database schema initialized");
        Ok(())
    }
}

// ── Row helpers ─────────────────────────────────────────────────────

/// Parse an RFC 3339 datetime string written by this store.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn action_from_row(row: &libsql::Row) -> Result<Action, DatabaseError> {
    let id: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(e.to_string()))?;
    let email_id: String = row
        .get(1)
        .map_err(|e| DatabaseError::Query(e.to_string()))?;
    let action_type: String = row
        .get(2)
        .map_err(|e| DatabaseError::Query(e.to_string()))?;
    let payload: Option<String> = row
        .get(3)
        .map_err(|e| DatabaseError::Query(e.to_string()))?;
    let status: String = row
        .get(4)
        .map_err(|e| DatabaseError::Query(e.to_string()))?;
    let retry_count: i64 = row
        .get(5)
        .map_err(|e| DatabaseError::Query(e.to_string()))?;
    let error_message: Option<String> = row
        .get(6)
        .map_err(|e| DatabaseError::Query(e.to_string()))?;
    let erp_entity_type: Option<String> = row
        .get(7)
        .map_err(|e| DatabaseError::Query(e.to_string()))?;
    let erp_entity_id: Option<String> = row
        .get(8)
        .map_err(|e| DatabaseError::Query(e.to_string()))?;
    let executed_at: Option<String> = row
        .get(9)
        .map_err(|e| DatabaseError::Query(e.to_string()))?;
    let created_at: String = row
        .get(10)
        .map_err(|e| DatabaseError::Query(e.to_string()))?;

    Ok(Action {
        id: Uuid::parse_str(&id)
            .map_err(|e| DatabaseError::Serialization(format!("bad action id: {e}")))?,
        email_id,
        action_type: ActionType::from_str(&action_type).ok_or_else(|| {
            DatabaseError::Serialization(format!("unknown action type: {action_type}"))
        })?,
        payload: payload
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| DatabaseError::Serialization(format!("bad payload JSON: {e}")))?
            .unwrap_or(serde_json::Value::Null),
        status: ActionStatus::from_str(&status)
            .ok_or_else(|| DatabaseError::Serialization(format!("unknown status: {status}")))?,
        retry_count: retry_count.max(0) as u32,
        error_message,
        erp_entity_type,
        erp_entity_id: erp_entity_id
            .as_deref()
            .map(Uuid::parse_str)
            .transpose()
            .map_err(|e| DatabaseError::Serialization(format!("bad entity id: {e}")))?,
        executed_at: executed_at.as_deref().map(parse_datetime),
        created_at: parse_datetime(&created_at),
    })
}

// ── ActionStore ─────────────────────────────────────────────────────

#[async_trait]
impl ActionStore for LibSqlStore {
    async fn insert_action(&self, action: &Action) -> Result<(), DatabaseError> {
        let payload = serde_json::to_string(&action.payload)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        self.conn
            .execute(
                "INSERT INTO email_actions
                    (id, email_id, action_type, payload, status, retry_count, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    action.id.to_string(),
                    action.email_id.clone(),
                    action.action_type.as_str(),
                    payload,
                    action.status.as_str(),
                    action.retry_count as i64,
                    action.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert action: {e}")))?;
        Ok(())
    }

    async fn get_action(&self, id: Uuid) -> Result<Option<Action>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, email_id, action_type, payload, status, retry_count,
                        error_message, erp_entity_type, erp_entity_id, executed_at, created_at
                 FROM email_actions WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get action: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?
        {
            Some(row) => Ok(Some(action_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn claim_executing(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, DatabaseError> {
        // Conditional transition: only one caller can move pending → executing.
        let changed = self
            .conn
            .execute(
                "UPDATE email_actions
                 SET status = 'executing', executed_at = ?2
                 WHERE id = ?1 AND status = 'pending'",
                params![id.to_string(), at.to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("claim action: {e}")))?;
        Ok(changed == 1)
    }

    async fn record_completed(&self, action: &Action) -> Result<(), DatabaseError> {
        let payload = serde_json::to_string(&action.payload)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let changed = self
            .conn
            .execute(
                "UPDATE email_actions
                 SET status = 'completed', erp_entity_type = ?2, erp_entity_id = ?3,
                     payload = ?4, executed_at = ?5
                 WHERE id = ?1 AND status = 'executing'",
                params![
                    action.id.to_string(),
                    action.erp_entity_type.clone(),
                    action.erp_entity_id.map(|u| u.to_string()),
                    payload,
                    action
                        .executed_at
                        .unwrap_or_else(Utc::now)
                        .to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record completed: {e}")))?;
        if changed != 1 {
            return Err(DatabaseError::Query(format!(
                "action {} was not in executing state",
                action.id
            )));
        }
        Ok(())
    }

    async fn record_failed(&self, action: &Action) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "UPDATE email_actions
                 SET status = 'failed', error_message = ?2, retry_count = ?3, executed_at = ?4
                 WHERE id = ?1",
                params![
                    action.id.to_string(),
                    action.error_message.clone(),
                    action.retry_count as i64,
                    action
                        .executed_at
                        .unwrap_or_else(Utc::now)
                        .to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record failed: {e}")))?;
        Ok(())
    }

    async fn stale_executing(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Action>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, email_id, action_type, payload, status, retry_count,
                        error_message, erp_entity_type, erp_entity_id, executed_at, created_at
                 FROM email_actions
                 WHERE status = 'executing' AND executed_at < ?1",
                params![older_than.to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("stale executing: {e}")))?;

        let mut actions = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?
        {
            actions.push(action_from_row(&row)?);
        }
        Ok(actions)
    }
}

// ── ExemplarStore ───────────────────────────────────────────────────

#[async_trait]
impl ExemplarStore for LibSqlStore {
    async fn insert_classified(
        &self,
        message_id: &str,
        from_email: &str,
        subject: &str,
        body_text: &str,
        category: EmailCategory,
        confidence: f32,
        received_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT INTO classified_emails
                    (message_id, from_email, subject, body_text, category, confidence, received_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(message_id) DO UPDATE SET
                    category = excluded.category,
                    confidence = excluded.confidence",
                params![
                    message_id,
                    from_email,
                    subject,
                    body_text,
                    category.as_str(),
                    confidence as f64,
                    received_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert classified: {e}")))?;
        Ok(())
    }

    async fn store_embedding(
        &self,
        message_id: &str,
        embedding: &[f32],
    ) -> Result<(), DatabaseError> {
        let encoded = serde_json::to_string(embedding)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        self.conn
            .execute(
                "UPDATE classified_emails SET embedding = ?2 WHERE message_id = ?1",
                params![message_id, encoded],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("store embedding: {e}")))?;
        Ok(())
    }

    async fn classified_exemplars(
        &self,
        limit: usize,
    ) -> Result<Vec<StoredExemplar>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT message_id, from_email, subject, body_text, category, confidence, embedding
                 FROM classified_emails
                 WHERE category IS NOT NULL AND embedding IS NOT NULL
                 ORDER BY received_at DESC
                 LIMIT ?1",
                params![limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("classified exemplars: {e}")))?;

        let mut exemplars = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?
        {
            let message_id: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;
            let from_email: String = row
                .get(1)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;
            let subject: String = row
                .get(2)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;
            let body_text: String = row
                .get(3)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;
            let category: String = row
                .get(4)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;
            let confidence: f64 = row
                .get(5)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;
            let embedding: String = row
                .get(6)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            let embedding: Vec<f32> = serde_json::from_str(&embedding)
                .map_err(|e| DatabaseError::Serialization(format!("bad embedding JSON: {e}")))?;

            exemplars.push(StoredExemplar {
                message_id,
                from_email,
                subject,
                body_text,
                category: EmailCategory::from_label(&category),
                confidence: confidence as f32,
                embedding,
            });
        }
        Ok(exemplars)
    }
}
