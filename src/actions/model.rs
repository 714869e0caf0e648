//! Action record — the persisted state machine driven by the executor.
//!
//! Status flow: `pending → executing → {completed, failed}`. There is no
//! direct pending→completed or pending→failed edge through `mark_completed`;
//! an action must be claimed (executing) before any external side effect.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classify::types::ActionType;
use crate::error::ActionError;

/// Action lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "executing" => Some(Self::Executing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted ERP action derived from an email classification.
///
/// Mutated only through the state-machine methods below; the store writes
/// each transition together with its accompanying fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: Uuid,
    /// Message ID of the originating email.
    pub email_id: String,
    pub action_type: ActionType,
    /// Action-specific payload (extracted fields, caller context).
    pub payload: serde_json::Value,
    pub status: ActionStatus,
    /// Incremented by exactly 1 per failed attempt; never reset here.
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub erp_entity_type: Option<String>,
    pub erp_entity_id: Option<Uuid>,
    pub executed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Action {
    /// Create a new pending action.
    pub fn new(email_id: impl Into<String>, action_type: ActionType, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            email_id: email_id.into(),
            action_type,
            payload,
            status: ActionStatus::Pending,
            retry_count: 0,
            error_message: None,
            erp_entity_type: None,
            erp_entity_id: None,
            executed_at: None,
            created_at: Utc::now(),
        }
    }

    /// Transition pending → executing, stamping the execution timestamp.
    ///
    /// Must be called before any external side effect.
    pub fn mark_executing(&mut self) -> Result<(), ActionError> {
        if self.status != ActionStatus::Pending {
            return Err(ActionError::InvalidTransition {
                id: self.id,
                from: self.status.to_string(),
                to: ActionStatus::Executing.to_string(),
            });
        }
        self.status = ActionStatus::Executing;
        self.executed_at = Some(Utc::now());
        Ok(())
    }

    /// Transition executing → completed, stamping the ERP reference.
    pub fn mark_completed(
        &mut self,
        erp_entity_type: impl Into<String>,
        erp_entity_id: Uuid,
    ) -> Result<(), ActionError> {
        if self.status != ActionStatus::Executing {
            return Err(ActionError::InvalidTransition {
                id: self.id,
                from: self.status.to_string(),
                to: ActionStatus::Completed.to_string(),
            });
        }
        self.status = ActionStatus::Completed;
        self.erp_entity_type = Some(erp_entity_type.into());
        self.erp_entity_id = Some(erp_entity_id);
        self.executed_at = Some(Utc::now());
        Ok(())
    }

    /// Transition any state → failed, incrementing the retry counter by
    /// exactly 1 and recording the error message.
    pub fn mark_failed(&mut self, error_message: impl Into<String>) {
        self.status = ActionStatus::Failed;
        self.error_message = Some(error_message.into());
        self.retry_count += 1;
        self.executed_at = Some(Utc::now());
    }
}
