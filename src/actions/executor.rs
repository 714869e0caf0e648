//! Action executor — turns a classification into an idempotent, retryable
//! ERP side effect.
//!
//! Execution sequence per action: claim (conditional pending→executing at
//! the store) → extract fields missing from the payload → validate required
//! identifiers → call the ERP client → record the outcome. Every failure is
//! converted into a failed action at this boundary; one action's fault never
//! aborts processing of others.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::actions::model::{Action, ActionStatus};
use crate::classify::types::{ActionType, EmailDocument};
use crate::erp::{ErpClient, OrderItem};
use crate::error::ErpError;
use crate::extract::{InvoiceExtractor, OrderExtractor};
use crate::store::ActionStore;

/// Outcome status of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionResultStatus {
    Success,
    Failed,
    /// Another executor owns this action; nothing was done.
    Skipped,
}

/// Result of one execution attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ActionResult {
    pub status: ActionResultStatus,
    pub erp_entity_id: Option<Uuid>,
    pub message: Option<String>,
    pub error: Option<String>,
}

impl ActionResult {
    fn success(erp_entity_id: Uuid, message: String) -> Self {
        Self {
            status: ActionResultStatus::Success,
            erp_entity_id: Some(erp_entity_id),
            message: Some(message),
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            status: ActionResultStatus::Failed,
            erp_entity_id: None,
            message: None,
            error: Some(error),
        }
    }

    fn skipped() -> Self {
        Self {
            status: ActionResultStatus::Skipped,
            erp_entity_id: None,
            message: None,
            error: None,
        }
    }
}

/// What a successful dispatch hands back for bookkeeping.
struct Completed {
    entity_type: &'static str,
    entity_id: Uuid,
    summary: serde_json::Value,
    message: String,
}

/// Drives persisted actions through the state machine against the ERP.
pub struct ActionExecutor {
    erp: Arc<dyn ErpClient>,
    store: Arc<dyn ActionStore>,
    invoice_extractor: InvoiceExtractor,
    order_extractor: OrderExtractor,
}

impl ActionExecutor {
    pub fn new(erp: Arc<dyn ErpClient>, store: Arc<dyn ActionStore>) -> Self {
        Self {
            erp,
            store,
            invoice_extractor: InvoiceExtractor::new(),
            order_extractor: OrderExtractor::new(),
        }
    }

    /// Execute one action. Never returns an error — failures become failed
    /// actions with the cause recorded verbatim.
    pub async fn execute(&self, action: &mut Action, email: &EmailDocument) -> ActionResult {
        info!(
            action_id = %action.id,
            action_type = %action.action_type,
            email_id = %action.email_id,
            "Executing action"
        );

        // Claim at the persistence layer: only one executor can move the
        // action out of pending.
        match self.store.claim_executing(action.id, Utc::now()).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(action_id = %action.id, "Action not pending, skipping");
                return ActionResult::skipped();
            }
            Err(e) => {
                return self.fail(action, format!("Failed to claim action: {e}")).await;
            }
        }

        if action.status == ActionStatus::Pending {
            // Mirror the store transition on the in-memory record.
            if let Err(e) = action.mark_executing() {
                return self.fail(action, e.to_string()).await;
            }
        }

        let outcome = match action.action_type {
            ActionType::CreateOrder => self.create_order(action, email).await,
            ActionType::UpdateInvoice => self.update_invoice(action, email).await,
            ActionType::CreateTicket => self.create_ticket(action, email).await,
        };

        match outcome {
            Ok(done) => {
                if let Err(e) = action.mark_completed(done.entity_type, done.entity_id) {
                    return self.fail(action, e.to_string()).await;
                }
                action.payload = done.summary;
                if let Err(e) = self.store.record_completed(action).await {
                    // The ERP side effect happened; the stale-executing sweep
                    // picks up rows whose completion write was lost.
                    error!(action_id = %action.id, error = %e, "Failed to persist completion");
                }
                info!(
                    action_id = %action.id,
                    entity_type = done.entity_type,
                    entity_id = %done.entity_id,
                    "Action completed"
                );
                ActionResult::success(done.entity_id, done.message)
            }
            Err(message) => self.fail(action, message).await,
        }
    }

    /// Mark an action failed, persist the transition, and build the result.
    async fn fail(&self, action: &mut Action, message: String) -> ActionResult {
        error!(action_id = %action.id, error = %message, "Action failed");
        action.mark_failed(&message);
        if let Err(e) = self.store.record_failed(action).await {
            error!(action_id = %action.id, error = %e, "Failed to persist failure");
        }
        ActionResult::failed(message)
    }

    // ── create_order ────────────────────────────────────────────────

    async fn create_order(
        &self,
        action: &Action,
        email: &EmailDocument,
    ) -> Result<Completed, String> {
        let items = self.order_items(action, email);
        if items.is_empty() {
            return Err("Could not parse order items".to_string());
        }

        let customer_id = required_uuid(&action.payload, "customer_id")?;

        let order = self
            .erp
            .create_order(customer_id, items, "email", Some(&email.message_id))
            .await
            .map_err(|e| e.to_string())?;

        let summary = serde_json::json!({
            "order_number": order.number,
            "items_count": order.items.len(),
            "total_amount": order.total_amount,
        });
        let message = format!(
            "Order {} created with {} items",
            order.number,
            order.items.len()
        );
        Ok(Completed {
            entity_type: "Order",
            entity_id: order.id,
            summary,
            message,
        })
    }

    /// Order items from the action payload, falling back to extraction from
    /// the email text.
    fn order_items(&self, action: &Action, email: &EmailDocument) -> Vec<OrderItem> {
        if let Some(items) = action.payload.get("items")
            && let Ok(parsed) = serde_json::from_value::<Vec<OrderItem>>(items.clone())
            && !parsed.is_empty()
        {
            return parsed;
        }

        let text = format!("{}\n{}", email.subject, email.body_text);
        self.order_extractor
            .extract_line_items(&text)
            .into_iter()
            .map(|item| OrderItem {
                sku: item.sku,
                description: item.description,
                quantity: Decimal::from(item.quantity),
                unit_price: (item.unit_price != Decimal::ZERO).then_some(item.unit_price),
            })
            .collect()
    }

    // ── update_invoice ──────────────────────────────────────────────

    async fn update_invoice(
        &self,
        action: &Action,
        email: &EmailDocument,
    ) -> Result<Completed, String> {
        let invoice_id = required_uuid(&action.payload, "invoice_id")?;

        let status = determine_invoice_status(&email.body_text);
        let notes = invoice_notes(email);

        let invoice = self
            .erp
            .update_invoice(invoice_id, status, &notes)
            .await
            .map_err(|e| e.to_string())?;

        // Enrich the summary with extracted fields when the text carries them.
        let extracted = self.invoice_extractor.extract(
            &email.subject,
            &email.body_text,
            &email.from_email,
            None,
        );

        let summary = serde_json::json!({
            "invoice_number": invoice.number,
            "status": status,
            "notes": truncate(&notes, 200),
            "extracted_number": extracted.as_ref().map(|e| e.invoice_number.clone()),
            "extracted_total": extracted.as_ref().map(|e| e.total_amount),
        });
        let message = format!("Invoice {} updated to {status}", invoice.number);
        Ok(Completed {
            entity_type: "Invoice",
            entity_id: invoice.id,
            summary,
            message,
        })
    }

    // ── create_ticket ───────────────────────────────────────────────

    async fn create_ticket(
        &self,
        action: &Action,
        email: &EmailDocument,
    ) -> Result<Completed, String> {
        let customer_id = required_uuid(&action.payload, "customer_id")?;

        let subject = if email.subject.is_empty() {
            "Support Request"
        } else {
            &email.subject
        };
        let description = ticket_description(&email.body_text);
        let priority = determine_ticket_priority(email);

        let ticket = self
            .erp
            .create_ticket(
                subject,
                &description,
                customer_id,
                priority,
                Some(&email.message_id),
            )
            .await
            .map_err(|e| e.to_string())?;

        let summary = serde_json::json!({
            "ticket_number": ticket.number,
            "subject": truncate(subject, 100),
            "priority": priority,
        });
        let message = format!("Ticket {} created with priority {priority}", ticket.number);
        Ok(Completed {
            entity_type: "Ticket",
            entity_id: ticket.id,
            summary,
            message,
        })
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// A UUID the payload must carry; absence is a terminal failure, not a
/// retryable one.
fn required_uuid(payload: &serde_json::Value, key: &str) -> Result<Uuid, String> {
    let value = payload
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("{key} not found in action payload"))?;
    Uuid::parse_str(value).map_err(|e| format!("invalid {key}: {e}"))
}

/// Infer the invoice status transition from the email text.
fn determine_invoice_status(text: &str) -> &'static str {
    let lower = text.to_lowercase();

    const PAID: [&str; 3] = ["paid", "payment received", "payment confirmed"];
    const CANCELLED: [&str; 3] = ["cancel", "annul", "void"];
    const OVERDUE: [&str; 2] = ["overdue", "past due"];

    if PAID.iter().any(|k| lower.contains(k)) {
        "paid"
    } else if CANCELLED.iter().any(|k| lower.contains(k)) {
        "cancelled"
    } else if OVERDUE.iter().any(|k| lower.contains(k)) {
        "overdue"
    } else {
        "pending"
    }
}

/// Brief summary of the email for invoice notes.
fn invoice_notes(email: &EmailDocument) -> String {
    let summary = truncate(email.body_text.trim(), 200);
    let ellipsis = if email.body_text.len() > 200 { "..." } else { "" };
    format!("From email: {}. {summary}{ellipsis}", email.subject)
}

/// First paragraph of the body, capped at 500 chars.
fn ticket_description(body: &str) -> String {
    let first_paragraph = body.trim().split("\n\n").next().unwrap_or(body).trim();
    if first_paragraph.chars().count() <= 500 {
        first_paragraph.to_string()
    } else {
        format!("{}...", truncate(first_paragraph, 500))
    }
}

/// Ticket priority from keywords (1=low, 2=medium, 3=high).
fn determine_ticket_priority(email: &EmailDocument) -> u8 {
    let combined = format!(
        "{} {}",
        email.body_text.to_lowercase(),
        email.subject.to_lowercase()
    );

    const CRITICAL: [&str; 5] = ["critical", "emergency", "urgent", "asap", "immediately"];
    const HIGH: [&str; 2] = ["important", "high priority"];
    const LOW: [&str; 2] = ["low priority", "when possible"];

    if CRITICAL.iter().any(|k| combined.contains(k)) || HIGH.iter().any(|k| combined.contains(k)) {
        3
    } else if LOW.iter().any(|k| combined.contains(k)) {
        1
    } else {
        2
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
