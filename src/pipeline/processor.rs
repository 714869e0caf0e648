//! Email processor — runs an email through the hybrid classification
//! pipeline and executes the resulting ERP action.
//!
//! Flow:
//! 1. Rules classifier (fast, no I/O) — returns immediately at or above the
//!    confidence threshold
//! 2. Similarity retrieval → LLM escalation — degrades to the rules result
//!    with a review flag when escalation fails
//! 3. Field extraction + action execution when the category routes to an
//!    ERP action

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::actions::executor::{ActionExecutor, ActionResult, ActionResultStatus};
use crate::actions::model::Action;
use crate::classify::escalation::EscalationClassifier;
use crate::classify::rules::RulesClassifier;
use crate::classify::types::{Classification, EmailCategory, EmailDocument};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::extract::{InvoiceExtractor, OrderExtractor};
use crate::retrieval::SimilarityRetriever;
use crate::stats::{PipelineStats, PipelineStatsSnapshot};
use crate::store::{ActionStore, ExemplarStore};

/// Result of processing one email end to end.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedEmail {
    pub message_id: String,
    pub classification: Classification,
    /// Present when the classification routed to an ERP action.
    pub action: Option<ActionResult>,
    pub processed_at: DateTime<Utc>,
}

/// The pipeline orchestrator.
pub struct EmailProcessor {
    rules: RulesClassifier,
    escalation: EscalationClassifier,
    retriever: SimilarityRetriever,
    executor: ActionExecutor,
    actions: Arc<dyn ActionStore>,
    exemplars: Arc<dyn ExemplarStore>,
    invoice_extractor: InvoiceExtractor,
    order_extractor: OrderExtractor,
    stats: Arc<PipelineStats>,
    config: PipelineConfig,
}

impl EmailProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rules: RulesClassifier,
        escalation: EscalationClassifier,
        retriever: SimilarityRetriever,
        executor: ActionExecutor,
        actions: Arc<dyn ActionStore>,
        exemplars: Arc<dyn ExemplarStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            rules,
            escalation,
            retriever,
            executor,
            actions,
            exemplars,
            invoice_extractor: InvoiceExtractor::new(),
            order_extractor: OrderExtractor::new(),
            stats: Arc::new(PipelineStats::new()),
            config,
        }
    }

    /// Process one email with no caller-supplied context.
    pub async fn process(&self, email: &EmailDocument) -> Result<ProcessedEmail, PipelineError> {
        self.process_with_context(email, serde_json::Value::Null)
            .await
    }

    /// Process one email. `context` carries caller-resolved identifiers
    /// (customer_id, invoice_id) into the action payload.
    pub async fn process_with_context(
        &self,
        email: &EmailDocument,
        context: serde_json::Value,
    ) -> Result<ProcessedEmail, PipelineError> {
        info!(
            message_id = %email.message_id,
            from = %email.from_email,
            "Processing email"
        );
        self.stats.emails_processed.fetch_add(1, Ordering::Relaxed);

        let mut classification = self.classify(email).await;
        classification.entities = self.extract_entities(email, classification.category);

        self.remember(email, &classification).await;

        let action = if classification.requires_action {
            Some(self.run_action(email, &classification, context).await?)
        } else {
            None
        };

        Ok(ProcessedEmail {
            message_id: email.message_id.clone(),
            classification,
            action,
            processed_at: Utc::now(),
        })
    }

    /// Process a batch of emails. Failures on individual emails are logged
    /// but don't fail the batch.
    pub async fn process_batch(&self, emails: Vec<EmailDocument>) -> Vec<ProcessedEmail> {
        let count = emails.len();
        info!(count, "Processing email batch");

        let mut results = Vec::with_capacity(count);
        for email in emails {
            match self.process(&email).await {
                Ok(processed) => results.push(processed),
                Err(e) => {
                    error!(
                        message_id = %email.message_id,
                        error = %e,
                        "Failed to process email in batch"
                    );
                }
            }
        }

        info!(processed = results.len(), total = count, "Batch complete");
        results
    }

    /// Pipeline counters.
    pub fn stats(&self) -> PipelineStatsSnapshot {
        self.stats.snapshot()
    }

    // ── Classification ──────────────────────────────────────────────

    async fn classify(&self, email: &EmailDocument) -> Classification {
        let rules_result = self.rules.classify(email);

        if let Some(ref c) = rules_result
            && c.confidence >= self.config.confidence_threshold
        {
            self.stats.rules_classified.fetch_add(1, Ordering::Relaxed);
            return c.clone();
        }

        self.stats.escalated.fetch_add(1, Ordering::Relaxed);
        debug!(
            message_id = %email.message_id,
            rules_confidence = rules_result.as_ref().map(|c| c.confidence),
            "Rules confidence below threshold, escalating"
        );

        let exemplars = self.retriever.find_similar(&email.search_text()).await;
        if let Some(llm_result) = self.escalation.classify(email, &exemplars).await {
            return llm_result;
        }

        // Escalation swallowed its failure; degrade to the rules result.
        self.stats.escalation_failed.fetch_add(1, Ordering::Relaxed);
        match rules_result {
            Some(c) => {
                warn!(
                    message_id = %email.message_id,
                    category = %c.category,
                    "Escalation failed, using low-confidence rules result"
                );
                c.with_review()
            }
            None => {
                self.stats.unclassified.fetch_add(1, Ordering::Relaxed);
                Classification::unknown("no rule matched and escalation failed".to_string())
            }
        }
    }

    /// Category-specific entity extraction for the classification record.
    fn extract_entities(
        &self,
        email: &EmailDocument,
        category: EmailCategory,
    ) -> HashMap<String, String> {
        let mut entities = HashMap::new();
        match category {
            EmailCategory::Invoice => {
                if let Some(invoice) = self.invoice_extractor.extract(
                    &email.subject,
                    &email.body_text,
                    &email.from_email,
                    None,
                ) {
                    entities.insert("invoice_number".to_string(), invoice.invoice_number);
                    entities.insert("amount".to_string(), invoice.total_amount.to_string());
                    entities.insert(
                        "currency".to_string(),
                        invoice.currency.as_str().to_string(),
                    );
                }
            }
            EmailCategory::PurchaseOrder => {
                if let Some(order) = self.order_extractor.extract(
                    &email.subject,
                    &email.body_text,
                    &email.from_email,
                    None,
                ) {
                    entities.insert("po_number".to_string(), order.order_number);
                    entities.insert("items_count".to_string(), order.line_items.len().to_string());
                }
            }
            _ => {}
        }
        entities
    }

    /// Store the classified email and its embedding for future retrieval.
    async fn remember(&self, email: &EmailDocument, classification: &Classification) {
        if !self.config.store_exemplars {
            return;
        }
        if let Err(e) = self
            .exemplars
            .insert_classified(
                &email.message_id,
                &email.from_email,
                &email.subject,
                &email.body_text,
                classification.category,
                classification.confidence,
                email.received_at,
            )
            .await
        {
            warn!(message_id = %email.message_id, error = %e, "Failed to store classified email");
            return;
        }
        self.retriever
            .embed_and_store(&email.message_id, &email.search_text())
            .await;
    }

    // ── Action execution ────────────────────────────────────────────

    async fn run_action(
        &self,
        email: &EmailDocument,
        classification: &Classification,
        context: serde_json::Value,
    ) -> Result<ActionResult, PipelineError> {
        let action_type = classification
            .action_type
            .ok_or_else(|| PipelineError::ActionSetup("requires_action without action_type".into()))?;

        let payload = match context {
            serde_json::Value::Object(map) => serde_json::Value::Object(map),
            serde_json::Value::Null => serde_json::json!({}),
            other => {
                return Err(PipelineError::ActionSetup(format!(
                    "context must be a JSON object, got {other}"
                )));
            }
        };

        let mut action = Action::new(&email.message_id, action_type, payload);
        self.actions.insert_action(&action).await?;
        self.stats.actions_created.fetch_add(1, Ordering::Relaxed);

        let result = self.executor.execute(&mut action, email).await;
        match result.status {
            ActionResultStatus::Success => {
                self.stats.actions_completed.fetch_add(1, Ordering::Relaxed);
            }
            ActionResultStatus::Failed => {
                self.stats.actions_failed.fetch_add(1, Ordering::Relaxed);
            }
            ActionResultStatus::Skipped => {
                self.stats.actions_skipped.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(result)
    }
}
