//! Stage 2 — LLM escalation classifier.
//!
//! Invoked only when the rules classifier's confidence is below threshold.
//! Builds a prompt from the email plus retrieved exemplars, calls the
//! completion endpoint, and defensively parses a category/confidence/
//! reasoning JSON object out of whatever the model returns. Every failure
//! path returns `None`; the caller falls back to the rules result.

use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::classify::types::{Classification, ClassifyMethod, EmailCategory, EmailDocument};
use crate::llm::{CompletionClient, CompletionRequest};
use crate::retrieval::SimilarEmail;
use crate::stats::{ClassifierStats, ClassifierStatsSnapshot};

/// Escalation configuration.
#[derive(Debug, Clone)]
pub struct EscalationConfig {
    /// Sampling temperature — low, for consistency.
    pub temperature: f32,
    /// Output-length budget in tokens.
    pub max_tokens: u32,
    /// Body characters included in the prompt.
    pub body_chars: usize,
    /// Results below this confidence are flagged for review.
    pub review_threshold: f32,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 300,
            body_chars: 1000,
            review_threshold: 0.75,
        }
    }
}

/// Retrieval-augmented LLM classifier for low-confidence emails.
pub struct EscalationClassifier {
    llm: Arc<dyn CompletionClient>,
    config: EscalationConfig,
    stats: ClassifierStats,
}

impl EscalationClassifier {
    pub fn new(llm: Arc<dyn CompletionClient>, config: EscalationConfig) -> Self {
        Self {
            llm,
            config,
            stats: ClassifierStats::new(),
        }
    }

    /// Classify an email with the LLM, using `exemplars` as few-shot context.
    ///
    /// Returns `None` on any transport, timeout, or parse failure — the
    /// prior rules result is the caller's fallback. Never raises.
    pub async fn classify(
        &self,
        email: &EmailDocument,
        exemplars: &[SimilarEmail],
    ) -> Option<Classification> {
        let start = Instant::now();

        let request = CompletionRequest::new(build_user_prompt(email, exemplars, &self.config))
            .with_system(build_system_prompt())
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens);

        let raw = match self.llm.complete(request).await {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    message_id = %email.message_id,
                    error = %e,
                    "Escalation call failed, falling back to rules result"
                );
                return None;
            }
        };

        let parsed = match parse_response(&raw) {
            Some(p) => p,
            None => {
                warn!(
                    message_id = %email.message_id,
                    raw = %truncate(&raw, 200),
                    "Unparsable escalation response, falling back to rules result"
                );
                return None;
            }
        };

        let elapsed = start.elapsed();
        self.stats
            .record(parsed.category, parsed.confidence, elapsed.as_micros() as u64);

        info!(
            message_id = %email.message_id,
            category = %parsed.category,
            confidence = parsed.confidence,
            exemplars = exemplars.len(),
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "Classified by LLM"
        );

        let mut classification = Classification::new(
            parsed.category,
            parsed.confidence,
            ClassifyMethod::Llm,
            parsed.category.default_priority(),
            format!("llm: {}", parsed.reasoning),
        );
        classification.requires_review = parsed.confidence < self.config.review_threshold;
        Some(classification)
    }

    pub fn stats(&self) -> ClassifierStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }
}

// ── Prompt construction ─────────────────────────────────────────────

fn build_system_prompt() -> String {
    "You are an expert email classifier for a business ERP system.\n\n\
     Classify incoming emails into exactly one of these categories:\n\
     - invoice: payment requests, bills, invoices, accounting documents\n\
     - purchase_order: orders, purchase requests, procurement documents\n\
     - support: help requests, issues, bugs, complaints, refunds\n\
     - sales: quotes, proposals, offers, deals\n\
     - hr: human resources, benefits, training, employment matters\n\
     - other: newsletters, marketing, everything else\n\n\
     Respond ONLY with valid JSON in this exact format:\n\
     {\"category\": \"invoice|purchase_order|support|sales|hr|other\", \
     \"confidence\": 0.0-1.0, \"reasoning\": \"brief explanation\"}\n\n\
     Rules:\n\
     - Be confident (0.8-0.99) only when very sure\n\
     - Use 0.5-0.7 for borderline cases\n\
     - Consider sender domain, subject, and content keywords\n\
     - Never use confidence above 0.99 or below 0.1\n\
     - Keep reasoning under 100 characters"
        .to_string()
}

fn build_user_prompt(
    email: &EmailDocument,
    exemplars: &[SimilarEmail],
    config: &EscalationConfig,
) -> String {
    let mut prompt = String::with_capacity(1024);

    prompt.push_str("CLASSIFY THIS EMAIL:\n\n");
    prompt.push_str(&format!("FROM: {}\n", email.from_email));
    prompt.push_str(&format!("TO: {}\n", email.to_email));
    prompt.push_str(&format!("SUBJECT: {}\n\n", email.subject));
    prompt.push_str("BODY:\n");
    prompt.push_str(&truncate(&email.body_text, config.body_chars));
    prompt.push('\n');

    if !exemplars.is_empty() {
        prompt.push_str("\nSIMILAR PAST EMAILS (for context):\n");
        for (i, ex) in exemplars.iter().enumerate() {
            prompt.push_str(&format!(
                "\nExample {} (similarity: {:.2}):\nFROM: {}\nSUBJECT: {}\nCLASSIFIED AS: {} (confidence: {:.2})\n---",
                i + 1,
                ex.similarity,
                ex.from_email,
                ex.subject,
                ex.category,
                ex.confidence,
            ));
        }
        prompt.push('\n');
    }

    prompt.push_str("\nReturn the JSON classification only.");
    prompt
}

// ── Response parsing ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawResponse {
    #[serde(default)]
    category: String,
    #[serde(default = "default_confidence")]
    confidence: f32,
    #[serde(default)]
    reasoning: String,
}

fn default_confidence() -> f32 {
    0.5
}

struct ParsedResponse {
    category: EmailCategory,
    confidence: f32,
    reasoning: String,
}

/// Extract and validate the JSON object from a raw model response.
///
/// Takes the substring between the first `{` and the last `}`, maps the
/// category through the alias table, and clamps confidence into
/// [0.1, 0.99] regardless of what the model claimed.
fn parse_response(raw: &str) -> Option<ParsedResponse> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }

    let parsed: RawResponse = match serde_json::from_str(&raw[start..=end]) {
        Ok(p) => p,
        Err(e) => {
            debug!(error = %e, "JSON parse failed in escalation response");
            return None;
        }
    };

    let category = EmailCategory::from_label(&parsed.category);
    let confidence = parsed.confidence.clamp(0.1, 0.99);

    Some(ParsedResponse {
        category,
        confidence,
        reasoning: if parsed.reasoning.is_empty() {
            "llm classification".to_string()
        } else {
            parsed.reasoning
        },
    })
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
