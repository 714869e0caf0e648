//! Stage 1 — deterministic rules classifier.
//!
//! Scores every catalog category against the case-folded subject+body text:
//! keyword matches (sqrt-scaled), regex pattern matches (linear), and sender
//! patterns (binary), combined as a weighted sum. Runs before escalation to
//! short-circuit obvious cases; no I/O, well under 100ms per email.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::classify::catalog::{CatalogHandle, CatalogSettings, RuleDefinition};
use crate::classify::types::{Classification, ClassifyMethod, EmailDocument};
use crate::stats::{ClassifierStats, ClassifierStatsSnapshot};

/// Deterministic rules classifier.
///
/// Holds a catalog handle and takes an immutable snapshot per call, so a
/// hot reload never changes scoring mid-classification.
pub struct RulesClassifier {
    catalog: Arc<CatalogHandle>,
    stats: ClassifierStats,
}

impl RulesClassifier {
    pub fn new(catalog: Arc<CatalogHandle>) -> Self {
        Self {
            catalog,
            stats: ClassifierStats::new(),
        }
    }

    /// Classify an email against the rule catalog.
    ///
    /// Returns `None` when no category scores above zero — a normal outcome,
    /// not an error; the caller decides whether to escalate.
    pub fn classify(&self, email: &EmailDocument) -> Option<Classification> {
        let start = Instant::now();
        let catalog = self.catalog.current();
        let text = prepare_text(email, &catalog.settings);

        let mut best: Option<(&RuleDefinition, f32)> = None;
        for rule in catalog.rules() {
            let score = score_category(rule, &catalog.settings, &text, &email.from_email);
            if score <= 0.0 {
                continue;
            }
            best = match best {
                None => Some((rule, score)),
                // Ties break to the lowest numeric priority, not catalog order.
                Some((prev, prev_score))
                    if score > prev_score
                        || (score == prev_score && rule.priority < prev.priority) =>
                {
                    Some((rule, score))
                }
                other => other,
            };
        }

        let Some((rule, raw_score)) = best else {
            debug!(message_id = %email.message_id, "No category matches");
            return None;
        };

        let confidence = (raw_score * rule.confidence_base).min(1.0);
        let elapsed = start.elapsed();

        self.stats
            .record(rule.category, confidence, elapsed.as_micros() as u64);

        info!(
            message_id = %email.message_id,
            from = %email.from_email,
            category = %rule.category,
            confidence,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "Classified by rules"
        );

        Some(Classification::new(
            rule.category,
            confidence,
            ClassifyMethod::Rules,
            rule.priority,
            format!(
                "rules: matched '{}' with raw score {:.2} in {:.1}ms",
                rule.category,
                raw_score,
                elapsed.as_secs_f64() * 1000.0
            ),
        ))
    }

    /// Classification statistics for this classifier instance.
    pub fn stats(&self) -> ClassifierStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }
}

/// Concatenate subject and body, case-folding when configured.
fn prepare_text(email: &EmailDocument, settings: &CatalogSettings) -> String {
    let text = email.search_text();
    if settings.case_insensitive {
        text.to_lowercase()
    } else {
        text
    }
}

/// Score a single category in [0, 1].
///
/// An exclude-keyword hit forces the score to exactly 0 before any other
/// signal is considered.
fn score_category(
    rule: &RuleDefinition,
    settings: &CatalogSettings,
    text: &str,
    from_email: &str,
) -> f32 {
    for exclude in &rule.exclude_keywords {
        if text.contains(exclude.as_str()) {
            debug!(category = %rule.category, keyword = %exclude, "Excluded by keyword");
            return 0.0;
        }
    }

    let keyword_score = score_keywords(rule, settings, text);
    let pattern_score = score_patterns(rule, settings, text);
    let sender_score = score_sender(rule, from_email);

    let total = keyword_score * settings.keyword_weight
        + pattern_score * settings.pattern_weight
        + sender_score * settings.sender_weight;

    debug!(
        category = %rule.category,
        keyword_score,
        pattern_score,
        sender_score,
        total,
        "Scored category"
    );

    total
}

/// Keyword score: `sqrt(matches / checked)`, capped at 1.0.
///
/// The sqrt rewards multiple hits without letting long keyword lists drown
/// the signal; the checked set is capped to bound cost.
fn score_keywords(rule: &RuleDefinition, settings: &CatalogSettings, text: &str) -> f32 {
    if rule.keywords.is_empty() {
        return 0.0;
    }
    let checked: Vec<&String> = rule
        .keywords
        .iter()
        .take(settings.max_keywords_check)
        .collect();
    let matches = checked.iter().filter(|kw| text.contains(kw.as_str())).count();
    ((matches as f32 / checked.len() as f32).sqrt()).min(1.0)
}

/// Pattern score: `matches / checked`, linear — patterns are higher-precision
/// signals than keywords.
fn score_patterns(rule: &RuleDefinition, settings: &CatalogSettings, text: &str) -> f32 {
    if rule.patterns.is_empty() {
        return 0.0;
    }
    let checked: Vec<&regex::Regex> = rule
        .patterns
        .iter()
        .take(settings.max_patterns_check)
        .collect();
    let matches = checked.iter().filter(|p| p.is_match(text)).count();
    (matches as f32 / checked.len() as f32).min(1.0)
}

/// Sender score: 1.0 on any sender-pattern match, else 0.0.
fn score_sender(rule: &RuleDefinition, from_email: &str) -> f32 {
    if from_email.is_empty() || rule.sender_patterns.is_empty() {
        return 0.0;
    }
    if rule.sender_patterns.iter().any(|p| p.is_match(from_email)) {
        1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::classify::catalog::RuleCatalog;
    use crate::classify::types::{ActionType, EmailCategory};

    const TEST_RULES: &str = r#"
settings:
  keyword_weight: 0.3
  pattern_weight: 0.5
  sender_weight: 0.2
rules:
  invoice:
    priority: 1
    confidence_base: 0.95
    keywords: ["invoice", "payment"]
    patterns: ['INV-\d+', 'total\s+amount']
    sender_patterns: ['billing@', 'accounts@']
    exclude_keywords: ["invoice template"]
  purchase_order:
    priority: 2
    confidence_base: 0.92
    keywords: ["purchase order", "order confirmation"]
    patterns: ['PO-\d+']
    sender_patterns: ['procurement@']
  support:
    priority: 3
    confidence_base: 0.85
    keywords: ["help", "issue", "problem", "error"]
    patterns: ['ticket\s*#?\d+']
"#;

    fn classifier() -> RulesClassifier {
        let catalog = RuleCatalog::from_yaml(TEST_RULES).unwrap();
        RulesClassifier::new(Arc::new(CatalogHandle::new(catalog)))
    }

    fn email(from: &str, subject: &str, body: &str) -> EmailDocument {
        EmailDocument {
            message_id: "test-1".into(),
            from_email: from.into(),
            to_email: "inbox@company.com".into(),
            subject: subject.into(),
            body_text: body.into(),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn classifies_invoice_with_high_confidence() {
        // Keywords, patterns, and sender all match → weighted sum 1.0,
        // scaled by confidence_base 0.95.
        let c = classifier();
        let result = c
            .classify(&email(
                "billing@vendor.com",
                "Invoice INV-123456 - Payment Due",
                "Total amount: $1,234.56",
            ))
            .unwrap();

        assert_eq!(result.category, EmailCategory::Invoice);
        assert!(result.confidence >= 0.85, "got {}", result.confidence);
        assert_eq!(result.method, ClassifyMethod::Rules);
        assert_eq!(result.action_type, Some(ActionType::UpdateInvoice));
        assert!(result.requires_action);
    }

    #[test]
    fn exclude_keyword_forces_zero() {
        let c = classifier();
        let result = c.classify(&email(
            "spammer@example.com",
            "Free Invoice template download",
            "Download our invoice template sample now! Total amount inside.",
        ));

        // Invoice is excluded outright; nothing else matches here.
        match result {
            None => {}
            Some(r) => assert_ne!(r.category, EmailCategory::Invoice),
        }
    }

    #[test]
    fn no_match_returns_none() {
        let c = classifier();
        assert!(c
            .classify(&email(
                "alice@example.com",
                "Lunch on Friday?",
                "Want to grab lunch at noon?",
            ))
            .is_none());
    }

    #[test]
    fn deterministic_for_identical_input() {
        let c = classifier();
        let e = email(
            "billing@vendor.com",
            "Invoice INV-99 overdue",
            "Please arrange payment. Total amount: $50.00",
        );
        let a = c.classify(&e).unwrap();
        let b = c.classify(&e).unwrap();
        assert_eq!(a.category, b.category);
        assert!((a.confidence - b.confidence).abs() < f32::EPSILON);
    }

    #[test]
    fn confidence_always_in_unit_range() {
        let c = classifier();
        let samples = [
            email("billing@vendor.com", "Invoice INV-1 payment", "total amount invoice payment"),
            email("procurement@x.com", "PO-42 order confirmation purchase order", ""),
            email("user@x.com", "help with an issue", "error ticket #77 problem"),
        ];
        for e in &samples {
            if let Some(r) = c.classify(e) {
                assert!((0.0..=1.0).contains(&r.confidence), "got {}", r.confidence);
            }
        }
    }

    #[test]
    fn classifies_purchase_order() {
        let c = classifier();
        let result = c
            .classify(&email(
                "procurement@supplier.com",
                "Purchase Order PO-2024-001",
                "Order confirmation attached.",
            ))
            .unwrap();
        assert_eq!(result.category, EmailCategory::PurchaseOrder);
        assert_eq!(result.action_type, Some(ActionType::CreateOrder));
    }

    #[test]
    fn classifies_support_request() {
        let c = classifier();
        let result = c
            .classify(&email(
                "customer@example.com",
                "URGENT: problem with my account",
                "I keep getting an error. Please help! Ticket #123",
            ))
            .unwrap();
        assert_eq!(result.category, EmailCategory::Support);
        assert_eq!(result.action_type, Some(ActionType::CreateTicket));
    }

    #[test]
    fn classifies_by_body_when_subject_empty() {
        let c = classifier();
        let result = c
            .classify(&email(
                "billing@vendor.com",
                "",
                "Invoice INV-2024-001, total amount $5000, payment due",
            ))
            .unwrap();
        assert_eq!(result.category, EmailCategory::Invoice);
    }

    #[test]
    fn empty_email_is_unclassified() {
        let c = classifier();
        assert!(c.classify(&email("sender@example.com", "", "")).is_none());
    }

    #[test]
    fn tie_breaks_to_lowest_priority() {
        // Two categories with identical signals; invoice (priority 1) must
        // win over purchase_order (priority 2) on equal scores.
        let yaml = r#"
rules:
  purchase_order:
    priority: 2
    confidence_base: 0.9
    keywords: ["quarterly statement"]
  invoice:
    priority: 1
    confidence_base: 0.9
    keywords: ["quarterly statement"]
"#;
        let catalog = RuleCatalog::from_yaml(yaml).unwrap();
        let c = RulesClassifier::new(Arc::new(CatalogHandle::new(catalog)));
        let result = c
            .classify(&email("x@y.com", "Quarterly statement", "quarterly statement attached"))
            .unwrap();
        assert_eq!(result.category, EmailCategory::Invoice);
    }

    #[test]
    fn stats_track_categories() {
        let c = classifier();
        c.classify(&email(
            "billing@vendor.com",
            "Invoice INV-1",
            "total amount payment",
        ));
        c.classify(&email(
            "billing@vendor.com",
            "Invoice INV-2",
            "total amount payment",
        ));
        c.classify(&email("u@x.com", "help", "error problem issue"));

        let stats = c.stats();
        assert_eq!(stats.total_classified, 3);
        assert_eq!(stats.categories["invoice"], 2);
        assert_eq!(stats.categories["support"], 1);
        assert!(stats.avg_processing_time_ms < 100.0);

        c.reset_stats();
        assert_eq!(c.stats().total_classified, 0);
    }

    #[test]
    fn keyword_score_is_sqrt_scaled() {
        // One of two keywords → sqrt(0.5) ≈ 0.707 keyword score.
        let yaml = r#"
rules:
  support:
    priority: 3
    confidence_base: 1.0
    keywords: ["help", "unrelated-keyword"]
"#;
        let catalog = RuleCatalog::from_yaml(yaml).unwrap();
        let c = RulesClassifier::new(Arc::new(CatalogHandle::new(catalog)));
        let result = c.classify(&email("u@x.com", "help", "")).unwrap();
        // keyword_weight 0.3 × 0.707 ≈ 0.212
        assert!((result.confidence - 0.3 * (0.5f32).sqrt()).abs() < 0.001);
    }
}
