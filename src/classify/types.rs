//! Shared types for email classification.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Email document ──────────────────────────────────────────────────

/// An inbound email as seen by the classification pipeline.
///
/// Transport adapters (mailbox poller, queue consumer) convert their native
/// format into this struct before handing it to the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailDocument {
    /// Unique message ID (channel-native or generated).
    pub message_id: String,
    /// Sender email address.
    pub from_email: String,
    /// Recipient email address.
    pub to_email: String,
    /// Subject line.
    #[serde(default)]
    pub subject: String,
    /// Plain-text body.
    #[serde(default)]
    pub body_text: String,
    /// When the email was received.
    pub received_at: DateTime<Utc>,
}

impl EmailDocument {
    /// Subject and body concatenated for text scoring.
    pub fn search_text(&self) -> String {
        format!("{} {}", self.subject, self.body_text)
    }
}

// ── Category ────────────────────────────────────────────────────────

/// Closed set of email categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailCategory {
    Invoice,
    PurchaseOrder,
    Support,
    Sales,
    Hr,
    Other,
    Unknown,
}

impl EmailCategory {
    /// All variants, in priority-mapping order.
    pub const ALL: [EmailCategory; 7] = [
        EmailCategory::Invoice,
        EmailCategory::PurchaseOrder,
        EmailCategory::Support,
        EmailCategory::Sales,
        EmailCategory::Hr,
        EmailCategory::Other,
        EmailCategory::Unknown,
    ];

    /// Stable string form (matches the rules-config category keys).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invoice => "invoice",
            Self::PurchaseOrder => "purchase_order",
            Self::Support => "support",
            Self::Sales => "sales",
            Self::Hr => "hr",
            Self::Other => "other",
            Self::Unknown => "unknown",
        }
    }

    /// Dense index for per-category counter arrays.
    pub fn index(&self) -> usize {
        match self {
            Self::Invoice => 0,
            Self::PurchaseOrder => 1,
            Self::Support => 2,
            Self::Sales => 3,
            Self::Hr => 4,
            Self::Other => 5,
            Self::Unknown => 6,
        }
    }

    /// Map a free-form label (model output, config key) to the canonical
    /// category. Known aliases resolve explicitly; anything unrecognized
    /// falls back to `Other`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "invoice" => Self::Invoice,
            "po" | "purchase order" | "purchase_order" => Self::PurchaseOrder,
            "support" | "support_request" => Self::Support,
            "sales" | "sales_inquiry" => Self::Sales,
            "hr" | "hr_communication" => Self::Hr,
            "newsletter" | "other" => Self::Other,
            "unknown" => Self::Unknown,
            _ => Self::Other,
        }
    }

    /// Like [`from_label`](Self::from_label) but without the `Other`
    /// fallback — used when parsing catalog keys, where an unrecognized
    /// category is a configuration error.
    pub fn from_config_key(key: &str) -> Option<Self> {
        match key.trim().to_lowercase().as_str() {
            "invoice" => Some(Self::Invoice),
            "po" | "purchase order" | "purchase_order" => Some(Self::PurchaseOrder),
            "support" | "support_request" => Some(Self::Support),
            "sales" | "sales_inquiry" => Some(Self::Sales),
            "hr" | "hr_communication" => Some(Self::Hr),
            "newsletter" | "other" => Some(Self::Other),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Default priority when the catalog has no entry (1=highest, 10=lowest).
    pub fn default_priority(&self) -> u8 {
        match self {
            Self::Invoice => 1,
            Self::PurchaseOrder => 2,
            Self::Support => 3,
            Self::Sales => 4,
            Self::Hr => 5,
            Self::Other | Self::Unknown => 6,
        }
    }

    /// Static category → ERP action mapping.
    pub fn action_type(&self) -> Option<ActionType> {
        match self {
            Self::PurchaseOrder => Some(ActionType::CreateOrder),
            Self::Invoice => Some(ActionType::UpdateInvoice),
            Self::Support => Some(ActionType::CreateTicket),
            _ => None,
        }
    }
}

impl std::fmt::Display for EmailCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Action type ─────────────────────────────────────────────────────

/// ERP side effect derived from a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    CreateOrder,
    UpdateInvoice,
    CreateTicket,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateOrder => "create_order",
            Self::UpdateInvoice => "update_invoice",
            Self::CreateTicket => "create_ticket",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "create_order" => Some(Self::CreateOrder),
            "update_invoice" => Some(Self::UpdateInvoice),
            "create_ticket" => Some(Self::CreateTicket),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Classification ──────────────────────────────────────────────────

/// Which stage produced a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifyMethod {
    Rules,
    Llm,
}

impl ClassifyMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rules => "rules",
            Self::Llm => "llm",
        }
    }
}

/// Classification result — created once per email, immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub category: EmailCategory,
    /// Confidence in [0, 1].
    pub confidence: f32,
    /// Which stage produced this result.
    pub method: ClassifyMethod,
    /// Extracted entities (invoice numbers, PO numbers, amounts).
    #[serde(default)]
    pub entities: HashMap<String, String>,
    /// Priority (1=highest, 10=lowest).
    pub priority: u8,
    /// Whether this category routes to an ERP action.
    pub requires_action: bool,
    /// The ERP action to perform, when one applies.
    pub action_type: Option<ActionType>,
    /// Flagged for human review (low-confidence or degraded escalation).
    #[serde(default)]
    pub requires_review: bool,
    /// Why this classification.
    pub reasoning: String,
    pub classified_at: DateTime<Utc>,
}

impl Classification {
    /// Build a classification, deriving action routing from the category.
    pub fn new(
        category: EmailCategory,
        confidence: f32,
        method: ClassifyMethod,
        priority: u8,
        reasoning: String,
    ) -> Self {
        let action_type = category.action_type();
        Self {
            category,
            confidence,
            method,
            entities: HashMap::new(),
            priority,
            requires_action: action_type.is_some(),
            action_type,
            requires_review: false,
            reasoning,
            classified_at: Utc::now(),
        }
    }

    pub fn with_review(mut self) -> Self {
        self.requires_review = true;
        self
    }

    /// The fallback result when neither stage produced a classification.
    pub fn unknown(reasoning: String) -> Self {
        let mut c = Self::new(
            EmailCategory::Unknown,
            0.0,
            ClassifyMethod::Rules,
            EmailCategory::Unknown.default_priority(),
            reasoning,
        );
        c.requires_review = true;
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_label_aliases() {
        assert_eq!(EmailCategory::from_label("PO"), EmailCategory::PurchaseOrder);
        assert_eq!(
            EmailCategory::from_label("Purchase Order"),
            EmailCategory::PurchaseOrder
        );
        assert_eq!(EmailCategory::from_label("Invoice"), EmailCategory::Invoice);
        assert_eq!(EmailCategory::from_label("newsletter"), EmailCategory::Other);
        assert_eq!(
            EmailCategory::from_label("something else entirely"),
            EmailCategory::Other
        );
    }

    #[test]
    fn config_key_rejects_unknown() {
        assert_eq!(
            EmailCategory::from_config_key("purchase_order"),
            Some(EmailCategory::PurchaseOrder)
        );
        assert_eq!(EmailCategory::from_config_key("spam"), None);
    }

    #[test]
    fn action_mapping() {
        assert_eq!(
            EmailCategory::PurchaseOrder.action_type(),
            Some(ActionType::CreateOrder)
        );
        assert_eq!(
            EmailCategory::Invoice.action_type(),
            Some(ActionType::UpdateInvoice)
        );
        assert_eq!(
            EmailCategory::Support.action_type(),
            Some(ActionType::CreateTicket)
        );
        assert_eq!(EmailCategory::Sales.action_type(), None);
        assert_eq!(EmailCategory::Unknown.action_type(), None);
    }

    #[test]
    fn classification_derives_action_routing() {
        let c = Classification::new(
            EmailCategory::Invoice,
            0.9,
            ClassifyMethod::Rules,
            1,
            "test".into(),
        );
        assert!(c.requires_action);
        assert_eq!(c.action_type, Some(ActionType::UpdateInvoice));

        let c = Classification::new(
            EmailCategory::Hr,
            0.9,
            ClassifyMethod::Rules,
            5,
            "test".into(),
        );
        assert!(!c.requires_action);
        assert!(c.action_type.is_none());
    }

    #[test]
    fn unknown_classification_flags_review() {
        let c = Classification::unknown("nothing matched".into());
        assert_eq!(c.category, EmailCategory::Unknown);
        assert!(c.requires_review);
        assert!(!c.requires_action);
    }

    #[test]
    fn category_index_covers_all() {
        for (i, cat) in EmailCategory::ALL.iter().enumerate() {
            assert_eq!(cat.index(), i);
        }
    }

    #[test]
    fn email_document_search_text() {
        let email = EmailDocument {
            message_id: "m1".into(),
            from_email: "a@x.com".into(),
            to_email: "b@y.com".into(),
            subject: "Invoice INV-1".into(),
            body_text: "Total: $100".into(),
            received_at: Utc::now(),
        };
        assert_eq!(email.search_text(), "Invoice INV-1 Total: $100");
    }
}
