//! Hybrid email classification — fast rule scoring with confidence-gated
//! escalation to a retrieval-augmented LLM classifier.

pub mod catalog;
pub mod escalation;
pub mod rules;
pub mod types;

pub use catalog::{CatalogHandle, RuleCatalog, RuleDefinition};
pub use escalation::EscalationClassifier;
pub use rules::RulesClassifier;
pub use types::{ActionType, Classification, ClassifyMethod, EmailCategory, EmailDocument};
