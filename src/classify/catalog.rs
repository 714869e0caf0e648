//! Rule catalog — YAML-backed classification rules, compiled once.
//!
//! The catalog is immutable after load. Hot reload parses a fresh catalog
//! and swaps the shared `Arc` behind [`CatalogHandle`]; classifications that
//! already hold a snapshot keep scoring against it.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::classify::types::EmailCategory;
use crate::error::CatalogError;

// ── Raw document shape ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    settings: RawSettings,
    #[serde(default)]
    rules: ordered::OrderedRules,
}

#[derive(Debug, Default, Deserialize)]
struct RawSettings {
    case_insensitive: Option<bool>,
    keyword_weight: Option<f32>,
    pattern_weight: Option<f32>,
    sender_weight: Option<f32>,
    max_keywords_check: Option<usize>,
    max_patterns_check: Option<usize>,
    min_confidence: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct RawRule {
    priority: u8,
    confidence_base: f32,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    patterns: Vec<String>,
    #[serde(default)]
    sender_patterns: Vec<String>,
    #[serde(default)]
    exclude_keywords: Vec<String>,
}

/// The `rules` mapping deserializes into an order-preserving list of
/// (category, rule) pairs; catalog iteration follows document order.
mod ordered {
    use serde::{Deserialize, Deserializer};

    #[derive(Debug, Default)]
    pub struct OrderedRules(pub Vec<(String, super::RawRule)>);

    impl<'de> Deserialize<'de> for OrderedRules {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            struct Visitor;

            impl<'de> serde::de::Visitor<'de> for Visitor {
                type Value = OrderedRules;

                fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                    f.write_str("a mapping of category to rule definition")
                }

                fn visit_map<A: serde::de::MapAccess<'de>>(
                    self,
                    mut map: A,
                ) -> Result<Self::Value, A::Error> {
                    let mut entries = Vec::new();
                    while let Some((key, value)) = map.next_entry::<String, super::RawRule>()? {
                        entries.push((key, value));
                    }
                    Ok(OrderedRules(entries))
                }
            }

            deserializer.deserialize_map(Visitor)
        }
    }
}

// ── Compiled catalog ────────────────────────────────────────────────

/// Global scoring settings.
#[derive(Debug, Clone)]
pub struct CatalogSettings {
    /// Case-fold text and keywords before matching.
    pub case_insensitive: bool,
    /// Weight of the keyword score in the weighted sum.
    pub keyword_weight: f32,
    /// Weight of the pattern score.
    pub pattern_weight: f32,
    /// Weight of the sender score.
    pub sender_weight: f32,
    /// Upper bound on keywords checked per category.
    pub max_keywords_check: usize,
    /// Upper bound on patterns checked per category.
    pub max_patterns_check: usize,
    /// Confidence base used for categories without a catalog entry.
    pub min_confidence: f32,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            case_insensitive: true,
            keyword_weight: 0.3,
            pattern_weight: 0.5,
            sender_weight: 0.2,
            max_keywords_check: 50,
            max_patterns_check: 20,
            min_confidence: 0.5,
        }
    }
}

/// One compiled classification rule. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct RuleDefinition {
    pub category: EmailCategory,
    /// 1 = highest, 10 = lowest. Used as the explicit tie-break: among
    /// equally scored categories the lowest numeric priority wins.
    pub priority: u8,
    /// Base confidence multiplier in [0, 1].
    pub confidence_base: f32,
    /// Keywords, pre-folded when matching is case-insensitive.
    pub keywords: Vec<String>,
    /// Compiled body/subject patterns.
    pub patterns: Vec<Regex>,
    /// Compiled sender-address patterns.
    pub sender_patterns: Vec<Regex>,
    /// Keywords that force this category's score to zero.
    pub exclude_keywords: Vec<String>,
}

/// Immutable, compiled rule catalog.
#[derive(Debug)]
pub struct RuleCatalog {
    pub settings: CatalogSettings,
    rules: Vec<RuleDefinition>,
}

impl RuleCatalog {
    /// Load and compile a catalog from a YAML file.
    ///
    /// Fatal on a missing or empty file, a missing `rules` section, an
    /// unknown category key, a rule body that fails to parse, or a rule
    /// with no signals at all.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CatalogError::NotFound(PathBuf::from(path)));
        }
        let text = std::fs::read_to_string(path)?;
        let catalog = Self::from_yaml(&text)?;
        info!(
            path = %path.display(),
            rules = catalog.rules.len(),
            "Loaded classification rules"
        );
        Ok(catalog)
    }

    /// Compile a catalog from a YAML string.
    pub fn from_yaml(text: &str) -> Result<Self, CatalogError> {
        if text.trim().is_empty() {
            return Err(CatalogError::Empty);
        }

        let raw: RawConfig =
            serde_yaml::from_str(text).map_err(|e| CatalogError::Parse(e.to_string()))?;

        if raw.rules.0.is_empty() {
            return Err(CatalogError::NoRules);
        }

        let settings = build_settings(&raw.settings);
        validate_weights(&settings);

        let mut rules = Vec::with_capacity(raw.rules.0.len());
        for (key, rule) in raw.rules.0 {
            let category = EmailCategory::from_config_key(&key)
                .ok_or_else(|| CatalogError::UnknownCategory(key.clone()))?;
            rules.push(compile_rule(&key, category, rule, &settings)?);
        }

        Ok(Self { settings, rules })
    }

    /// Rules in document order.
    pub fn rules(&self) -> &[RuleDefinition] {
        &self.rules
    }

    /// Look up the rule for a category, if the catalog defines one.
    pub fn rule(&self, category: EmailCategory) -> Option<&RuleDefinition> {
        self.rules.iter().find(|r| r.category == category)
    }

    /// Base confidence for a category; falls back to `min_confidence`.
    pub fn confidence_base(&self, category: EmailCategory) -> f32 {
        self.rule(category)
            .map(|r| r.confidence_base)
            .unwrap_or(self.settings.min_confidence)
    }

    /// Priority for a category; falls back to the static default.
    pub fn priority(&self, category: EmailCategory) -> u8 {
        self.rule(category)
            .map(|r| r.priority)
            .unwrap_or_else(|| category.default_priority())
    }
}

fn build_settings(raw: &RawSettings) -> CatalogSettings {
    let defaults = CatalogSettings::default();
    CatalogSettings {
        case_insensitive: raw.case_insensitive.unwrap_or(defaults.case_insensitive),
        keyword_weight: raw.keyword_weight.unwrap_or(defaults.keyword_weight),
        pattern_weight: raw.pattern_weight.unwrap_or(defaults.pattern_weight),
        sender_weight: raw.sender_weight.unwrap_or(defaults.sender_weight),
        max_keywords_check: raw.max_keywords_check.unwrap_or(defaults.max_keywords_check),
        max_patterns_check: raw.max_patterns_check.unwrap_or(defaults.max_patterns_check),
        min_confidence: raw.min_confidence.unwrap_or(defaults.min_confidence),
    }
}

/// Weights are expected to sum to 1.0. A mismatch skews scores but is not
/// fatal — log and keep going.
fn validate_weights(settings: &CatalogSettings) {
    let total = settings.keyword_weight + settings.pattern_weight + settings.sender_weight;
    if (total - 1.0).abs() > 0.01 {
        warn!(total, "Scoring weights don't sum to 1.0");
    }
}

fn compile_rule(
    key: &str,
    category: EmailCategory,
    raw: RawRule,
    settings: &CatalogSettings,
) -> Result<RuleDefinition, CatalogError> {
    if raw.keywords.is_empty() && raw.patterns.is_empty() && raw.sender_patterns.is_empty() {
        return Err(CatalogError::NoSignals(key.to_string()));
    }

    let mut priority = raw.priority;
    if !(1..=10).contains(&priority) {
        warn!(category = key, priority, "Priority outside 1..=10, clamping");
        priority = priority.clamp(1, 10);
    }

    let mut confidence_base = raw.confidence_base;
    if !(0.0..=1.0).contains(&confidence_base) {
        warn!(
            category = key,
            confidence_base, "confidence_base outside [0, 1], clamping"
        );
        confidence_base = confidence_base.clamp(0.0, 1.0);
    }

    let fold = |s: &String| {
        if settings.case_insensitive {
            s.to_lowercase()
        } else {
            s.clone()
        }
    };

    let patterns = compile_patterns(key, &raw.patterns, settings.case_insensitive);
    let sender_patterns = compile_patterns(key, &raw.sender_patterns, settings.case_insensitive);

    debug!(
        category = key,
        keywords = raw.keywords.len(),
        patterns = patterns.len(),
        sender_patterns = sender_patterns.len(),
        "Compiled rule"
    );

    Ok(RuleDefinition {
        category,
        priority,
        confidence_base,
        keywords: raw.keywords.iter().map(fold).collect(),
        patterns,
        sender_patterns,
        exclude_keywords: raw.exclude_keywords.iter().map(fold).collect(),
    })
}

/// Compile patterns, skipping invalid ones with a warning.
fn compile_patterns(category: &str, patterns: &[String], case_insensitive: bool) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| {
            match RegexBuilder::new(p).case_insensitive(case_insensitive).build() {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(category, pattern = %p, error = %e, "Invalid pattern, skipping");
                    None
                }
            }
        })
        .collect()
}

// ── Shared handle with atomic reload ────────────────────────────────

/// Shared handle to the current catalog.
///
/// `current()` hands out an `Arc` snapshot; `reload` swaps the whole catalog
/// reference so in-flight classifications are never affected. A failed
/// reload leaves the previous catalog in place.
pub struct CatalogHandle {
    inner: RwLock<Arc<RuleCatalog>>,
    path: Option<PathBuf>,
}

impl CatalogHandle {
    /// Wrap an already-loaded catalog.
    pub fn new(catalog: RuleCatalog) -> Self {
        Self {
            inner: RwLock::new(Arc::new(catalog)),
            path: None,
        }
    }

    /// Load a catalog from disk, remembering the path for reloads.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref().to_path_buf();
        let catalog = RuleCatalog::from_path(&path)?;
        Ok(Self {
            inner: RwLock::new(Arc::new(catalog)),
            path: Some(path),
        })
    }

    /// Snapshot of the current catalog.
    pub fn current(&self) -> Arc<RuleCatalog> {
        self.inner.read().expect("catalog lock poisoned").clone()
    }

    /// Re-parse the rules file and swap the catalog atomically.
    pub fn reload(&self) -> Result<(), CatalogError> {
        let path = self
            .path
            .as_ref()
            .ok_or_else(|| CatalogError::Parse("no rules path to reload from".into()))?;
        info!(path = %path.display(), "Reloading classification rules");
        let fresh = RuleCatalog::from_path(path)?;
        *self.inner.write().expect("catalog lock poisoned") = Arc::new(fresh);
        Ok(())
    }
}
