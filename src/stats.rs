//! Lock-free statistics counters.
//!
//! Classification requests run concurrently, so all counters are atomics —
//! per-category tallies live in fixed arrays indexed by `EmailCategory`,
//! and averages are kept as (sum, count) pairs merged on read.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::classify::types::EmailCategory;

const NUM_CATEGORIES: usize = EmailCategory::ALL.len();

/// Confidence above which a rules classification counts toward coverage.
const HIGH_CONFIDENCE: f32 = 0.85;

fn counter_array() -> [AtomicU64; NUM_CATEGORIES] {
    std::array::from_fn(|_| AtomicU64::new(0))
}

// ── Classifier statistics ───────────────────────────────────────────

/// Counters for one classifier stage (rules or escalation).
pub struct ClassifierStats {
    total_classified: AtomicU64,
    high_confidence: AtomicU64,
    category_counts: [AtomicU64; NUM_CATEGORIES],
    /// Confidence sums in micro-units (confidence × 1e6) per category.
    confidence_sums: [AtomicU64; NUM_CATEGORIES],
    /// Total processing time in microseconds.
    processing_micros: AtomicU64,
}

impl ClassifierStats {
    pub fn new() -> Self {
        Self {
            total_classified: AtomicU64::new(0),
            high_confidence: AtomicU64::new(0),
            category_counts: counter_array(),
            confidence_sums: counter_array(),
            processing_micros: AtomicU64::new(0),
        }
    }

    /// Record one classification.
    pub fn record(&self, category: EmailCategory, confidence: f32, elapsed_micros: u64) {
        self.total_classified.fetch_add(1, Ordering::Relaxed);
        if confidence > HIGH_CONFIDENCE {
            self.high_confidence.fetch_add(1, Ordering::Relaxed);
        }
        let i = category.index();
        self.category_counts[i].fetch_add(1, Ordering::Relaxed);
        self.confidence_sums[i]
            .fetch_add((confidence as f64 * 1_000_000.0) as u64, Ordering::Relaxed);
        self.processing_micros
            .fetch_add(elapsed_micros, Ordering::Relaxed);
    }

    /// Merge the counters into a snapshot.
    pub fn snapshot(&self) -> ClassifierStatsSnapshot {
        let total = self.total_classified.load(Ordering::Relaxed);
        let high = self.high_confidence.load(Ordering::Relaxed);

        let mut categories = HashMap::new();
        let mut avg_confidence = HashMap::new();
        for cat in EmailCategory::ALL {
            let count = self.category_counts[cat.index()].load(Ordering::Relaxed);
            if count == 0 {
                continue;
            }
            let sum = self.confidence_sums[cat.index()].load(Ordering::Relaxed);
            categories.insert(cat.as_str().to_string(), count);
            avg_confidence.insert(
                cat.as_str().to_string(),
                (sum as f64 / count as f64 / 1_000_000.0) as f32,
            );
        }

        let avg_time_ms = if total > 0 {
            self.processing_micros.load(Ordering::Relaxed) as f64 / total as f64 / 1000.0
        } else {
            0.0
        };

        ClassifierStatsSnapshot {
            total_classified: total,
            high_confidence: high,
            coverage_pct: if total > 0 {
                (high as f64 / total as f64 * 100.0) as f32
            } else {
                0.0
            },
            categories,
            avg_confidence_by_category: avg_confidence,
            avg_processing_time_ms: avg_time_ms,
        }
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        self.total_classified.store(0, Ordering::Relaxed);
        self.high_confidence.store(0, Ordering::Relaxed);
        for i in 0..NUM_CATEGORIES {
            self.category_counts[i].store(0, Ordering::Relaxed);
            self.confidence_sums[i].store(0, Ordering::Relaxed);
        }
        self.processing_micros.store(0, Ordering::Relaxed);
    }
}

impl Default for ClassifierStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of classifier counters.
#[derive(Debug, Clone, Serialize)]
pub struct ClassifierStatsSnapshot {
    pub total_classified: u64,
    pub high_confidence: u64,
    pub coverage_pct: f32,
    pub categories: HashMap<String, u64>,
    pub avg_confidence_by_category: HashMap<String, f32>,
    pub avg_processing_time_ms: f64,
}

// ── Pipeline statistics ─────────────────────────────────────────────

/// End-to-end pipeline counters.
#[derive(Default)]
pub struct PipelineStats {
    pub emails_processed: AtomicU64,
    pub rules_classified: AtomicU64,
    pub escalated: AtomicU64,
    pub escalation_failed: AtomicU64,
    pub unclassified: AtomicU64,
    pub actions_created: AtomicU64,
    pub actions_completed: AtomicU64,
    pub actions_failed: AtomicU64,
    pub actions_skipped: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            emails_processed: self.emails_processed.load(Ordering::Relaxed),
            rules_classified: self.rules_classified.load(Ordering::Relaxed),
            escalated: self.escalated.load(Ordering::Relaxed),
            escalation_failed: self.escalation_failed.load(Ordering::Relaxed),
            unclassified: self.unclassified.load(Ordering::Relaxed),
            actions_created: self.actions_created.load(Ordering::Relaxed),
            actions_completed: self.actions_completed.load(Ordering::Relaxed),
            actions_failed: self.actions_failed.load(Ordering::Relaxed),
            actions_skipped: self.actions_skipped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of pipeline counters.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatsSnapshot {
    pub emails_processed: u64,
    pub rules_classified: u64,
    pub escalated: u64,
    pub escalation_failed: u64,
    pub unclassified: u64,
    pub actions_created: u64,
    pub actions_completed: u64,
    pub actions_failed: u64,
    pub actions_skipped: u64,
}
