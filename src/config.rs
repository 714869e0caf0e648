//! Configuration types.

use std::time::Duration;

/// End-to-end pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Rules confidence at or above which escalation is skipped.
    pub confidence_threshold: f32,
    /// Embed and store classified emails as future few-shot exemplars.
    pub store_exemplars: bool,
    /// Actions stuck in `executing` longer than this are candidates for
    /// external reconciliation.
    pub stale_action_threshold: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.85,
            store_exemplars: true,
            stale_action_threshold: Duration::from_secs(15 * 60),
        }
    }
}
