//! Similarity retrieval — few-shot exemplar source for escalation.
//!
//! Embeds the incoming email, ranks stored exemplars by cosine similarity,
//! and returns the top-k above a threshold. Every failure path degrades to
//! an empty result set: escalation must continue with zero exemplars rather
//! than propagate a retrieval fault.

pub mod embeddings;

pub use embeddings::{EmbeddingClient, EmbeddingConfig, OllamaEmbeddings};

use std::sync::Arc;

use tracing::{debug, warn};

use crate::classify::types::EmailCategory;
use crate::store::ExemplarStore;

/// A retrieved neighbor carried into prompt construction.
#[derive(Debug, Clone)]
pub struct SimilarEmail {
    pub message_id: String,
    pub from_email: String,
    pub subject: String,
    /// First part of the neighbor's body.
    pub body_snippet: String,
    pub category: EmailCategory,
    /// The neighbor's prior classification confidence.
    pub confidence: f32,
    /// Cosine similarity to the query text.
    pub similarity: f32,
}

/// Retriever configuration.
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    /// Number of neighbors to return.
    pub k: usize,
    /// Minimum cosine similarity.
    pub threshold: f32,
    /// Character budget for embedded text.
    pub max_chars: usize,
    /// Body snippet length carried into prompts.
    pub snippet_chars: usize,
    /// Upper bound on candidate exemplars fetched from the store.
    pub candidate_limit: usize,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            k: 3,
            threshold: 0.3,
            max_chars: 8000,
            snippet_chars: 200,
            candidate_limit: 500,
        }
    }
}

/// Finds the k nearest previously-classified emails for few-shot context.
pub struct SimilarityRetriever {
    embeddings: Arc<dyn EmbeddingClient>,
    store: Arc<dyn ExemplarStore>,
    config: RetrieverConfig,
}

impl SimilarityRetriever {
    pub fn new(
        embeddings: Arc<dyn EmbeddingClient>,
        store: Arc<dyn ExemplarStore>,
        config: RetrieverConfig,
    ) -> Self {
        Self {
            embeddings,
            store,
            config,
        }
    }

    /// Find similar classified emails for the given text.
    ///
    /// Never errors — embedding failures, dimensionality mismatches, and
    /// store failures all degrade to an empty result set.
    pub async fn find_similar(&self, text: &str) -> Vec<SimilarEmail> {
        let truncated = truncate_chars(text, self.config.max_chars);

        let query = match self.embeddings.embed(&truncated).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Failed to embed query text, continuing without exemplars");
                return Vec::new();
            }
        };

        let candidates = match self.store.classified_exemplars(self.config.candidate_limit).await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Exemplar lookup failed, continuing without exemplars");
                return Vec::new();
            }
        };

        let mut scored: Vec<SimilarEmail> = candidates
            .into_iter()
            .filter_map(|ex| {
                if ex.embedding.len() != query.len() {
                    debug!(
                        message_id = %ex.message_id,
                        expected = query.len(),
                        actual = ex.embedding.len(),
                        "Skipping exemplar with mismatched embedding"
                    );
                    return None;
                }
                let similarity = cosine_similarity(&query, &ex.embedding);
                if similarity <= self.config.threshold {
                    return None;
                }
                Some(SimilarEmail {
                    message_id: ex.message_id,
                    from_email: ex.from_email,
                    subject: ex.subject,
                    body_snippet: truncate_chars(&ex.body_text, self.config.snippet_chars),
                    category: ex.category,
                    confidence: ex.confidence,
                    similarity,
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(self.config.k);

        debug!(
            found = scored.len(),
            threshold = self.config.threshold,
            "Retrieved similar emails"
        );
        scored
    }

    /// Embed an email's text and store it alongside its classification so it
    /// can serve future retrievals. Returns whether the embedding stuck.
    pub async fn embed_and_store(&self, message_id: &str, text: &str) -> bool {
        let truncated = truncate_chars(text, self.config.max_chars);
        let vector = match self.embeddings.embed(&truncated).await {
            Ok(v) => v,
            Err(e) => {
                warn!(message_id, error = %e, "Failed to embed email for storage");
                return false;
            }
        };
        match self.store.store_embedding(message_id, &vector).await {
            Ok(()) => true,
            Err(e) => {
                warn!(message_id, error = %e, "Failed to store embedding");
                false
            }
        }
    }
}

/// Cosine similarity between two equal-length vectors.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Truncate on a char boundary.
fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
