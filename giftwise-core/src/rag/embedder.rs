//! Embedding generation using LLM providers.
//!
//! Wraps a [`Provider`] with input sanitization, the retry policy, response
//! validation and the per-item fallback used when a batch is rejected.

use crate::catalog::text::sanitize_for_embedding;
use crate::config::Config;
use crate::models::EmbeddingModel;
use crate::provider::{EmbedRequest, Provider, ProviderError, RetryPolicy};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur during embedding generation.
#[derive(Debug, Error)]
pub enum EmbedderError {
    /// The provider API returned an error.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Expected {expected} embeddings, got {got}")]
    CountMismatch { expected: usize, got: usize },

    #[error("Expected {expected}-dimensional embeddings, got {got}")]
    Dimension { expected: usize, got: usize },
}

impl EmbedderError {
    pub fn is_bad_request(&self) -> bool {
        matches!(self, Self::Provider(e) if e.is_bad_request())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Provider(e) => e.kind(),
            Self::CountMismatch { .. } | Self::Dimension { .. } => "EmbeddingError",
        }
    }
}

/// Result type for embedding operations.
pub type Result<T> = std::result::Result<T, EmbedderError>;

/// Vectors for a batch that went through the per-item fallback.
#[derive(Debug, Clone, Default)]
pub struct EmbeddedBatch {
    pub vectors: Vec<Vec<f32>>,
    /// Items that were rejected on their own and got a zero vector.
    pub degraded: usize,
}

/// Generates vector embeddings for text using a provider's embedding model.
#[derive(Clone)]
pub struct Embedder {
    provider: Arc<dyn Provider>,
    model: EmbeddingModel,
    max_chars: usize,
    retry: RetryPolicy,
}

impl Embedder {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: EmbeddingModel,
        max_chars: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            model,
            max_chars,
            retry,
        }
    }

    pub fn from_config(provider: Arc<dyn Provider>, config: &Config) -> Self {
        Self::new(
            provider,
            config.embedding.model(),
            config.embedding.max_chars,
            RetryPolicy::from_config(&config.retry),
        )
    }

    pub fn model(&self) -> &EmbeddingModel {
        &self.model
    }

    pub fn dimensions(&self) -> usize {
        self.model.dimensions
    }

    /// Embeds a single text.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or(EmbedderError::CountMismatch {
            expected: 1,
            got: 0,
        })
    }

    /// Embeds all texts in one request (after sanitization), under the retry policy.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let input: Vec<String> = texts
            .iter()
            .map(|t| sanitize_for_embedding(t, self.max_chars))
            .collect();
        debug!("Embedding {} texts with {}", input.len(), self.model.name);

        let vectors = self
            .retry
            .run("embeddings", || {
                self.provider.embed(EmbedRequest {
                    model: self.model.name.clone(),
                    input: input.clone(),
                    dimensions: Some(self.model.dimensions),
                })
            })
            .await?;

        self.validate(vectors, input.len())
    }

    /// Embeds a batch, isolating inputs the service rejects.
    ///
    /// When the whole batch is refused as a bad request, every item is sent on
    /// its own; an item that is still refused gets a zero vector. `labels` name
    /// the items in the warning (usually product codes).
    pub async fn embed_batch_with_fallback(
        &self,
        texts: &[String],
        labels: &[String],
    ) -> Result<EmbeddedBatch> {
        match self.embed_batch(texts).await {
            Ok(vectors) => Ok(EmbeddedBatch {
                vectors,
                degraded: 0,
            }),
            Err(err) if err.is_bad_request() => {
                warn!(
                    "Batch of {} rejected ({}); retrying items one by one",
                    texts.len(),
                    err
                );
                let mut batch = EmbeddedBatch::default();
                for (i, text) in texts.iter().enumerate() {
                    match self.embed(text).await {
                        Ok(vector) => batch.vectors.push(vector),
                        Err(item_err) if item_err.is_bad_request() => {
                            let label = labels
                                .get(i)
                                .cloned()
                                .unwrap_or_else(|| format!("idx:{}", i));
                            warn!(code = %label, "Skipping item due to invalid input: {}", item_err);
                            batch.vectors.push(vec![0.0; self.model.dimensions]);
                            batch.degraded += 1;
                        }
                        Err(item_err) => return Err(item_err),
                    }
                }
                Ok(batch)
            }
            Err(err) => Err(err),
        }
    }

    fn validate(&self, vectors: Vec<Vec<f32>>, expected: usize) -> Result<Vec<Vec<f32>>> {
        if vectors.len() != expected {
            return Err(EmbedderError::CountMismatch {
                expected,
                got: vectors.len(),
            });
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.model.dimensions) {
            return Err(EmbedderError::Dimension {
                expected: self.model.dimensions,
                got: bad.len(),
            });
        }
        Ok(vectors)
    }
}

/// Computes cosine similarity between two vectors.
///
/// Returns values from -1.0 (opposite) to 1.0 (identical), with 0.0 indicating
/// orthogonal vectors. Returns 0.0 for mismatched lengths or zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }

    dot_product / (magnitude_a * magnitude_b)
}
