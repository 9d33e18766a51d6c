//! Null embedding provider.
//!
//! Used when semantic recall is disabled. Every call reports the backend as
//! unavailable so retrieval degrades to trigger rules only.

use async_trait::async_trait;

use super::embedding::{EmbeddingInput, EmbeddingOutput, EmbeddingProvider};
use crate::domain::errors::{DomainError, DomainResult};

#[derive(Debug, Clone, Default)]
pub struct NullEmbeddingProvider;

impl NullEmbeddingProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EmbeddingProvider for NullEmbeddingProvider {
    fn name(&self) -> &'static str {
        "null"
    }

    fn dimension(&self) -> usize {
        0
    }

    async fn embed(&self, _text: &str) -> DomainResult<Vec<f32>> {
        Err(DomainError::EmbeddingUnavailable(
            "embeddings are disabled".to_string(),
        ))
    }

    async fn embed_batch(&self, _inputs: &[EmbeddingInput]) -> DomainResult<Vec<EmbeddingOutput>> {
        Err(DomainError::EmbeddingUnavailable(
            "embeddings are disabled".to_string(),
        ))
    }

    fn max_batch_size(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_null_provider_reports_unavailable() {
        let provider = NullEmbeddingProvider::new();
        assert!(matches!(
            provider.embed("anything").await,
            Err(DomainError::EmbeddingUnavailable(_))
        ));
    }
}
