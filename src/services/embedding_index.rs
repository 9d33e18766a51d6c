//! Embedding index: text in, nearest neighbours out.
//!
//! Couples an embedding provider with a vector store. Both are injected, so
//! episodes share one corpus through the store interface. Provider outages
//! surface as `EmbeddingUnavailable` for callers to degrade on.

use std::sync::Arc;

use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::ports::{EmbeddingProvider, VectorMatch, VectorStore};

/// Vector kind for step lessons and notes.
pub const KIND_INSIGHT: &str = "insight";
/// Vector kind for distilled rules.
pub const KIND_DISTILLED_RULE: &str = "distilled_rule";

pub struct EmbeddingIndex {
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
}

impl EmbeddingIndex {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, store: Arc<dyn VectorStore>) -> Self {
        Self { provider, store }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Embed `text` and store it under `id`, replacing any previous vector.
    pub async fn index(&self, id: Uuid, kind: &str, text: &str) -> DomainResult<()> {
        let vector = self.provider.embed(text).await?;
        self.store.upsert(id, kind, &vector).await?;
        tracing::debug!(%id, kind, dimension = vector.len(), "indexed");
        Ok(())
    }

    pub async fn remove(&self, id: Uuid) -> DomainResult<()> {
        self.store.remove(id).await
    }

    /// Nearest neighbours of `text`, most similar first.
    pub async fn search(
        &self,
        text: &str,
        limit: usize,
        min_similarity: f64,
        kind: Option<&str>,
    ) -> DomainResult<Vec<VectorMatch>> {
        let query = self.provider.embed(text).await?;
        self.store.search(&query, limit, min_similarity, kind).await
    }

    /// Similarity of the closest indexed neighbour, 0 for an empty corpus.
    pub async fn nearest_similarity(&self, text: &str) -> DomainResult<f64> {
        let hits = self.search(text, 1, 0.0, None).await?;
        Ok(hits.first().map_or(0.0, |m| m.similarity.max(0.0)))
    }

    pub async fn len(&self) -> DomainResult<u64> {
        self.store.count().await
    }
}
