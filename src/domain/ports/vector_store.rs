use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;

/// A nearest-neighbour hit.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub id: Uuid,
    /// Record kind the vector was indexed under
    pub kind: String,
    pub similarity: f64,
}

/// Persistent vector corpus with cosine nearest-neighbour search.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, id: Uuid, kind: &str, vector: &[f32]) -> DomainResult<()>;

    async fn remove(&self, id: Uuid) -> DomainResult<()>;

    /// Top `limit` matches with similarity at or above `min_similarity`,
    /// most similar first. `kind` restricts the search to one record kind.
    async fn search(
        &self,
        query: &[f32],
        limit: usize,
        min_similarity: f64,
        kind: Option<&str>,
    ) -> DomainResult<Vec<VectorMatch>>;

    async fn count(&self) -> DomainResult<u64>;
}
