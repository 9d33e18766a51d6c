//! SQLite-backed vector corpus.
//!
//! Vectors are stored as JSON arrays and scored in process. Brute-force cosine
//! is adequate for the corpus sizes a single agent accumulates.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::adapters::sqlite::{parse_json, parse_uuid};
use crate::domain::errors::DomainResult;
use crate::domain::ports::{cosine_similarity, VectorMatch, VectorStore};

#[derive(Clone)]
pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct VectorRow {
    id: String,
    kind: String,
    vector: String,
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert(&self, id: Uuid, kind: &str, vector: &[f32]) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO vector_index (id, kind, dimension, vector, updated_at)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 kind = excluded.kind,
                 dimension = excluded.dimension,
                 vector = excluded.vector,
                 updated_at = excluded.updated_at"#,
        )
        .bind(id.to_string())
        .bind(kind)
        .bind(vector.len() as i64)
        .bind(serde_json::to_string(vector)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, id: Uuid) -> DomainResult<()> {
        sqlx::query("DELETE FROM vector_index WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        limit: usize,
        min_similarity: f64,
        kind: Option<&str>,
    ) -> DomainResult<Vec<VectorMatch>> {
        let rows: Vec<VectorRow> = match kind {
            Some(kind) => {
                sqlx::query_as(
                    "SELECT id, kind, vector FROM vector_index WHERE dimension = ? AND kind = ?",
                )
                .bind(query.len() as i64)
                .bind(kind)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as("SELECT id, kind, vector FROM vector_index WHERE dimension = ?")
                    .bind(query.len() as i64)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let mut matches = Vec::new();
        for row in rows {
            let vector: Vec<f32> = parse_json(&row.vector)?;
            let similarity = cosine_similarity(query, &vector);
            if similarity >= min_similarity {
                matches.push(VectorMatch {
                    id: parse_uuid(&row.id)?,
                    kind: row.kind,
                    similarity,
                });
            }
        }
        matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        matches.truncate(limit);
        Ok(matches)
    }

    async fn count(&self) -> DomainResult<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM vector_index")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;

    #[tokio::test]
    async fn test_search_orders_and_filters() {
        let store = SqliteVectorStore::new(create_migrated_test_pool().await.unwrap());
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        store.upsert(a, "insight", &[1.0, 0.0]).await.unwrap();
        store.upsert(b, "insight", &[0.8, 0.6]).await.unwrap();
        store.upsert(c, "distillation", &[1.0, 0.1]).await.unwrap();

        let hits = store.search(&[1.0, 0.0], 10, 0.5, Some("insight")).await.unwrap();
        assert_eq!(hits.iter().map(|h| h.id).collect::<Vec<_>>(), vec![a, b]);

        let hits = store.search(&[1.0, 0.0], 1, 0.0, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, a);

        store.remove(a).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
    }
}
