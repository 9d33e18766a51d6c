//! Local feature-hashing embedding provider.
//!
//! Deterministic, dependency-free at runtime: tokens and adjacent token pairs
//! are hashed with SHA-256 into a fixed number of signed buckets and the
//! result is L2-normalized. Texts that share vocabulary land close together,
//! which is enough for near-duplicate detection and lexical recall.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::embedding::{EmbeddingInput, EmbeddingOutput, EmbeddingProvider};

const BIGRAM_WEIGHT: f32 = 0.5;

#[derive(Debug, Clone)]
pub struct HashingEmbeddingProvider {
    dimension: usize,
}

impl HashingEmbeddingProvider {
    pub fn new(dimension: usize) -> DomainResult<Self> {
        if dimension == 0 {
            return Err(DomainError::ValidationFailed(
                "embedding dimension must be at least 1".to_string(),
            ));
        }
        Ok(Self { dimension })
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let tokens = tokenize(text);
        let mut vector = vec![0.0_f32; self.dimension];

        for token in &tokens {
            self.add_feature(&mut vector, token.as_bytes(), 1.0);
        }
        for pair in tokens.windows(2) {
            let feature = format!("{} {}", pair[0], pair[1]);
            self.add_feature(&mut vector, feature.as_bytes(), BIGRAM_WEIGHT);
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }

    fn add_feature(&self, vector: &mut [f32], feature: &[u8], weight: f32) {
        let digest = Sha256::digest(feature);
        let mut bucket_bytes = [0_u8; 8];
        bucket_bytes.copy_from_slice(&digest[..8]);
        let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimension as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

/// Lowercased alphanumeric tokens; path and identifier separators split.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl EmbeddingProvider for HashingEmbeddingProvider {
    fn name(&self) -> &'static str {
        "hashing"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> DomainResult<Vec<f32>> {
        Ok(self.vectorize(text))
    }

    async fn embed_batch(&self, inputs: &[EmbeddingInput]) -> DomainResult<Vec<EmbeddingOutput>> {
        Ok(inputs
            .iter()
            .map(|input| EmbeddingOutput {
                id: input.id.clone(),
                vector: self.vectorize(&input.text),
            })
            .collect())
    }

    fn max_batch_size(&self) -> usize {
        usize::MAX
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::cosine_similarity;

    #[tokio::test]
    async fn test_deterministic_and_normalized() {
        let provider = HashingEmbeddingProvider::new(64).unwrap();
        let a = provider.embed("retry the database migration").await.unwrap();
        let b = provider.embed("retry the database migration").await.unwrap();
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_shared_vocabulary_is_closer() {
        let provider = HashingEmbeddingProvider::new(256).unwrap();
        let query = provider.embed("connection refused by postgres").await.unwrap();
        let near = provider.embed("postgres connection refused on startup").await.unwrap();
        let far = provider.embed("update the README badges").await.unwrap();
        assert!(cosine_similarity(&query, &near) > cosine_similarity(&query, &far));
    }

    #[tokio::test]
    async fn test_empty_text_is_zero_vector() {
        let provider = HashingEmbeddingProvider::new(8).unwrap();
        let v = provider.embed("  ").await.unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
        assert!(HashingEmbeddingProvider::new(0).is_err());
    }

    #[test]
    fn test_tokenize_splits_paths() {
        assert_eq!(tokenize("src/Auth.rs::login"), vec!["src", "auth", "rs", "login"]);
    }
}
