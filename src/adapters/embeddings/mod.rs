//! Embedding provider adapters.

pub mod hashing;
pub mod openai;

use std::sync::Arc;

pub use hashing::HashingEmbeddingProvider;
pub use openai::{OpenAiEmbeddingConfig, OpenAiEmbeddingProvider};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::EmbeddingConfig;
use crate::domain::ports::{EmbeddingProvider, NullEmbeddingProvider};

/// Build the provider named in configuration.
pub fn provider_from_config(config: &EmbeddingConfig) -> DomainResult<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "hashing" => Ok(Arc::new(HashingEmbeddingProvider::new(config.dimension)?)),
        "openai" => Ok(Arc::new(OpenAiEmbeddingProvider::new(
            OpenAiEmbeddingConfig::from_settings(config),
        )?)),
        "null" => Ok(Arc::new(NullEmbeddingProvider::new())),
        other => Err(DomainError::ValidationFailed(format!(
            "unknown embedding provider: {other}"
        ))),
    }
}
