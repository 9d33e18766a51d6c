//! OpenAI embedding provider adapter.
//!
//! Calls the `/embeddings` endpoint of OpenAI or any compatible server.
//! Transport failures and non-success statuses surface as
//! `EmbeddingUnavailable` so retrieval degrades to trigger rules.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::EmbeddingConfig;
use crate::domain::ports::embedding::{EmbeddingInput, EmbeddingOutput, EmbeddingProvider};

/// Configuration for the OpenAI embedding provider.
#[derive(Debug, Clone)]
pub struct OpenAiEmbeddingConfig {
    /// API key. Falls back to `OPENAI_API_KEY` env var.
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub dimension: usize,
    pub timeout_secs: u64,
    /// Maximum texts per single API request.
    pub max_batch_size: usize,
}

impl Default for OpenAiEmbeddingConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimension: 1536,
            timeout_secs: 30,
            max_batch_size: 2048,
        }
    }
}

impl OpenAiEmbeddingConfig {
    pub fn from_settings(settings: &EmbeddingConfig) -> Self {
        let defaults = Self::default();
        Self {
            base_url: settings.base_url.clone().unwrap_or(defaults.base_url),
            model: settings.model.clone().unwrap_or(defaults.model),
            dimension: settings.dimension,
            ..defaults
        }
    }

    fn get_api_key(&self) -> DomainResult<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .ok_or_else(|| {
                DomainError::EmbeddingUnavailable(
                    "OpenAI API key not set. Set OPENAI_API_KEY or configure api_key.".to_string(),
                )
            })
    }
}

/// OpenAI embedding provider.
pub struct OpenAiEmbeddingProvider {
    config: OpenAiEmbeddingConfig,
    client: reqwest::Client,
}

impl OpenAiEmbeddingProvider {
    pub fn new(config: OpenAiEmbeddingConfig) -> DomainResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DomainError::ExecutionFailed(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    async fn call_embeddings_api(&self, texts: Vec<String>) -> DomainResult<Vec<Vec<f32>>> {
        let api_key = self.config.get_api_key()?;
        let url = format!("{}/embeddings", self.config.base_url.trim_end_matches('/'));
        let expected = texts.len();

        let request_body = EmbeddingsRequest {
            model: self.config.model.clone(),
            input: texts,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| DomainError::EmbeddingUnavailable(format!("embedding request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read response body".to_string());
            return Err(DomainError::EmbeddingUnavailable(format!(
                "embedding API returned {status}: {body}"
            )));
        }

        let result: EmbeddingsResponse = response.json().await.map_err(|e| {
            DomainError::SerializationError(format!("failed to parse embedding response: {e}"))
        })?;

        // Sort by index to maintain input order
        let mut data = result.data;
        data.sort_by_key(|d| d.index);
        if data.len() != expected {
            return Err(DomainError::SerializationError(format!(
                "expected {expected} embeddings, got {}",
                data.len()
            )));
        }

        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    async fn embed(&self, text: &str) -> DomainResult<Vec<f32>> {
        self.call_embeddings_api(vec![text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DomainError::SerializationError("empty embedding response".to_string()))
    }

    async fn embed_batch(&self, inputs: &[EmbeddingInput]) -> DomainResult<Vec<EmbeddingOutput>> {
        let mut outputs = Vec::with_capacity(inputs.len());
        for chunk in inputs.chunks(self.config.max_batch_size.max(1)) {
            let texts = chunk.iter().map(|i| i.text.clone()).collect();
            let vectors = self.call_embeddings_api(texts).await?;
            outputs.extend(chunk.iter().zip(vectors).map(|(input, vector)| EmbeddingOutput {
                id: input.id.clone(),
                vector,
            }));
        }
        Ok(outputs)
    }

    fn max_batch_size(&self) -> usize {
        self.config.max_batch_size
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(server: &mockito::Server, max_batch_size: usize) -> OpenAiEmbeddingProvider {
        OpenAiEmbeddingProvider::new(OpenAiEmbeddingConfig {
            api_key: Some("test-key".to_string()),
            base_url: server.url(),
            dimension: 3,
            max_batch_size,
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_embed_orders_by_index() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/embeddings")
            .match_header("authorization", "Bearer test-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"data":[{"embedding":[0.0,1.0,0.0],"index":1},{"embedding":[1.0,0.0,0.0],"index":0}]}"#,
            )
            .create_async()
            .await;

        let inputs = vec![
            EmbeddingInput { id: "a".into(), text: "first".into() },
            EmbeddingInput { id: "b".into(), text: "second".into() },
        ];
        let outputs = provider(&server, 10).embed_batch(&inputs).await.unwrap();
        assert_eq!(outputs[0].id, "a");
        assert_eq!(outputs[0].vector, vec![1.0, 0.0, 0.0]);
        assert_eq!(outputs[1].vector, vec![0.0, 1.0, 0.0]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/embeddings")
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;

        let result = provider(&server, 10).embed("hello").await;
        assert!(matches!(result, Err(DomainError::EmbeddingUnavailable(msg)) if msg.contains("503")));
    }

    #[tokio::test]
    async fn test_batches_are_chunked() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/embeddings")
            .with_status(200)
            .with_body(r#"{"data":[{"embedding":[1.0,0.0,0.0],"index":0}]}"#)
            .expect(2)
            .create_async()
            .await;

        let inputs = vec![
            EmbeddingInput { id: "a".into(), text: "one".into() },
            EmbeddingInput { id: "b".into(), text: "two".into() },
        ];
        let outputs = provider(&server, 1).embed_batch(&inputs).await.unwrap();
        assert_eq!(outputs.len(), 2);
        mock.assert_async().await;
    }

    #[test]
    fn test_settings_override_defaults() {
        let settings = EmbeddingConfig {
            provider: "openai".into(),
            dimension: 512,
            model: Some("text-embedding-3-large".into()),
            base_url: None,
        };
        let config = OpenAiEmbeddingConfig::from_settings(&settings);
        assert_eq!(config.model, "text-embedding-3-large");
        assert_eq!(config.dimension, 512);
        assert_eq!(config.base_url, "https://api.openai.com/v1");
    }
}
