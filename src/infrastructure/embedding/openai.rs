//! OpenAI embedding provider

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::domain::CacheError;
use crate::domain::embedding::EmbeddingProvider;

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";

/// Known OpenAI embedding models and their dimensions
const EMBEDDING_MODELS: &[(&str, usize)] = &[
    ("text-embedding-3-small", 1536),
    ("text-embedding-3-large", 3072),
    ("text-embedding-ada-002", 1536),
];

/// Configuration for the OpenAI embedding client
#[derive(Debug, Clone)]
pub struct OpenAiEmbeddingConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub request_timeout: Duration,
}

impl OpenAiEmbeddingConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: "text-embedding-3-small".to_string(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// OpenAI `/v1/embeddings` client.
///
/// A single attempt per call: retries, if any, belong to the provider client
/// configuration, not to the cache. Failures are reported as
/// [`CacheError::EmbeddingProvider`] and degrade the semantic path to an
/// uncached compute.
#[derive(Debug)]
pub struct OpenAiEmbeddingProvider {
    client: reqwest::Client,
    config: OpenAiEmbeddingConfig,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAiEmbeddingProvider {
    pub fn new(config: OpenAiEmbeddingConfig) -> Result<Self, CacheError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| {
                CacheError::configuration(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self { client, config })
    }

    fn embeddings_url(&self) -> String {
        format!("{}/v1/embeddings", self.config.base_url)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CacheError> {
        let body = serde_json::json!({
            "model": self.config.model,
            "input": text,
        });

        let response = self
            .client
            .post(self.embeddings_url())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                CacheError::embedding_provider(format!("Embedding request failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(CacheError::embedding_provider(format!(
                "Embedding request returned {}: {}",
                status,
                detail.chars().take(200).collect::<String>()
            )));
        }

        let parsed: OpenAiEmbeddingResponse = response.json().await.map_err(|e| {
            CacheError::embedding_provider(format!("Failed to parse embedding response: {}", e))
        })?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| CacheError::embedding_provider("No embedding returned"))
    }

    fn dimensions(&self) -> usize {
        EMBEDDING_MODELS
            .iter()
            .find(|(model, _)| *model == self.config.model)
            .map(|(_, dims)| *dims)
            .unwrap_or(1536)
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn provider_for(server: &MockServer) -> OpenAiEmbeddingProvider {
        let config = OpenAiEmbeddingConfig::new("sk-test")
            .with_model("text-embedding-3-small")
            .with_base_url(server.uri());
        OpenAiEmbeddingProvider::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_embed_success() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "text-embedding-3-small",
                "input": "hello world",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"index": 0, "embedding": [0.1, 0.2, 0.3]}],
                "model": "text-embedding-3-small",
                "usage": {"prompt_tokens": 2, "total_tokens": 2},
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let embedding = provider.embed("hello world").await.unwrap();
        assert_eq!(embedding, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn test_embed_server_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1) // single attempt, no retry
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let result = provider.embed("hello").await;
        assert!(matches!(result, Err(CacheError::EmbeddingProvider { .. })));
    }

    #[tokio::test]
    async fn test_embed_empty_data() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [],
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        assert!(provider.embed("hello").await.is_err());
    }

    #[test]
    fn test_known_model_dimensions() {
        let config = OpenAiEmbeddingConfig::new("sk").with_model("text-embedding-3-large");
        let server_less = OpenAiEmbeddingProvider::new(config).unwrap();
        assert_eq!(server_less.dimensions(), 3072);
    }
}
