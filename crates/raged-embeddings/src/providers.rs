//! HTTP embedding providers
//!
//! Two reqwest-backed providers: an OpenAI-compatible `/v1/embeddings`
//! client and an Ollama `/api/embed` client. Both are stateless beyond the
//! shared HTTP client.

use async_trait::async_trait;
use raged_config::{EmbedProvider, EmbeddingConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{EmbeddingError, EmbeddingResult};
use crate::traits::Embedder;

fn http_client(timeout_seconds: u64) -> EmbeddingResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_seconds))
        .build()
        .map_err(|e| EmbeddingError::Configuration(format!("building http client: {e}")))
}

/// Build the configured provider
///
/// # Errors
///
/// Returns a configuration error when the HTTP client cannot be built.
pub fn build_embedder(config: &EmbeddingConfig) -> EmbeddingResult<Arc<dyn Embedder>> {
    let embedder: Arc<dyn Embedder> = match config.provider {
        EmbedProvider::OpenAi => Arc::new(OpenAiEmbedder::new(config)?),
        EmbedProvider::Ollama => Arc::new(OllamaEmbedder::new(config)?),
    };
    Ok(embedder)
}

// ---------------------------------------------------------------------------
// OpenAI-compatible provider
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedding {
    index: usize,
    embedding: Vec<f32>,
}

/// Client for OpenAI-compatible `/v1/embeddings` endpoints
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    dimension: usize,
}

impl OpenAiEmbedder {
    /// # Errors
    ///
    /// Returns a configuration error when the HTTP client cannot be built.
    pub fn new(config: &EmbeddingConfig) -> EmbeddingResult<Self> {
        Ok(Self {
            client: http_client(config.timeout_seconds)?,
            endpoint: format!("{}/v1/embeddings", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            dimension: config.dimension,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        let mut request = self.client.post(&self.endpoint).json(&OpenAiRequest {
            model: &self.model,
            input: texts,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Upstream {
                message: format!("embedding endpoint answered {status}: {body}"),
            });
        }

        let parsed: OpenAiResponse = response.json().await?;
        if parsed.data.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                sent: texts.len(),
                got: parsed.data.len(),
            });
        }

        // The endpoint may reorder; the index field is authoritative.
        let mut vectors: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        for item in parsed.data {
            let Some(slot) = vectors.get_mut(item.index) else {
                return Err(EmbeddingError::Upstream {
                    message: format!("embedding index {} out of range", item.index),
                });
            };
            *slot = Some(item.embedding);
        }
        vectors
            .into_iter()
            .enumerate()
            .map(|(index, v)| {
                v.ok_or_else(|| EmbeddingError::Upstream {
                    message: format!("embedding index {index} missing from response"),
                })
            })
            .collect()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ---------------------------------------------------------------------------
// Ollama provider
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Client for the Ollama `/api/embed` endpoint
pub struct OllamaEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimension: usize,
}

impl OllamaEmbedder {
    /// # Errors
    ///
    /// Returns a configuration error when the HTTP client cannot be built.
    pub fn new(config: &EmbeddingConfig) -> EmbeddingResult<Self> {
        Ok(Self {
            client: http_client(config.timeout_seconds)?,
            endpoint: format!("{}/api/embed", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            dimension: config.dimension,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&OllamaRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Upstream {
                message: format!("ollama answered {status}: {body}"),
            });
        }

        let parsed: OllamaResponse = response.json().await?;
        if parsed.embeddings.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                sent: texts.len(),
                got: parsed.embeddings.len(),
            });
        }
        Ok(parsed.embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: String, provider: EmbedProvider) -> EmbeddingConfig {
        EmbeddingConfig {
            provider,
            base_url,
            model: "test-model".to_string(),
            api_key: Some("key".to_string()),
            dimension: 3,
            concurrency: 2,
            timeout_seconds: 5,
        }
    }

    #[tokio::test]
    async fn openai_provider_orders_by_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(body_partial_json(json!({"model": "test-model"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"index": 1, "embedding": [0.4, 0.5, 0.6]},
                    {"index": 0, "embedding": [0.1, 0.2, 0.3]}
                ]
            })))
            .mount(&server)
            .await;

        let embedder =
            OpenAiEmbedder::new(&config(server.uri(), EmbedProvider::OpenAi)).unwrap();
        let vectors = embedder.embed_batch(&["first", "second"]).await.unwrap();
        assert_eq!(vectors[0], vec![0.1, 0.2, 0.3]);
        assert_eq!(vectors[1], vec![0.4, 0.5, 0.6]);
    }

    #[tokio::test]
    async fn openai_provider_maps_5xx_to_upstream() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let embedder =
            OpenAiEmbedder::new(&config(server.uri(), EmbedProvider::OpenAi)).unwrap();
        let err = embedder.embed_batch(&["text"]).await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Upstream { .. }));
    }

    #[tokio::test]
    async fn openai_provider_rejects_count_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"index": 0, "embedding": [0.1, 0.2, 0.3]}]
            })))
            .mount(&server)
            .await;

        let embedder =
            OpenAiEmbedder::new(&config(server.uri(), EmbedProvider::OpenAi)).unwrap();
        let err = embedder.embed_batch(&["a", "b"]).await.unwrap_err();
        assert!(matches!(err, EmbeddingError::CountMismatch { sent: 2, got: 1 }));
    }

    #[tokio::test]
    async fn ollama_provider_round_trips() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "embeddings": [[1.0, 0.0, 0.0]]
            })))
            .mount(&server)
            .await;

        let embedder =
            OllamaEmbedder::new(&config(server.uri(), EmbedProvider::Ollama)).unwrap();
        let vectors = embedder.embed_batch(&["hello"]).await.unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0, 0.0]]);
    }
}
