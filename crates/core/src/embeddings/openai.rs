//! Embedding client for OpenAI-compatible `/embeddings` endpoints.

use super::DenseEncoder;
use crate::config::EndpointConfig;
use crate::error::EmbeddingError;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    config: EndpointConfig,
    dimensions: usize,
    batch_size: usize,
}

impl OpenAiEmbedder {
    pub fn new(
        config: EndpointConfig,
        dimensions: usize,
        batch_size: usize,
    ) -> Result<Self, EmbeddingError> {
        if config.api_key.trim().is_empty() {
            return Err(EmbeddingError::InvalidConfig("missing API key".to_string()));
        }
        if config.model.trim().is_empty() {
            return Err(EmbeddingError::InvalidConfig("missing embedding model name".to_string()));
        }
        if dimensions == 0 || batch_size == 0 {
            return Err(EmbeddingError::InvalidConfig(
                "dimensions and batch size must be positive".to_string(),
            ));
        }

        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", config.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|_| EmbeddingError::InvalidConfig("invalid API key".to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|error| EmbeddingError::InvalidConfig(error.to_string()))?;
        let endpoint = config
            .endpoint("embeddings")
            .map_err(|error| EmbeddingError::InvalidConfig(error.to_string()))?;

        Ok(Self {
            client,
            endpoint,
            config,
            dimensions,
            batch_size,
        })
    }

    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let request = EmbeddingRequest {
            model: &self.config.model,
            input: inputs,
            dimensions: self.dimensions,
            encoding_format: "float",
        };

        let mut attempt = 0usize;
        loop {
            match self.client.post(&self.endpoint).json(&request).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let parsed: EmbeddingResponse = response.json().await.map_err(|error| {
                            EmbeddingError::InvalidResponse(error.to_string())
                        })?;
                        return order_embeddings(parsed, inputs.len());
                    }

                    let body = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if should_retry(status) && attempt + 1 < self.config.max_retries {
                        attempt += 1;
                        warn!(%status, attempt, "embedding request failed, retrying");
                        tokio::time::sleep(self.config.retry_backoff(attempt)).await;
                        continue;
                    }
                    return Err(EmbeddingError::Backend {
                        status: status.as_u16(),
                        body,
                    });
                }
                Err(error) => {
                    if attempt + 1 < self.config.max_retries {
                        attempt += 1;
                        warn!(%error, attempt, "embedding backend unreachable, retrying");
                        tokio::time::sleep(self.config.retry_backoff(attempt)).await;
                        continue;
                    }
                    return Err(EmbeddingError::BackendUnavailable(format!(
                        "{}: {error}",
                        self.endpoint
                    )));
                }
            }
        }
    }
}

#[async_trait]
impl DenseEncoder for OpenAiEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            debug!(batch = batch.len(), model = %self.config.model, "embedding batch");
            vectors.extend(self.embed_batch(batch).await?);
        }
        Ok(vectors)
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn order_embeddings(
    mut parsed: EmbeddingResponse,
    expected: usize,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    parsed.data.sort_by_key(|entry| entry.index);
    if parsed.data.len() != expected {
        return Err(EmbeddingError::CountMismatch {
            expected,
            actual: parsed.data.len(),
        });
    }
    Ok(parsed.data.into_iter().map(|entry| entry.embedding).collect())
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    dimensions: usize,
    encoding_format: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}
