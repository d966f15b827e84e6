mod ngram;
mod openai;
mod sparse;

pub use ngram::{CharacterNgramEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use openai::OpenAiEmbedder;
pub use sparse::{LexicalSparseEncoder, SPARSE_INDEX_SPACE};

use crate::error::EmbeddingError;
use crate::models::HybridEmbedding;
use async_trait::async_trait;

/// Backend producing fixed-dimension dense vectors.
#[async_trait]
pub trait DenseEncoder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Pairs a dense backend with the lexical sparse encoder.
pub struct EmbeddingAdapter {
    dense: Box<dyn DenseEncoder>,
    sparse: LexicalSparseEncoder,
}

impl EmbeddingAdapter {
    pub fn new(dense: Box<dyn DenseEncoder>) -> Self {
        Self {
            dense,
            sparse: LexicalSparseEncoder,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dense.dimensions()
    }

    pub async fn embed_documents(
        &self,
        texts: &[String],
    ) -> Result<Vec<HybridEmbedding>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let dense = self.dense.encode(texts).await?;
        if dense.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                actual: dense.len(),
            });
        }

        let expected = self.dimensions();
        for vector in &dense {
            if vector.len() != expected {
                return Err(EmbeddingError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
            if vector.iter().any(|value| !value.is_finite()) {
                return Err(EmbeddingError::InvalidResponse(
                    "dense vector contains non-finite values".to_string(),
                ));
            }
        }

        Ok(dense
            .into_iter()
            .zip(texts)
            .map(|(dense, text)| HybridEmbedding {
                dense,
                sparse: self.sparse.encode(text),
            })
            .collect())
    }

    pub async fn embed_query(&self, text: &str) -> Result<HybridEmbedding, EmbeddingError> {
        self.embed_documents(&[text.to_string()])
            .await?
            .pop()
            .ok_or(EmbeddingError::CountMismatch {
                expected: 1,
                actual: 0,
            })
    }
}

pub(crate) fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = 1469598103934665603u64;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(1099511628211);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ShortEncoder;

    #[async_trait]
    impl DenseEncoder for ShortEncoder {
        fn dimensions(&self) -> usize {
            8
        }

        async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|_| vec![0.5; 4]).collect())
        }
    }

    struct DownEncoder;

    #[async_trait]
    impl DenseEncoder for DownEncoder {
        fn dimensions(&self) -> usize {
            8
        }

        async fn encode(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Err(EmbeddingError::BackendUnavailable("model failed to load".to_string()))
        }
    }

    #[tokio::test]
    async fn adapter_pairs_dense_and_sparse_vectors() {
        let adapter = EmbeddingAdapter::new(Box::new(CharacterNgramEmbedder { dimensions: 24 }));
        let texts = vec!["开源模型体系".to_string(), "向量索引".to_string()];

        let embeddings = adapter.embed_documents(&texts).await.expect("offline encoder");

        assert_eq!(embeddings.len(), 2);
        assert!(embeddings.iter().all(|embedding| embedding.dense.len() == 24));
        assert!(embeddings.iter().all(|embedding| !embedding.sparse.is_empty()));
    }

    #[tokio::test]
    async fn same_text_embeds_identically() {
        let adapter = EmbeddingAdapter::new(Box::new(CharacterNgramEmbedder::default()));
        let first = adapter.embed_query("主流的开源模型体系").await.expect("offline encoder");
        let second = adapter.embed_query("主流的开源模型体系").await.expect("offline encoder");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn wrong_dimension_is_rejected() {
        let adapter = EmbeddingAdapter::new(Box::new(ShortEncoder));
        let result = adapter.embed_query("text").await;
        assert!(matches!(
            result,
            Err(EmbeddingError::DimensionMismatch {
                expected: 8,
                actual: 4
            })
        ));
    }

    #[tokio::test]
    async fn backend_failure_propagates() {
        let adapter = EmbeddingAdapter::new(Box::new(DownEncoder));
        let result = adapter.embed_documents(&["text".to_string()]).await;
        assert!(matches!(result, Err(EmbeddingError::BackendUnavailable(_))));
    }
}
