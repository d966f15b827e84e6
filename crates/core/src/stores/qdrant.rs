use crate::models::{ChunkMetadata, ScoredRow, SparseVector};
use crate::store::{CollectionInfo, CollectionSchema, IndexKind, IndexSpec, VectorField, VectorRow};
use crate::traits::VectorIndex;
use crate::StoreError;
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

const DENSE_VECTOR: &str = "dense";
const SPARSE_VECTOR: &str = "sparse";
const UPSERT_BATCH: usize = 256;

/// Qdrant collection with one named dense vector and one named sparse vector.
pub struct QdrantStore {
    endpoint: String,
    client: Client,
}

impl QdrantStore {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, StoreError> {
        let endpoint = endpoint.into();
        let parsed = Url::parse(endpoint.trim())?;
        Ok(Self {
            endpoint: parsed.as_str().trim_end_matches('/').to_string(),
            client: Client::new(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path.trim_start_matches('/'))
    }

    async fn checked(response: Response) -> Result<Value, StoreError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::BackendResponse {
                backend: "qdrant".to_string(),
                details: format!("{status}: {body}"),
            });
        }
        Ok(response.json().await?)
    }

    async fn search(
        &self,
        collection: &str,
        vector: Value,
        limit: usize,
    ) -> Result<Vec<ScoredRow>, StoreError> {
        let response = self
            .client
            .post(self.url(&format!("collections/{collection}/points/search")))
            .json(&json!({
                "vector": vector,
                "limit": limit,
                "with_payload": true,
            }))
            .send()
            .await?;

        parse_hits(&Self::checked(response).await?)
    }
}

#[async_trait]
impl VectorIndex for QdrantStore {
    fn backend(&self) -> &'static str {
        "qdrant"
    }

    async fn probe(&self) -> Result<(), StoreError> {
        let response = self.client.get(self.url("collections")).send().await?;
        Self::checked(response).await?;
        Ok(())
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool, StoreError> {
        let response = self
            .client
            .get(self.url(&format!("collections/{collection}/exists")))
            .send()
            .await?;
        let parsed = Self::checked(response).await?;
        Ok(parsed
            .pointer("/result/exists")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    async fn create_collection(&self, schema: &CollectionSchema) -> Result<(), StoreError> {
        let dimensions = schema.dense_dimensions().ok_or_else(|| {
            StoreError::SchemaViolation(format!("{} has no dense vector field", schema.name))
        })?;

        let response = self
            .client
            .put(self.url(&format!("collections/{}", schema.name)))
            .json(&json!({
                "vectors": {
                    DENSE_VECTOR: { "size": dimensions, "distance": "Dot" }
                },
                "sparse_vectors": {
                    SPARSE_VECTOR: {}
                }
            }))
            .send()
            .await?;
        Self::checked(response).await?;
        debug!(collection = %schema.name, dimensions, "created qdrant collection");
        Ok(())
    }

    async fn create_index(&self, collection: &str, index: &IndexSpec) -> Result<(), StoreError> {
        // IVF cell counts have no qdrant equivalent; the dense side stays on HNSW
        let body = match (index.field, index.kind) {
            (VectorField::Dense, IndexKind::IvfFlat { nprobe, .. }) => json!({
                "hnsw_config": { "ef_construct": (nprobe * 8).max(100) }
            }),
            (VectorField::Dense, IndexKind::SparseInvertedIndex) => json!({
                "hnsw_config": { "ef_construct": 100 }
            }),
            (VectorField::Sparse, _) => json!({
                "sparse_vectors": { SPARSE_VECTOR: { "index": { "on_disk": false } } }
            }),
        };

        let response = self
            .client
            .patch(self.url(&format!("collections/{collection}")))
            .json(&body)
            .send()
            .await?;
        Self::checked(response).await?;
        Ok(())
    }

    async fn insert(&self, collection: &str, rows: &[VectorRow]) -> Result<(), StoreError> {
        for batch in rows.chunks(UPSERT_BATCH) {
            let points = batch
                .iter()
                .map(|row| {
                    json!({
                        "id": row.id,
                        "vector": {
                            DENSE_VECTOR: row.dense,
                            SPARSE_VECTOR: {
                                "indices": row.sparse.indices,
                                "values": row.sparse.values,
                            },
                        },
                        "payload": {
                            "text": row.text,
                            "metadata": row.metadata,
                        },
                    })
                })
                .collect::<Vec<_>>();

            let response = self
                .client
                .put(self.url(&format!("collections/{collection}/points?wait=true")))
                .json(&json!({ "points": points }))
                .send()
                .await?;
            Self::checked(response).await?;
        }
        Ok(())
    }

    async fn load(&self, collection: &str) -> Result<CollectionInfo, StoreError> {
        let response = self
            .client
            .get(self.url(&format!("collections/{collection}")))
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StoreError::CollectionMissing(collection.to_string()));
        }
        let parsed = Self::checked(response).await?;

        let dense_dimensions = parsed
            .pointer(&format!("/result/config/params/vectors/{DENSE_VECTOR}/size"))
            .and_then(Value::as_u64)
            .ok_or_else(|| StoreError::BackendResponse {
                backend: "qdrant".to_string(),
                details: format!("{collection} has no `{DENSE_VECTOR}` vector config"),
            })?;

        Ok(CollectionInfo {
            rows: self.count(collection).await?,
            dense_dimensions: dense_dimensions as usize,
        })
    }

    async fn count(&self, collection: &str) -> Result<u64, StoreError> {
        let response = self
            .client
            .post(self.url(&format!("collections/{collection}/points/count")))
            .json(&json!({ "exact": true }))
            .send()
            .await?;
        let parsed = Self::checked(response).await?;
        parsed
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .ok_or_else(|| StoreError::BackendResponse {
                backend: "qdrant".to_string(),
                details: "count response has no result.count".to_string(),
            })
    }

    async fn search_dense(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredRow>, StoreError> {
        self.search(
            collection,
            json!({ "name": DENSE_VECTOR, "vector": vector }),
            limit,
        )
        .await
    }

    async fn search_sparse(
        &self,
        collection: &str,
        vector: &SparseVector,
        limit: usize,
    ) -> Result<Vec<ScoredRow>, StoreError> {
        self.search(
            collection,
            json!({
                "name": SPARSE_VECTOR,
                "vector": { "indices": vector.indices, "values": vector.values },
            }),
            limit,
        )
        .await
    }
}

fn parse_hits(parsed: &Value) -> Result<Vec<ScoredRow>, StoreError> {
    let hits = parsed
        .pointer("/result")
        .and_then(Value::as_array)
        .ok_or_else(|| StoreError::BackendResponse {
            backend: "qdrant".to_string(),
            details: "search response has no result array".to_string(),
        })?;

    let mut result = Vec::with_capacity(hits.len());
    for hit in hits {
        let id = match hit.pointer("/id") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => return Err(malformed_hit("id")),
        };
        let text = hit
            .pointer("/payload/text")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed_hit("payload.text"))?
            .to_string();
        let metadata = hit
            .pointer("/payload/metadata")
            .cloned()
            .ok_or_else(|| malformed_hit("payload.metadata"))
            .and_then(|value| {
                serde_json::from_value::<ChunkMetadata>(value)
                    .map_err(|error| malformed_hit(&format!("payload.metadata ({error})")))
            })?;
        let score = hit
            .pointer("/score")
            .and_then(Value::as_f64)
            .ok_or_else(|| malformed_hit("score"))?;

        result.push(ScoredRow {
            id,
            score,
            text,
            metadata,
        });
    }

    Ok(result)
}

fn malformed_hit(field: &str) -> StoreError {
    StoreError::BackendResponse {
        backend: "qdrant".to_string(),
        details: format!("search hit without a valid {field}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_named_vector_hits() -> Result<(), StoreError> {
        let response = json!({
            "result": [
                {
                    "id": "3f2b8c1e-0000-4000-8000-000000000001",
                    "score": 0.82,
                    "payload": {
                        "text": "开源模型体系",
                        "metadata": { "file": "《大模型（LLMs）基础面》", "page": 3 }
                    }
                },
                {
                    "id": 7,
                    "score": 0.4,
                    "payload": {
                        "text": "旧数据",
                        "metadata": { "file": "《旧笔记》", "page": 1 }
                    }
                }
            ]
        });

        let hits = parse_hits(&response)?;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].metadata.page, 3);
        assert_eq!(hits[0].text, "开源模型体系");
        assert_eq!(hits[1].id, "7");
        assert_eq!(hits[1].metadata.file, "《旧笔记》");
        Ok(())
    }

    #[test]
    fn hits_without_id_or_metadata_are_rejected() {
        let without_metadata = json!({
            "result": [{ "id": 7, "score": 0.4, "payload": { "text": "旧数据" } }]
        });
        let without_id = json!({
            "result": [{
                "score": 0.4,
                "payload": { "text": "旧数据", "metadata": { "file": "《旧笔记》", "page": 1 } }
            }]
        });
        let bad_metadata = json!({
            "result": [{
                "id": 7,
                "score": 0.4,
                "payload": { "text": "旧数据", "metadata": { "page": "one" } }
            }]
        });

        for response in [without_metadata, without_id, bad_metadata] {
            assert!(matches!(
                parse_hits(&response),
                Err(StoreError::BackendResponse { .. })
            ));
        }
    }

    #[test]
    fn missing_result_array_is_an_error() {
        assert!(matches!(
            parse_hits(&json!({ "status": "ok" })),
            Err(StoreError::BackendResponse { .. })
        ));
    }

    #[test]
    fn endpoint_must_be_a_url() {
        assert!(QdrantStore::new("localhost 6333").is_err());
        assert!(QdrantStore::new("http://localhost:6333/").is_ok());
    }

    #[tokio::test]
    async fn unreachable_server_is_reported() -> Result<(), StoreError> {
        let store = QdrantStore::new("http://127.0.0.1:9")?;
        assert!(matches!(store.probe().await, Err(StoreError::Http(_))));
        Ok(())
    }
}
