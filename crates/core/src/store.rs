use crate::models::{ChunkMetadata, DocumentChunk, HybridEmbedding, ScoredRow, SparseVector};
use crate::traits::VectorIndex;
use crate::StoreError;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

pub const DEFAULT_MAX_TEXT_CHARS: usize = 2048;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    PrimaryKey { auto_id: bool },
    Text { max_chars: usize },
    Json,
    DenseVector { dimensions: usize },
    SparseVector,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    pub kind: FieldKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub name: String,
    pub fields: Vec<FieldSchema>,
}

impl CollectionSchema {
    /// `id`, `text`, `metadata`, `dense_vector`, `sparse_vector`.
    pub fn hybrid(name: impl Into<String>, dense_dimensions: usize, max_text_chars: usize) -> Self {
        let field = |name: &str, kind: FieldKind| FieldSchema {
            name: name.to_string(),
            kind,
        };
        Self {
            name: name.into(),
            fields: vec![
                field("id", FieldKind::PrimaryKey { auto_id: true }),
                field("text", FieldKind::Text { max_chars: max_text_chars }),
                field("metadata", FieldKind::Json),
                field(
                    "dense_vector",
                    FieldKind::DenseVector {
                        dimensions: dense_dimensions,
                    },
                ),
                field("sparse_vector", FieldKind::SparseVector),
            ],
        }
    }

    pub fn dense_dimensions(&self) -> Option<usize> {
        self.fields.iter().find_map(|field| match field.kind {
            FieldKind::DenseVector { dimensions } => Some(dimensions),
            _ => None,
        })
    }

    pub fn max_text_chars(&self) -> Option<usize> {
        self.fields.iter().find_map(|field| match field.kind {
            FieldKind::Text { max_chars } => Some(max_chars),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorField {
    Dense,
    Sparse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IndexKind {
    /// Inverted file over k-means cells.
    IvfFlat { nlist: usize, nprobe: usize },
    SparseInvertedIndex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    InnerProduct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub field: VectorField,
    pub kind: IndexKind,
    pub metric: Metric,
}

impl IndexSpec {
    pub fn dense_default() -> Self {
        Self {
            field: VectorField::Dense,
            kind: IndexKind::IvfFlat {
                nlist: 128,
                nprobe: 16,
            },
            metric: Metric::InnerProduct,
        }
    }

    pub fn sparse_default() -> Self {
        Self {
            field: VectorField::Sparse,
            kind: IndexKind::SparseInvertedIndex,
            metric: Metric::InnerProduct,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRow {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub dense: Vec<f32>,
    pub sparse: SparseVector,
}

impl VectorRow {
    pub fn scored(&self, score: f64) -> ScoredRow {
        ScoredRow {
            id: self.id.clone(),
            score,
            text: self.text.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionInfo {
    pub rows: u64,
    pub dense_dimensions: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    Disconnected,
    Connected,
    Created,
    Indexed,
    Loaded,
    Queryable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    Created,
    Existing { rows: u64 },
}

/// Drives one collection through connect, create, index, insert and load.
pub struct VectorStoreManager {
    backend: Box<dyn VectorIndex>,
    schema: CollectionSchema,
    dense_index: IndexSpec,
    sparse_index: IndexSpec,
    dense_indexed: bool,
    sparse_indexed: bool,
    state: StoreState,
    rows: u64,
}

impl VectorStoreManager {
    pub fn new(backend: Box<dyn VectorIndex>, schema: CollectionSchema) -> Self {
        Self {
            backend,
            schema,
            dense_index: IndexSpec::dense_default(),
            sparse_index: IndexSpec::sparse_default(),
            dense_indexed: false,
            sparse_indexed: false,
            state: StoreState::Disconnected,
            rows: 0,
        }
    }

    pub fn with_dense_index(mut self, index: IndexSpec) -> Self {
        self.dense_index = index;
        self
    }

    pub fn state(&self) -> StoreState {
        self.state
    }

    pub fn schema(&self) -> &CollectionSchema {
        &self.schema
    }

    pub fn collection(&self) -> &str {
        &self.schema.name
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.backend()
    }

    /// Row count as of the last insert or load.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub async fn connect(&mut self) -> Result<(), StoreError> {
        if self.state != StoreState::Disconnected {
            return Ok(());
        }
        self.backend.probe().await?;
        self.state = StoreState::Connected;
        debug!(backend = self.backend.backend(), "vector store connected");
        Ok(())
    }

    pub async fn collection_exists(&mut self) -> Result<bool, StoreError> {
        self.connect().await?;
        self.backend.collection_exists(&self.schema.name).await
    }

    /// True when the collection is missing or holds no rows.
    pub async fn needs_ingestion(&mut self) -> Result<bool, StoreError> {
        if !self.collection_exists().await? {
            return Ok(true);
        }
        Ok(self.backend.count(&self.schema.name).await? == 0)
    }

    pub async fn create_collection(&mut self) -> Result<(), StoreError> {
        self.expect_state(&[StoreState::Connected], "create_collection")?;
        self.backend.create_collection(&self.schema).await?;
        self.state = StoreState::Created;
        Ok(())
    }

    pub async fn create_index(&mut self, field: VectorField) -> Result<(), StoreError> {
        self.expect_state(&[StoreState::Created], "create_index")?;
        let spec = match field {
            VectorField::Dense => self.dense_index,
            VectorField::Sparse => self.sparse_index,
        };
        self.backend.create_index(&self.schema.name, &spec).await?;

        match field {
            VectorField::Dense => self.dense_indexed = true,
            VectorField::Sparse => self.sparse_indexed = true,
        }
        if self.dense_indexed && self.sparse_indexed {
            self.state = StoreState::Indexed;
        }
        Ok(())
    }

    /// Opens an existing collection for querying, or creates and indexes a new one.
    pub async fn create_or_open(&mut self) -> Result<OpenOutcome, StoreError> {
        if self.collection_exists().await? {
            let rows = self.load().await?;
            info!(collection = %self.schema.name, rows, "opened existing collection");
            return Ok(OpenOutcome::Existing { rows });
        }

        if self.state == StoreState::Connected {
            self.create_collection().await?;
            self.create_index(VectorField::Dense).await?;
            self.create_index(VectorField::Sparse).await?;
        }
        info!(
            collection = %self.schema.name,
            backend = self.backend.backend(),
            "created collection"
        );
        Ok(OpenOutcome::Created)
    }

    pub async fn insert(
        &mut self,
        chunks: &[DocumentChunk],
        embeddings: &[HybridEmbedding],
    ) -> Result<usize, StoreError> {
        self.expect_state(
            &[StoreState::Indexed, StoreState::Loaded, StoreState::Queryable],
            "insert",
        )?;
        if chunks.len() != embeddings.len() {
            return Err(StoreError::Request(format!(
                "embedding count {} doesn't match chunk count {}",
                embeddings.len(),
                chunks.len()
            )));
        }

        let dimensions = self.schema.dense_dimensions().unwrap_or_default();
        let max_chars = self.schema.max_text_chars().unwrap_or(usize::MAX);
        let rows = chunks
            .iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| {
                if embedding.dense.len() != dimensions {
                    return Err(StoreError::SchemaViolation(format!(
                        "dense vector dimension {} != {}",
                        embedding.dense.len(),
                        dimensions
                    )));
                }
                let chars = chunk.text.chars().count();
                if chars > max_chars {
                    return Err(StoreError::SchemaViolation(format!(
                        "text of {chars} chars exceeds max {max_chars}"
                    )));
                }
                Ok(VectorRow {
                    id: Uuid::new_v4().to_string(),
                    text: chunk.text.clone(),
                    metadata: chunk.metadata.clone(),
                    dense: embedding.dense.clone(),
                    sparse: embedding.sparse.clone(),
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        if rows.is_empty() {
            return Ok(0);
        }

        self.backend.insert(&self.schema.name, &rows).await?;
        self.rows += rows.len() as u64;
        self.state = StoreState::Loaded;
        debug!(rows = rows.len(), "inserted rows");
        Ok(rows.len())
    }

    /// Loads the collection and makes it queryable; returns its row count.
    pub async fn load(&mut self) -> Result<u64, StoreError> {
        self.expect_state(
            &[
                StoreState::Connected,
                StoreState::Indexed,
                StoreState::Loaded,
                StoreState::Queryable,
            ],
            "load",
        )?;

        let info = self.backend.load(&self.schema.name).await?;
        let expected = self.schema.dense_dimensions().unwrap_or_default();
        if info.dense_dimensions != expected {
            return Err(StoreError::SchemaViolation(format!(
                "collection `{}` stores {}-dimensional vectors, embedder produces {}",
                self.schema.name, info.dense_dimensions, expected
            )));
        }

        self.rows = info.rows;
        self.state = StoreState::Queryable;
        Ok(info.rows)
    }

    pub async fn search_dense(
        &self,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredRow>, StoreError> {
        self.expect_state(&[StoreState::Queryable], "search")?;
        self.backend
            .search_dense(&self.schema.name, vector, limit)
            .await
    }

    pub async fn search_sparse(
        &self,
        vector: &SparseVector,
        limit: usize,
    ) -> Result<Vec<ScoredRow>, StoreError> {
        self.expect_state(&[StoreState::Queryable], "search")?;
        if vector.is_empty() {
            return Ok(Vec::new());
        }
        self.backend
            .search_sparse(&self.schema.name, vector, limit)
            .await
    }

    fn expect_state(&self, allowed: &[StoreState], operation: &str) -> Result<(), StoreError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(StoreError::InvalidState(format!(
                "{operation} is not allowed while collection `{}` is {:?}",
                self.schema.name, self.state
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::LocalStore;
    use tempfile::tempdir;

    fn chunk(text: &str, page: u32) -> DocumentChunk {
        DocumentChunk {
            text: text.to_string(),
            metadata: ChunkMetadata {
                file: "《笔记》".to_string(),
                page,
            },
        }
    }

    fn embedding(seed: f32) -> HybridEmbedding {
        HybridEmbedding {
            dense: vec![seed, 1.0 - seed, 0.0, 0.5],
            sparse: SparseVector {
                indices: vec![1, (seed * 10.0) as u32 + 2],
                values: vec![0.5, 0.5],
            },
        }
    }

    fn manager(root: &std::path::Path) -> VectorStoreManager {
        VectorStoreManager::new(
            Box::new(LocalStore::new(root)),
            CollectionSchema::hybrid("notes", 4, 64),
        )
    }

    #[tokio::test]
    async fn walks_the_lifecycle_in_order() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let mut store = manager(dir.path());
        assert_eq!(store.state(), StoreState::Disconnected);

        assert_eq!(store.create_or_open().await?, OpenOutcome::Created);
        assert_eq!(store.state(), StoreState::Indexed);

        store
            .insert(&[chunk("第一段", 1), chunk("第二段", 2)], &[embedding(0.1), embedding(0.9)])
            .await?;
        assert_eq!(store.state(), StoreState::Loaded);
        assert!(store.search_dense(&[1.0, 0.0, 0.0, 0.0], 1).await.is_err());

        assert_eq!(store.load().await?, 2);
        let hits = store.search_dense(&[1.0, 0.0, 0.0, 0.0], 1).await?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.page, 2);
        Ok(())
    }

    #[tokio::test]
    async fn create_or_open_twice_does_not_duplicate_rows(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let mut first = manager(dir.path());
        first.create_or_open().await?;
        first.insert(&[chunk("唯一", 1)], &[embedding(0.3)]).await?;

        let mut second = manager(dir.path());
        assert_eq!(second.create_or_open().await?, OpenOutcome::Existing { rows: 1 });
        let mut third = manager(dir.path());
        assert_eq!(third.create_or_open().await?, OpenOutcome::Existing { rows: 1 });
        assert!(!third.needs_ingestion().await?);
        Ok(())
    }

    #[tokio::test]
    async fn out_of_order_calls_are_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let mut store = manager(dir.path());
        let result = store.insert(&[chunk("x", 1)], &[embedding(0.2)]).await;
        assert!(matches!(result, Err(StoreError::InvalidState(_))));

        store.connect().await?;
        assert!(matches!(
            store.create_index(VectorField::Dense).await,
            Err(StoreError::InvalidState(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn schema_bounds_are_enforced() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let mut store = manager(dir.path());
        store.create_or_open().await?;

        let wrong_dimension = HybridEmbedding {
            dense: vec![1.0; 3],
            sparse: SparseVector::default(),
        };
        assert!(matches!(
            store.insert(&[chunk("x", 1)], &[wrong_dimension]).await,
            Err(StoreError::SchemaViolation(_))
        ));

        let long_text = "长".repeat(65);
        assert!(matches!(
            store.insert(&[chunk(&long_text, 1)], &[embedding(0.5)]).await,
            Err(StoreError::SchemaViolation(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn dimension_mismatch_on_load_is_reported() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let mut store = manager(dir.path());
        store.create_or_open().await?;
        store.insert(&[chunk("x", 1)], &[embedding(0.5)]).await?;

        let mut other = VectorStoreManager::new(
            Box::new(LocalStore::new(dir.path())),
            CollectionSchema::hybrid("notes", 8, 64),
        );
        assert!(matches!(
            other.create_or_open().await,
            Err(StoreError::SchemaViolation(_))
        ));
        Ok(())
    }
}
