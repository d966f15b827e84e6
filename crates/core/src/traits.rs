use crate::models::{ScoredRow, SparseVector};
use crate::store::{CollectionInfo, CollectionSchema, IndexSpec, VectorRow};
use crate::StoreError;
use async_trait::async_trait;

/// Persistence backend for a hybrid dense + sparse collection.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn backend(&self) -> &'static str;

    /// Checks that the backend is reachable.
    async fn probe(&self) -> Result<(), StoreError>;

    async fn collection_exists(&self, collection: &str) -> Result<bool, StoreError>;

    async fn create_collection(&self, schema: &CollectionSchema) -> Result<(), StoreError>;

    async fn create_index(&self, collection: &str, index: &IndexSpec) -> Result<(), StoreError>;

    async fn insert(&self, collection: &str, rows: &[VectorRow]) -> Result<(), StoreError>;

    async fn load(&self, collection: &str) -> Result<CollectionInfo, StoreError>;

    async fn count(&self, collection: &str) -> Result<u64, StoreError>;

    async fn search_dense(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredRow>, StoreError>;

    async fn search_sparse(
        &self,
        collection: &str,
        vector: &SparseVector,
        limit: usize,
    ) -> Result<Vec<ScoredRow>, StoreError>;
}
