//! File-backed collection: one directory per collection holding the rows,
//! an IVF index for the dense field and an inverted index for the sparse one.

use crate::models::{ScoredRow, SparseVector};
use crate::store::{
    CollectionInfo, CollectionSchema, IndexKind, IndexSpec, VectorField, VectorRow,
};
use crate::traits::VectorIndex;
use crate::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

const FORMAT_VERSION: u32 = 1;
const MANIFEST_FILE: &str = "schema.json";
const ROWS_FILE: &str = "rows.json";
const DENSE_INDEX_FILE: &str = "dense.ivf.json";
const SPARSE_INDEX_FILE: &str = "sparse.inv.json";
const KMEANS_ITERATIONS: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Manifest {
    format_version: u32,
    schema: CollectionSchema,
    indexes: Vec<IndexSpec>,
    rows: u64,
    rows_sha256: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct IvfIndex {
    nprobe: usize,
    centroids: Vec<Vec<f32>>,
    /// Row positions per centroid.
    lists: Vec<Vec<usize>>,
}

impl IvfIndex {
    fn build(rows: &[VectorRow], nlist: usize, nprobe: usize) -> Self {
        let cells = nlist.min(rows.len());
        if cells == 0 {
            return Self {
                nprobe,
                ..Self::default()
            };
        }

        // evenly spaced seeds keep the build deterministic
        let mut centroids = (0..cells)
            .map(|cell| rows[cell * rows.len() / cells].dense.clone())
            .collect::<Vec<_>>();
        let dimensions = centroids[0].len();
        let mut assignment = vec![usize::MAX; rows.len()];

        for _ in 0..KMEANS_ITERATIONS {
            let mut changed = false;
            for (position, row) in rows.iter().enumerate() {
                let nearest = nearest_centroid(&centroids, &row.dense);
                if assignment[position] != nearest {
                    assignment[position] = nearest;
                    changed = true;
                }
            }
            if !changed {
                break;
            }

            let mut sums = vec![vec![0f32; dimensions]; cells];
            let mut counts = vec![0usize; cells];
            for (position, row) in rows.iter().enumerate() {
                let cell = assignment[position];
                counts[cell] += 1;
                for (sum, value) in sums[cell].iter_mut().zip(&row.dense) {
                    *sum += value;
                }
            }
            for cell in 0..cells {
                if counts[cell] > 0 {
                    centroids[cell] = sums[cell]
                        .iter()
                        .map(|sum| sum / counts[cell] as f32)
                        .collect();
                }
            }
        }

        let mut lists = vec![Vec::new(); cells];
        for (position, row) in rows.iter().enumerate() {
            lists[nearest_centroid(&centroids, &row.dense)].push(position);
        }

        Self {
            nprobe,
            centroids,
            lists,
        }
    }

    fn indexed_rows(&self) -> usize {
        self.lists.iter().map(Vec::len).sum()
    }

    /// One list per centroid, and every row position listed exactly once.
    fn validate(&self, rows: &[VectorRow]) -> Result<(), String> {
        if self.centroids.len() != self.lists.len() {
            return Err(format!(
                "dense index has {} centroids but {} cell lists",
                self.centroids.len(),
                self.lists.len()
            ));
        }
        if let Some(row) = rows.first() {
            if let Some(centroid) = self.centroids.iter().find(|c| c.len() != row.dense.len()) {
                return Err(format!(
                    "dense index centroid has {} dimensions, rows have {}",
                    centroid.len(),
                    row.dense.len()
                ));
            }
        }

        let mut seen = vec![false; rows.len()];
        for position in self.lists.iter().flatten().copied() {
            match seen.get_mut(position) {
                Some(listed) if !*listed => *listed = true,
                Some(_) => return Err(format!("dense index lists row {position} twice")),
                None => {
                    return Err(format!(
                        "dense index points at row {position} of {}",
                        rows.len()
                    ))
                }
            }
        }
        if seen.iter().any(|listed| !listed) {
            return Err(format!(
                "dense index covers {} of {} rows",
                self.indexed_rows(),
                rows.len()
            ));
        }
        Ok(())
    }

    fn search(&self, rows: &[VectorRow], query: &[f32], limit: usize) -> Vec<(usize, f64)> {
        let mut cells = self
            .centroids
            .iter()
            .enumerate()
            .map(|(cell, centroid)| (cell, dot(centroid, query)))
            .collect::<Vec<_>>();
        cells.sort_by(|left, right| right.1.total_cmp(&left.1).then(left.0.cmp(&right.0)));

        let scored = cells
            .into_iter()
            .take(self.nprobe.max(1))
            .filter_map(|(cell, _)| self.lists.get(cell))
            .flat_map(|list| list.iter().copied())
            .filter_map(|position| {
                rows.get(position)
                    .map(|row| (position, dot(&row.dense, query) as f64))
            })
            .collect::<Vec<_>>();

        top_k(scored, limit)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SparseInvertedIndex {
    postings: BTreeMap<u32, Vec<(usize, f32)>>,
    rows: usize,
}

impl SparseInvertedIndex {
    fn build(rows: &[VectorRow]) -> Self {
        let mut index = Self::default();
        for (position, row) in rows.iter().enumerate() {
            for (term, weight) in row.sparse.iter() {
                index.postings.entry(term).or_default().push((position, weight));
            }
        }
        index.rows = rows.len();
        index
    }

    fn search(&self, query: &SparseVector, limit: usize) -> Vec<(usize, f64)> {
        let mut scores = HashMap::<usize, f64>::new();
        for (term, weight) in query.iter() {
            if let Some(postings) = self.postings.get(&term) {
                for (position, value) in postings {
                    *scores.entry(*position).or_insert(0.0) += (weight * value) as f64;
                }
            }
        }

        top_k(
            scores.into_iter().filter(|(_, score)| *score > 0.0).collect(),
            limit,
        )
    }
}

#[derive(Debug, Clone)]
struct LocalCollection {
    manifest: Manifest,
    rows: Vec<VectorRow>,
    dense: Option<IvfIndex>,
    sparse: Option<SparseInvertedIndex>,
}

/// Vector store persisted under a local index directory.
pub struct LocalStore {
    root: PathBuf,
    collections: Mutex<HashMap<String, LocalCollection>>,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            collections: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection_dir(&self, collection: &str) -> PathBuf {
        self.root.join(collection)
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, LocalCollection>>, StoreError> {
        self.collections
            .lock()
            .map_err(|_| StoreError::Request("local store lock poisoned".to_string()))
    }

    fn read_from_disk(&self, collection: &str) -> Result<LocalCollection, StoreError> {
        let dir = self.collection_dir(collection);
        let manifest_path = dir.join(MANIFEST_FILE);
        if !manifest_path.is_file() {
            return Err(StoreError::CollectionMissing(format!(
                "{collection} (no {} in {})",
                MANIFEST_FILE,
                dir.display()
            )));
        }

        let manifest: Manifest = read_json(&manifest_path)?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(StoreError::Corrupt(format!(
                "{collection}: format version {} is not supported (expected {FORMAT_VERSION})",
                manifest.format_version
            )));
        }

        let rows_bytes = fs::read(dir.join(ROWS_FILE)).map_err(|error| {
            StoreError::Corrupt(format!("{collection}: cannot read {ROWS_FILE}: {error}"))
        })?;
        if sha256_hex(&rows_bytes) != manifest.rows_sha256 {
            return Err(StoreError::Corrupt(format!(
                "{collection}: {ROWS_FILE} checksum does not match manifest"
            )));
        }
        let rows: Vec<VectorRow> = serde_json::from_slice(&rows_bytes)
            .map_err(|error| StoreError::Corrupt(format!("{collection}: {error}")))?;
        if rows.len() as u64 != manifest.rows {
            return Err(StoreError::Corrupt(format!(
                "{collection}: manifest lists {} rows, found {}",
                manifest.rows,
                rows.len()
            )));
        }

        let mut dense = None;
        let mut sparse = None;
        for spec in &manifest.indexes {
            match spec.field {
                VectorField::Dense => {
                    let index: IvfIndex = read_json(&dir.join(DENSE_INDEX_FILE))?;
                    index.validate(&rows).map_err(|details| {
                        StoreError::Corrupt(format!("{collection}: {details}"))
                    })?;
                    dense = Some(index);
                }
                VectorField::Sparse => {
                    let index: SparseInvertedIndex = read_json(&dir.join(SPARSE_INDEX_FILE))?;
                    let out_of_range = index
                        .postings
                        .values()
                        .flatten()
                        .any(|(position, _)| *position >= rows.len());
                    if index.rows != rows.len() || out_of_range {
                        return Err(StoreError::Corrupt(format!(
                            "{collection}: sparse index does not match {} rows",
                            rows.len()
                        )));
                    }
                    sparse = Some(index);
                }
            }
        }

        Ok(LocalCollection {
            manifest,
            rows,
            dense,
            sparse,
        })
    }

    /// Writes rows and indexes first and the manifest last.
    fn persist(&self, collection: &mut LocalCollection) -> Result<(), StoreError> {
        let dir = self.collection_dir(&collection.manifest.schema.name);
        fs::create_dir_all(&dir)?;

        let rows_bytes = serde_json::to_vec(&collection.rows)?;
        fs::write(dir.join(ROWS_FILE), &rows_bytes)?;
        if let Some(index) = &collection.dense {
            fs::write(dir.join(DENSE_INDEX_FILE), serde_json::to_vec(index)?)?;
        }
        if let Some(index) = &collection.sparse {
            fs::write(dir.join(SPARSE_INDEX_FILE), serde_json::to_vec(index)?)?;
        }

        collection.manifest.rows = collection.rows.len() as u64;
        collection.manifest.rows_sha256 = sha256_hex(&rows_bytes);
        collection.manifest.updated_at = Utc::now();
        fs::write(
            dir.join(MANIFEST_FILE),
            serde_json::to_vec_pretty(&collection.manifest)?,
        )?;
        Ok(())
    }

    fn with_collection<T>(
        &self,
        collection: &str,
        action: impl FnOnce(&mut LocalCollection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut collections = self.lock()?;
        if !collections.contains_key(collection) {
            let loaded = self.read_from_disk(collection)?;
            collections.insert(collection.to_string(), loaded);
        }
        match collections.get_mut(collection) {
            Some(entry) => action(entry),
            None => Err(StoreError::CollectionMissing(collection.to_string())),
        }
    }

    fn rebuild_index(collection: &mut LocalCollection, spec: &IndexSpec) {
        match (spec.field, spec.kind) {
            (VectorField::Dense, IndexKind::IvfFlat { nlist, nprobe }) => {
                collection.dense = Some(IvfIndex::build(&collection.rows, nlist, nprobe));
            }
            (VectorField::Dense, IndexKind::SparseInvertedIndex) => {
                collection.dense = Some(IvfIndex::build(&collection.rows, 1, 1));
            }
            (VectorField::Sparse, _) => {
                collection.sparse = Some(SparseInvertedIndex::build(&collection.rows));
            }
        }
    }
}

#[async_trait]
impl VectorIndex for LocalStore {
    fn backend(&self) -> &'static str {
        "local"
    }

    async fn probe(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool, StoreError> {
        if self.lock()?.contains_key(collection) {
            return Ok(true);
        }
        Ok(self.collection_dir(collection).join(MANIFEST_FILE).is_file())
    }

    async fn create_collection(&self, schema: &CollectionSchema) -> Result<(), StoreError> {
        if self.collection_exists(&schema.name).await? {
            return Err(StoreError::Request(format!(
                "collection `{}` already exists",
                schema.name
            )));
        }

        let now = Utc::now();
        let mut collection = LocalCollection {
            manifest: Manifest {
                format_version: FORMAT_VERSION,
                schema: schema.clone(),
                indexes: Vec::new(),
                rows: 0,
                rows_sha256: String::new(),
                created_at: now,
                updated_at: now,
            },
            rows: Vec::new(),
            dense: None,
            sparse: None,
        };
        self.persist(&mut collection)?;
        self.lock()?.insert(schema.name.clone(), collection);
        debug!(collection = %schema.name, root = %self.root.display(), "created local collection");
        Ok(())
    }

    async fn create_index(&self, collection: &str, index: &IndexSpec) -> Result<(), StoreError> {
        self.with_collection(collection, |entry| {
            entry.manifest.indexes.retain(|spec| spec.field != index.field);
            entry.manifest.indexes.push(*index);
            Self::rebuild_index(entry, index);
            self.persist(entry)
        })
    }

    async fn insert(&self, collection: &str, rows: &[VectorRow]) -> Result<(), StoreError> {
        self.with_collection(collection, |entry| {
            entry.rows.extend_from_slice(rows);
            let specs = entry.manifest.indexes.clone();
            for spec in &specs {
                Self::rebuild_index(entry, spec);
            }
            self.persist(entry)
        })
    }

    async fn load(&self, collection: &str) -> Result<CollectionInfo, StoreError> {
        // always re-read so on-disk damage surfaces at load time
        let loaded = self.read_from_disk(collection)?;
        let info = CollectionInfo {
            rows: loaded.rows.len() as u64,
            dense_dimensions: loaded.manifest.schema.dense_dimensions().unwrap_or_default(),
        };
        self.lock()?.insert(collection.to_string(), loaded);
        Ok(info)
    }

    async fn count(&self, collection: &str) -> Result<u64, StoreError> {
        if let Some(entry) = self.lock()?.get(collection) {
            return Ok(entry.rows.len() as u64);
        }
        let manifest: Manifest = read_json(&self.collection_dir(collection).join(MANIFEST_FILE))?;
        Ok(manifest.rows)
    }

    async fn search_dense(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredRow>, StoreError> {
        self.with_collection(collection, |entry| {
            let index = entry.dense.as_ref().ok_or_else(|| {
                StoreError::InvalidState(format!("{collection} has no dense index"))
            })?;
            Ok(index
                .search(&entry.rows, vector, limit)
                .into_iter()
                .map(|(position, score)| entry.rows[position].scored(score))
                .collect())
        })
    }

    async fn search_sparse(
        &self,
        collection: &str,
        vector: &SparseVector,
        limit: usize,
    ) -> Result<Vec<ScoredRow>, StoreError> {
        self.with_collection(collection, |entry| {
            let index = entry.sparse.as_ref().ok_or_else(|| {
                StoreError::InvalidState(format!("{collection} has no sparse index"))
            })?;
            Ok(index
                .search(vector, limit)
                .into_iter()
                .filter_map(|(position, score)| {
                    entry.rows.get(position).map(|row| row.scored(score))
                })
                .collect())
        })
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let bytes = fs::read(path).map_err(|error| {
        StoreError::Corrupt(format!("cannot read {}: {error}", path.display()))
    })?;
    serde_json::from_slice(&bytes)
        .map_err(|error| StoreError::Corrupt(format!("{}: {error}", path.display())))
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn dot(left: &[f32], right: &[f32]) -> f32 {
    left.iter().zip(right).map(|(a, b)| a * b).sum()
}

fn nearest_centroid(centroids: &[Vec<f32>], vector: &[f32]) -> usize {
    let mut best = 0usize;
    let mut best_score = f32::NEG_INFINITY;
    for (cell, centroid) in centroids.iter().enumerate() {
        let score = dot(centroid, vector);
        if score > best_score {
            best = cell;
            best_score = score;
        }
    }
    best
}

fn top_k(mut scored: Vec<(usize, f64)>, limit: usize) -> Vec<(usize, f64)> {
    scored.sort_by(|left, right| right.1.total_cmp(&left.1).then(left.0.cmp(&right.0)));
    scored.truncate(limit);
    scored
}
