use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Display name of the source PDF, e.g. `《大模型（LLMs）基础面》`.
    pub file: String,
    /// 1-based page number inside the source PDF.
    pub page: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Cleaned text of one page together with its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageDocument {
    pub text: String,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseVector {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, f32)> + '_ {
        self.indices.iter().copied().zip(self.values.iter().copied())
    }

    /// Inner product of two sparse vectors with sorted indices.
    pub fn dot(&self, other: &SparseVector) -> f32 {
        let (mut left, mut right) = (0usize, 0usize);
        let mut total = 0f32;
        while left < self.indices.len() && right < other.indices.len() {
            match self.indices[left].cmp(&other.indices[right]) {
                std::cmp::Ordering::Less => left += 1,
                std::cmp::Ordering::Greater => right += 1,
                std::cmp::Ordering::Equal => {
                    total += self.values[left] * other.values[right];
                    left += 1;
                    right += 1;
                }
            }
        }
        total
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HybridEmbedding {
    pub dense: Vec<f32>,
    pub sparse: SparseVector,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Dense,
    Sparse,
    Hybrid,
}

impl std::str::FromStr for SearchMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "dense" => Ok(SearchMode::Dense),
            "sparse" => Ok(SearchMode::Sparse),
            "hybrid" => Ok(SearchMode::Hybrid),
            other => Err(format!("unknown search mode `{other}`")),
        }
    }
}

/// One row returned by a vector backend search.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRow {
    pub id: String,
    pub score: f64,
    pub text: String,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub score: f64,
    pub modes: Vec<SearchMode>,
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub separators: Vec<String>,
    pub boilerplate: Vec<String>,
    pub title_prefix_regex: &'static str,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 100,
            separators: ["\n\n", "\n", "。", "！", "？", " ", ""]
                .iter()
                .map(|separator| separator.to_string())
                .collect(),
            boilerplate: ["来自： AiGC面试宝典", "宁静致远", "知识星球"]
                .iter()
                .map(|item| item.to_string())
                .collect(),
            title_prefix_regex: r"^\d+[-_.]",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestionSummary {
    pub files: usize,
    pub pages: usize,
    pub chunks: usize,
    pub rows: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_dot_only_counts_shared_indices() {
        let left = SparseVector {
            indices: vec![1, 4, 9],
            values: vec![0.5, 1.0, 2.0],
        };
        let right = SparseVector {
            indices: vec![2, 4, 9, 12],
            values: vec![3.0, 0.5, 0.25, 1.0],
        };
        assert!((left.dot(&right) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn search_mode_parses_case_insensitively() {
        assert_eq!("Hybrid".parse::<SearchMode>(), Ok(SearchMode::Hybrid));
        assert!("bm25".parse::<SearchMode>().is_err());
    }
}
