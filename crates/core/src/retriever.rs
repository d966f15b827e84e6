use crate::config::RetrievalConfig;
use crate::embeddings::EmbeddingAdapter;
use crate::models::{RetrievedChunk, ScoredRow, SearchMode};
use crate::store::VectorStoreManager;
use crate::ToolError;
use std::collections::HashMap;
use tracing::debug;

const RRF_K: f64 = 60.0;

/// Query-time view over a loaded collection.
pub struct Retriever<'a> {
    store: &'a VectorStoreManager,
    embedder: &'a EmbeddingAdapter,
    config: RetrievalConfig,
}

impl<'a> Retriever<'a> {
    pub fn new(
        store: &'a VectorStoreManager,
        embedder: &'a EmbeddingAdapter,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedChunk>, ToolError> {
        if query.trim().is_empty() {
            return Err(ToolError::InvalidArguments("query is empty".to_string()));
        }
        if self.config.top_k == 0 {
            return Ok(Vec::new());
        }

        let embedding = self.embedder.embed_query(query).await?;
        let top_k = self.config.top_k;

        let hits = match self.config.mode {
            SearchMode::Dense => {
                let rows = self.store.search_dense(&embedding.dense, top_k).await?;
                single_mode(rows, SearchMode::Dense)
            }
            SearchMode::Sparse => {
                let rows = self.store.search_sparse(&embedding.sparse, top_k).await?;
                single_mode(rows, SearchMode::Sparse)
            }
            SearchMode::Hybrid => {
                let fetch = top_k.saturating_mul(self.config.fetch_factor.max(1));
                let dense = self.store.search_dense(&embedding.dense, fetch).await?;
                let sparse = self.store.search_sparse(&embedding.sparse, fetch).await?;
                fuse(&dense, &sparse, &self.config)
            }
        };

        debug!(
            mode = ?self.config.mode,
            hits = hits.len(),
            "retrieved chunks"
        );
        Ok(hits)
    }
}

fn single_mode(rows: Vec<ScoredRow>, mode: SearchMode) -> Vec<RetrievedChunk> {
    rows.into_iter()
        .map(|row| RetrievedChunk {
            id: row.id,
            text: row.text,
            metadata: row.metadata,
            score: row.score,
            modes: vec![mode],
        })
        .collect()
}

/// Weighted reciprocal rank fusion of the dense and sparse result lists.
pub fn fuse(
    dense: &[ScoredRow],
    sparse: &[ScoredRow],
    config: &RetrievalConfig,
) -> Vec<RetrievedChunk> {
    let mut scored = HashMap::<String, RetrievedChunk>::new();
    apply_rrf(&mut scored, dense, config.dense_weight, SearchMode::Dense);
    apply_rrf(&mut scored, sparse, config.sparse_weight, SearchMode::Sparse);

    let mut fused = scored.into_values().collect::<Vec<_>>();
    fused.sort_by(|left, right| {
        right
            .score
            .total_cmp(&left.score)
            .then_with(|| left.id.cmp(&right.id))
    });
    fused.truncate(config.top_k);
    fused
}

fn apply_rrf(
    target: &mut HashMap<String, RetrievedChunk>,
    hits: &[ScoredRow],
    weight: f64,
    mode: SearchMode,
) {
    for (position, hit) in hits.iter().enumerate() {
        let rank_component = 1.0 / (RRF_K + (position as f64 + 1.0));

        let entry = target.entry(hit.id.clone()).or_insert_with(|| RetrievedChunk {
            id: hit.id.clone(),
            text: hit.text.clone(),
            metadata: hit.metadata.clone(),
            score: 0.0,
            modes: Vec::new(),
        });

        entry.score += weight * rank_component;
        if !entry.modes.contains(&mode) {
            entry.modes.push(mode);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;

    fn row(id: &str, score: f64) -> ScoredRow {
        ScoredRow {
            id: id.to_string(),
            score,
            text: format!("chunk {id}"),
            metadata: ChunkMetadata {
                file: "《笔记》".to_string(),
                page: 1,
            },
        }
    }

    #[test]
    fn rows_found_by_both_searches_rank_first() {
        let config = RetrievalConfig::default();
        let dense = vec![row("a", 0.9), row("b", 0.8), row("c", 0.7)];
        let sparse = vec![row("c", 3.0), row("d", 2.0)];

        let fused = fuse(&dense, &sparse, &config);

        assert_eq!(fused[0].id, "c");
        assert_eq!(fused[0].modes, vec![SearchMode::Dense, SearchMode::Sparse]);
        assert_eq!(fused[1].id, "a");
        assert_eq!(fused.len(), 4);
    }

    #[test]
    fn weights_decide_between_single_mode_leaders() {
        let dense = vec![row("dense-top", 0.9)];
        let sparse = vec![row("sparse-top", 5.0)];

        let fused = fuse(&dense, &sparse, &RetrievalConfig::default());
        assert_eq!(fused[0].id, "dense-top");

        let sparse_heavy = RetrievalConfig {
            dense_weight: 0.2,
            sparse_weight: 0.8,
            ..RetrievalConfig::default()
        };
        let fused = fuse(&dense, &sparse, &sparse_heavy);
        assert_eq!(fused[0].id, "sparse-top");
    }

    #[test]
    fn fusion_truncates_to_top_k() {
        let config = RetrievalConfig {
            top_k: 2,
            ..RetrievalConfig::default()
        };
        let dense = (0..6).map(|index| row(&format!("d{index}"), 1.0)).collect::<Vec<_>>();

        assert_eq!(fuse(&dense, &[], &config).len(), 2);
    }
}
