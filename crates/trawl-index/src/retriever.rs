//! Semantic and hybrid (vector + keyword overlap) search over one workspace.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::Serialize;
use trawl_llm::Embedder;

use crate::error::{IndexError, Result};
use crate::store::{ChunkStore, StoredHit};

const SNIPPET_MAX_CHARS: usize = 1000;
const HYBRID_MIN_CANDIDATES: usize = 8;
const HYBRID_CANDIDATE_FACTOR: usize = 3;
const VECTOR_WEIGHT: f64 = 0.7;
const OVERLAP_WEIGHT: f64 = 0.05;
const OVERLAP_CAP: usize = 6;

#[derive(Debug, Clone, Copy)]
pub struct SearchSettings {
    pub vector_enabled: bool,
    /// Used when a caller does not pass `top_k`.
    pub default_top_k: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            vector_enabled: true,
            default_top_k: 8,
        }
    }
}

/// One ranked result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub chunk_id: String,
    pub path: String,
    pub start_line: u64,
    pub end_line: u64,
    pub score: f64,
    pub snippet: String,
    pub commit_sha: String,
}

pub struct SearchEngine<E: Embedder> {
    embedder: Arc<E>,
    store: ChunkStore,
    settings: SearchSettings,
}

fn snippet(document: &str) -> String {
    document.chars().take(SNIPPET_MAX_CHARS).collect()
}

fn semantic_score(distance: f32) -> f64 {
    1.0 / (1.0 + f64::from(distance.max(0.0)))
}

impl From<StoredHit> for SearchHit {
    fn from(hit: StoredHit) -> Self {
        Self {
            score: semantic_score(hit.distance),
            snippet: snippet(&hit.document),
            chunk_id: hit.metadata.chunk_id,
            path: hit.metadata.path,
            start_line: hit.metadata.start_line,
            end_line: hit.metadata.end_line,
            commit_sha: hit.metadata.commit_sha,
        }
    }
}

/// Count query tokens (repeats included) that occur in the lower-cased snippet.
fn keyword_overlap(tokens: &[String], snippet: &str) -> usize {
    let haystack = snippet.to_lowercase();
    tokens.iter().filter(|t| haystack.contains(t.as_str())).count()
}

impl<E: Embedder> SearchEngine<E> {
    #[must_use]
    pub fn new(embedder: Arc<E>, store: ChunkStore, settings: SearchSettings) -> Self {
        Self {
            embedder,
            store,
            settings,
        }
    }

    /// Nearest chunks to `query`, closest first.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` when vector search is disabled or the query is
    /// blank, and `ExternalService` when embedding or the vector store fails.
    pub async fn semantic_search(
        &self,
        workspace: &str,
        query: &str,
        top_k: Option<usize>,
    ) -> Result<Vec<SearchHit>> {
        if !self.settings.vector_enabled {
            return Err(IndexError::Configuration(
                "vector search is disabled".into(),
            ));
        }
        let query = query.trim();
        if query.is_empty() {
            return Err(IndexError::Configuration("search query is empty".into()));
        }
        let top_k = top_k.unwrap_or(self.settings.default_top_k).max(1);

        let vector = self
            .embedder
            .embed_batch(&[query.to_owned()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                IndexError::ExternalService("embedding response had no vectors".into())
            })?;

        let hits = self.store.query(workspace, vector, top_k).await?;
        tracing::debug!(workspace, top_k, hits = hits.len(), "semantic search");
        Ok(hits.into_iter().map(SearchHit::from).collect())
    }

    /// Semantic candidates re-ranked by keyword overlap with the query.
    ///
    /// # Errors
    ///
    /// Same as [`semantic_search`](Self::semantic_search).
    pub async fn hybrid_search(
        &self,
        workspace: &str,
        query: &str,
        top_k: Option<usize>,
    ) -> Result<Vec<SearchHit>> {
        let top_k = top_k.unwrap_or(self.settings.default_top_k).max(1);
        let candidates =
            HYBRID_MIN_CANDIDATES.max(top_k.saturating_mul(HYBRID_CANDIDATE_FACTOR));
        let mut hits = self
            .semantic_search(workspace, query, Some(candidates))
            .await?;

        let tokens: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(str::to_owned)
            .collect();
        for hit in &mut hits {
            let overlap = keyword_overlap(&tokens, &hit.snippet).min(OVERLAP_CAP);
            #[allow(clippy::cast_precision_loss)]
            let keyword = overlap as f64 * OVERLAP_WEIGHT;
            hit.score = hit.score * VECTOR_WEIGHT + keyword;
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.path.cmp(&b.path))
        });
        hits.truncate(top_k);
        tracing::debug!(workspace, top_k, candidates, hits = hits.len(), "hybrid search");
        Ok(hits)
    }
}
