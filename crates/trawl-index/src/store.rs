//! Workspace-scoped chunk vectors on top of any [`VectorStore`] backend.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use trawl_memory::{VectorFilter, VectorPoint, VectorStore};
use uuid::Uuid;

use crate::chunker::Chunk;
use crate::error::{IndexError, Result};

pub const DEFAULT_COLLECTION: &str = "trawl_workspace_chunks";

/// Payload key holding the chunk text.
const DOCUMENT_KEY: &str = "document";

/// Metadata stored alongside every chunk vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkMetadata {
    pub workspace: String,
    pub path: String,
    pub start_line: u64,
    pub end_line: u64,
    pub chunk_id: String,
    pub commit_sha: String,
    pub chunk_index: u64,
    pub updated_at: String,
}

/// One nearest-neighbour hit. `distance` is `1 - cosine similarity`.
#[derive(Debug, Clone)]
pub struct StoredHit {
    pub metadata: ChunkMetadata,
    pub document: String,
    pub distance: f32,
}

/// Vector store adapter keyed by workspace, path and chunk id.
#[derive(Clone)]
pub struct ChunkStore {
    backend: Arc<dyn VectorStore>,
    collection: String,
}

impl std::fmt::Debug for ChunkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkStore")
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}

/// Stable record id for a chunk: UUID v5 over `workspace:path:chunk_id`.
#[must_use]
pub fn record_id(workspace: &str, path: &str, chunk_id: &str) -> String {
    let key = format!("{workspace}:{path}:{chunk_id}");
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string()
}

impl ChunkStore {
    #[must_use]
    pub fn new(backend: Arc<dyn VectorStore>, collection: impl Into<String>) -> Self {
        Self {
            backend,
            collection: collection.into(),
        }
    }

    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Remove every vector of `workspace`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend delete fails.
    pub async fn delete_workspace(&self, workspace: &str) -> Result<()> {
        self.delete(VectorFilter::text_eq([("workspace", workspace)]))
            .await
    }

    /// Remove every vector of one file.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend delete fails.
    pub async fn delete_path(&self, workspace: &str, path: &str) -> Result<()> {
        self.delete(VectorFilter::text_eq([
            ("workspace", workspace),
            ("path", path),
        ]))
        .await
    }

    async fn delete(&self, filter: VectorFilter) -> Result<()> {
        if !self.backend.collection_exists(&self.collection).await? {
            return Ok(());
        }
        self.backend
            .delete_by_filter(&self.collection, filter)
            .await?;
        Ok(())
    }

    /// Write or overwrite vectors for a batch of one file's chunks.
    ///
    /// The collection is created on first use with the batch's vector size.
    ///
    /// # Errors
    ///
    /// Returns an error on a chunk/vector count mismatch or a backend failure.
    pub async fn upsert(
        &self,
        workspace: &str,
        commit_sha: &str,
        path: &str,
        chunks: &[Chunk],
        vectors: Vec<Vec<f32>>,
    ) -> Result<()> {
        self.upsert_at(workspace, commit_sha, path, chunks, vectors, 0)
            .await
    }

    /// Like [`upsert`](Self::upsert), numbering `chunk_index` from `first_index`
    /// so a file written in several batches keeps file-wide positions.
    ///
    /// # Errors
    ///
    /// Returns an error on a chunk/vector count mismatch or a backend failure.
    pub async fn upsert_at(
        &self,
        workspace: &str,
        commit_sha: &str,
        path: &str,
        chunks: &[Chunk],
        vectors: Vec<Vec<f32>>,
        first_index: usize,
    ) -> Result<()> {
        if chunks.len() != vectors.len() {
            return Err(IndexError::ExternalService(format!(
                "chunk/vector count mismatch: {} chunks, {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }
        let Some(first) = vectors.first() else {
            return Ok(());
        };
        let vector_size = u64::try_from(first.len())?;
        self.backend
            .ensure_collection(&self.collection, vector_size)
            .await?;

        let updated_at = trawl_memory::now_rfc3339();
        let points = chunks
            .iter()
            .zip(vectors)
            .enumerate()
            .map(|(index, (chunk, vector))| {
                let payload = HashMap::from([
                    ("workspace".to_owned(), serde_json::json!(workspace)),
                    ("path".to_owned(), serde_json::json!(path)),
                    ("start_line".to_owned(), serde_json::json!(chunk.start_line)),
                    ("end_line".to_owned(), serde_json::json!(chunk.end_line)),
                    ("chunk_id".to_owned(), serde_json::json!(chunk.chunk_id)),
                    ("commit_sha".to_owned(), serde_json::json!(commit_sha)),
                    ("chunk_index".to_owned(), serde_json::json!(first_index + index)),
                    ("updated_at".to_owned(), serde_json::json!(updated_at)),
                    (DOCUMENT_KEY.to_owned(), serde_json::json!(chunk.text)),
                ]);
                VectorPoint {
                    id: record_id(workspace, path, &chunk.chunk_id),
                    vector,
                    payload,
                }
            })
            .collect();

        self.backend.upsert(&self.collection, points).await?;
        Ok(())
    }

    /// Nearest chunks of `workspace`, closest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend search fails.
    pub async fn query(
        &self,
        workspace: &str,
        vector: Vec<f32>,
        top_k: usize,
    ) -> Result<Vec<StoredHit>> {
        if !self.backend.collection_exists(&self.collection).await? {
            return Ok(Vec::new());
        }
        let limit = u64::try_from(top_k.max(1))?;
        let hits = self
            .backend
            .search(
                &self.collection,
                vector,
                limit,
                Some(VectorFilter::text_eq([("workspace", workspace)])),
            )
            .await?;

        Ok(hits
            .into_iter()
            .map(|hit| {
                let text = |key: &str| {
                    hit.payload
                        .get(key)
                        .and_then(serde_json::Value::as_str)
                        .unwrap_or_default()
                        .to_owned()
                };
                let number = |key: &str, default: u64| {
                    hit.payload
                        .get(key)
                        .and_then(serde_json::Value::as_u64)
                        .unwrap_or(default)
                };
                StoredHit {
                    metadata: ChunkMetadata {
                        workspace: text("workspace"),
                        path: text("path"),
                        start_line: number("start_line", 1),
                        end_line: number("end_line", 1),
                        chunk_id: text("chunk_id"),
                        commit_sha: text("commit_sha"),
                        chunk_index: number("chunk_index", 0),
                        updated_at: text("updated_at"),
                    },
                    document: text(DOCUMENT_KEY),
                    distance: 1.0 - hit.score,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trawl_memory::InMemoryVectorStore;

    fn chunk(path: &str, start: usize, text: &str) -> Chunk {
        Chunk {
            chunk_id: crate::chunker::chunk_id(path, start, start, text),
            path: path.into(),
            start_line: start,
            end_line: start,
            text: text.into(),
        }
    }

    fn setup() -> (Arc<InMemoryVectorStore>, ChunkStore) {
        let backend = Arc::new(InMemoryVectorStore::new());
        let store = ChunkStore::new(backend.clone(), "test");
        (backend, store)
    }

    #[tokio::test]
    async fn upsert_same_chunk_twice_keeps_one_record() {
        let (backend, store) = setup();
        let chunks = vec![chunk("a.md", 1, "hello")];
        store
            .upsert("w", "c1", "a.md", &chunks, vec![vec![1.0, 0.0]])
            .await
            .unwrap();
        store
            .upsert("w", "c2", "a.md", &chunks, vec![vec![1.0, 0.0]])
            .await
            .unwrap();
        assert_eq!(backend.len("test"), 1);

        let hits = store.query("w", vec![1.0, 0.0], 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.commit_sha, "c2");
        assert_eq!(hits[0].document, "hello");
        assert!(hits[0].distance.abs() < 1e-6);
    }

    #[tokio::test]
    async fn query_is_workspace_scoped_and_ordered() {
        let (_, store) = setup();
        store
            .upsert(
                "w1",
                "c",
                "a.md",
                &[chunk("a.md", 1, "near"), chunk("a.md", 2, "far")],
                vec![vec![1.0, 0.0], vec![0.0, 1.0]],
            )
            .await
            .unwrap();
        store
            .upsert("w2", "c", "b.md", &[chunk("b.md", 1, "other")], vec![vec![1.0, 0.0]])
            .await
            .unwrap();

        let hits = store.query("w1", vec![1.0, 0.1], 10).await.unwrap();
        let docs: Vec<_> = hits.iter().map(|h| h.document.as_str()).collect();
        assert_eq!(docs, vec!["near", "far"]);
        assert!(hits[0].distance <= hits[1].distance);
        assert_eq!(hits[1].metadata.chunk_index, 1);
        assert_eq!(hits[1].metadata.start_line, 2);
    }

    #[tokio::test]
    async fn scoped_deletes() {
        let (backend, store) = setup();
        store
            .upsert(
                "w1",
                "c",
                "a.md",
                &[chunk("a.md", 1, "a")],
                vec![vec![1.0, 0.0]],
            )
            .await
            .unwrap();
        store
            .upsert("w1", "c", "b.md", &[chunk("b.md", 1, "b")], vec![vec![1.0, 0.0]])
            .await
            .unwrap();
        store
            .upsert("w2", "c", "a.md", &[chunk("a.md", 1, "a")], vec![vec![1.0, 0.0]])
            .await
            .unwrap();
        assert_eq!(backend.len("test"), 3);

        store.delete_path("w1", "a.md").await.unwrap();
        assert_eq!(backend.len("test"), 2);

        store.delete_workspace("w1").await.unwrap();
        assert_eq!(backend.len("test"), 1);
        assert_eq!(store.query("w2", vec![1.0, 0.0], 5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn operations_before_first_upsert_are_noops() {
        let (_, store) = setup();
        store.delete_workspace("w").await.unwrap();
        store.delete_path("w", "a.md").await.unwrap();
        assert!(store.query("w", vec![1.0], 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn count_mismatch_is_rejected() {
        let (_, store) = setup();
        let err = store
            .upsert("w", "c", "a.md", &[chunk("a.md", 1, "a")], vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::ExternalService(_)));
    }

    #[test]
    fn record_ids_are_stable_uuids() {
        let a = record_id("w", "a.md", "abc");
        assert_eq!(a, record_id("w", "a.md", "abc"));
        assert_ne!(a, record_id("w2", "a.md", "abc"));
        assert!(Uuid::parse_str(&a).is_ok());
    }
}
