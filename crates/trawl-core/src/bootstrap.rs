//! Turns a validated [`Config`] into stores, builders and the job coordinator.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use trawl_index::{ChunkStore, DirectoryWorkspaces, GitCli, IndexBuilder, SearchEngine};
use trawl_jobs::JobCoordinator;
use trawl_llm::Embedder;
use trawl_llm::openai::OpenAiEmbedder;
use trawl_memory::{InMemoryVectorStore, QdrantOps, SqliteStore, VectorStore};

use crate::config::{Config, EmbeddingConfig, StorageConfig, VectorBackend};

/// Every long-lived component of one process.
pub struct App<E: Embedder + 'static> {
    pub config: Config,
    pub builder: Arc<IndexBuilder<E>>,
    pub coordinator: JobCoordinator<E>,
    pub search: SearchEngine<E>,
}

#[must_use]
pub fn openai_embedder(config: &EmbeddingConfig) -> OpenAiEmbedder {
    OpenAiEmbedder::new(
        config.base_url.clone(),
        config.model.clone(),
        config.api_key.clone(),
    )
    .with_timeout(Duration::from_secs(config.timeout_secs.max(1)))
}

/// # Errors
///
/// Returns an error if the Qdrant client cannot be created.
pub fn vector_backend(config: &StorageConfig) -> anyhow::Result<Arc<dyn VectorStore>> {
    match config.vector_backend {
        VectorBackend::Memory => {
            tracing::info!("using in-memory vector store");
            Ok(Arc::new(InMemoryVectorStore::new()))
        }
        VectorBackend::Qdrant => {
            tracing::info!(url = %config.qdrant_url, "using Qdrant vector store");
            let ops = QdrantOps::new(&config.qdrant_url)
                .with_context(|| format!("failed to create Qdrant client for {}", config.qdrant_url))?;
            Ok(Arc::new(ops))
        }
    }
}

async fn open_sqlite(path: &str) -> anyhow::Result<SqliteStore> {
    if path != ":memory:"
        && let Some(parent) = std::path::Path::new(path).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    SqliteStore::new(path)
        .await
        .with_context(|| format!("failed to open job database {path}"))
}

/// Wire every component around `embedder`.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or a store cannot be opened.
pub async fn build_app<E: Embedder + 'static>(
    mut config: Config,
    embedder: Arc<E>,
) -> anyhow::Result<App<E>> {
    config.validate()?;
    let embedder_name = embedder.name().to_owned();

    let db = open_sqlite(&config.storage.sqlite_path).await?;
    let store = ChunkStore::new(
        vector_backend(&config.storage)?,
        config.storage.collection.clone(),
    );
    let rules = Arc::new(config.chunk_rules()?);

    let builder = Arc::new(IndexBuilder::new(
        Arc::clone(&embedder),
        store.clone(),
        db,
        Arc::new(GitCli),
        Arc::new(DirectoryWorkspaces::new(config.index.workspaces_dir.clone())),
        rules,
        config.build_settings(),
    ));
    let coordinator = JobCoordinator::new(Arc::clone(&builder));
    let search = SearchEngine::new(embedder, store, config.search_settings());

    tracing::info!(
        embedder = %embedder_name,
        workspaces = %config.index.workspaces_dir.display(),
        sqlite = %config.storage.sqlite_path,
        "trawl initialized"
    );
    Ok(App {
        config,
        builder,
        coordinator,
        search,
    })
}
