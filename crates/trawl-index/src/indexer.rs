//! Build orchestrator: detect → chunk → embed → store, one attempt per call.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use trawl_llm::Embedder;
use trawl_memory::{IndexMode, SqliteStore};

use crate::changes::ChangeDetector;
use crate::chunker::{Chunk, chunk_file};
use crate::error::Result;
use crate::progress::{ProgressEvent, ProgressSender};
use crate::rules::ChunkRules;
use crate::store::ChunkStore;
use crate::vcs::VersionControl;
use crate::workspace::WorkspaceResolver;

/// Info log cadence, in processed chunks.
const LOG_EVERY_CHUNKS: u64 = 50;

pub const RETRY_MISSING_REASON: &str = "file not found during retry";

/// Knobs a build reads from settings.
#[derive(Debug, Clone, Copy)]
pub struct BuildSettings {
    /// Texts per embedding call.
    pub batch_size: usize,
    pub max_file_bytes: u64,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            batch_size: 32,
            max_file_bytes: 1024 * 1024,
        }
    }
}

/// Final counters of one build attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub workspace: String,
    pub total_files: u64,
    pub total_chunks: u64,
    pub processed_chunks: u64,
    pub failed_chunks: u64,
    pub elapsed_ms: u64,
    pub head_commit: String,
}

/// A changed file after the pre-chunk pass.
enum Prepared {
    Ready(String, Vec<Chunk>),
    Failed(String, String),
}

struct Tally {
    workspace: String,
    started: Instant,
    total_files: u64,
    total_chunks: u64,
    processed: u64,
    failed: u64,
}

impl Tally {
    fn new(workspace: &str, started: Instant) -> Self {
        Self {
            workspace: workspace.to_owned(),
            started,
            total_files: 0,
            total_chunks: 0,
            processed: 0,
            failed: 0,
        }
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn event(&self, message: impl Into<String>) -> ProgressEvent {
        ProgressEvent {
            workspace: self.workspace.clone(),
            total_files: self.total_files,
            total_chunks: self.total_chunks,
            processed_chunks: self.processed,
            failed_chunks: self.failed,
            elapsed_ms: self.elapsed_ms(),
            message: message.into(),
        }
    }

    fn report(&self, head_commit: &str) -> BuildReport {
        BuildReport {
            workspace: self.workspace.clone(),
            total_files: self.total_files,
            total_chunks: self.total_chunks,
            processed_chunks: self.processed,
            failed_chunks: self.failed,
            elapsed_ms: self.elapsed_ms(),
            head_commit: head_commit.to_owned(),
        }
    }
}

fn count(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

/// Runs index builds for any workspace the resolver knows.
pub struct IndexBuilder<E: Embedder> {
    embedder: Arc<E>,
    store: ChunkStore,
    db: SqliteStore,
    vcs: Arc<dyn VersionControl>,
    workspaces: Arc<dyn WorkspaceResolver>,
    rules: Arc<ChunkRules>,
    settings: BuildSettings,
}

impl<E: Embedder> IndexBuilder<E> {
    #[must_use]
    pub fn new(
        embedder: Arc<E>,
        store: ChunkStore,
        db: SqliteStore,
        vcs: Arc<dyn VersionControl>,
        workspaces: Arc<dyn WorkspaceResolver>,
        rules: Arc<ChunkRules>,
        settings: BuildSettings,
    ) -> Self {
        Self {
            embedder,
            store,
            db,
            vcs,
            workspaces,
            rules,
            settings,
        }
    }

    #[must_use]
    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    #[must_use]
    pub fn db(&self) -> &SqliteStore {
        &self.db
    }

    /// Version-control head, or a timestamped snapshot id outside a repository.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace is a repository but `HEAD` cannot be read.
    pub async fn resolve_head(&self, root: &Path) -> Result<String> {
        if self.vcs.is_repository(root) {
            return Ok(self.vcs.head(root).await?);
        }
        Ok(chrono::Utc::now()
            .format("snapshot-%Y%m%d%H%M%S")
            .to_string())
    }

    /// Perform one build attempt of `workspace`.
    ///
    /// Per-file failures are recorded in the failure ledger under `job_id` and
    /// counted in `failed_chunks`; they never abort the build. The commit
    /// pointer advances to the resolved head once every file was attempted.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace cannot be resolved, head resolution
    /// or full enumeration fails, the workspace purge fails, or the job
    /// database is unavailable.
    pub async fn build(
        &self,
        workspace: &str,
        mode: IndexMode,
        job_id: &str,
        events: &ProgressSender,
    ) -> Result<BuildReport> {
        let started = Instant::now();
        let root = self.workspaces.resolve(workspace)?;
        let head = self.resolve_head(&root).await?;
        let last = self.db.last_indexed_commit(workspace).await?;

        let changes = ChangeDetector::new(Arc::clone(&self.vcs), Arc::clone(&self.rules))
            .detect(&root, mode, last.as_deref(), &head)
            .await?;
        if changes.full_rebuild {
            tracing::info!(workspace, job_id, "full rebuild, purging workspace vectors");
            self.store.delete_workspace(workspace).await?;
        }

        let mut tally = Tally::new(workspace, started);
        tally.total_files = count(changes.total_files());
        let prepared = self.prepare(&root, &changes.changed, &mut tally).await;

        if tally.total_files == 0 {
            self.db.set_last_indexed_commit(workspace, &head).await?;
            events
                .emit(tally.event("index up to date, commit pointer advanced"))
                .await;
            tracing::info!(workspace, job_id, head, "nothing to index");
            return Ok(tally.report(&head));
        }

        tracing::info!(
            workspace,
            job_id,
            total_files = tally.total_files,
            total_chunks = tally.total_chunks,
            full_rebuild = changes.full_rebuild,
            "index build started"
        );
        events.emit(tally.event("index build started")).await;

        for path in &changes.deleted {
            if let Err(e) = self.store.delete_path(workspace, path).await {
                tally.failed += 1;
                tracing::warn!(workspace, job_id, path, "vector delete failed: {e}");
                self.db
                    .record_failure(job_id, workspace, path, &format!("delete failed: {e}"), 0)
                    .await?;
            }
            events.emit(tally.event(format!("removed vectors: {path}"))).await;
        }

        for file in prepared {
            match file {
                Prepared::Failed(path, reason) => {
                    tally.failed += 1;
                    self.db
                        .record_failure(job_id, workspace, &path, &reason, 0)
                        .await?;
                    events.emit(tally.event(format!("file failed: {path}"))).await;
                }
                Prepared::Ready(path, chunks) => {
                    match self
                        .index_file(workspace, &head, &path, &chunks, &mut tally, events)
                        .await
                    {
                        Ok(()) => {}
                        Err(e) => {
                            tally.failed += count(chunks.len().max(1));
                            tracing::warn!(workspace, job_id, path, "indexing file failed: {e}");
                            self.db
                                .record_failure(job_id, workspace, &path, &e.to_string(), 0)
                                .await?;
                            events.emit(tally.event(format!("file failed: {path}"))).await;
                        }
                    }
                }
            }
        }

        self.db.set_last_indexed_commit(workspace, &head).await?;
        let report = tally.report(&head);
        events.emit(tally.event("index build finished")).await;
        tracing::info!(
            workspace,
            job_id,
            head,
            processed_chunks = report.processed_chunks,
            failed_chunks = report.failed_chunks,
            elapsed_ms = report.elapsed_ms,
            "index build finished"
        );
        Ok(report)
    }

    /// Re-index exactly `paths` for a retry job.
    ///
    /// A path that succeeds has its failure rows under `source_job_id`
    /// removed. A path that fails again bumps the source rows' `retry_count`
    /// and is recorded under `retry_job_id` with the bumped count. The commit
    /// pointer is left alone.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace cannot be resolved, head resolution
    /// fails, or the job database is unavailable.
    pub async fn retry_paths(
        &self,
        workspace: &str,
        source_job_id: &str,
        retry_job_id: &str,
        paths: &[String],
        events: &ProgressSender,
    ) -> Result<BuildReport> {
        let started = Instant::now();
        let root = self.workspaces.resolve(workspace)?;
        let head = self.resolve_head(&root).await?;

        let unique: Vec<String> = paths
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(str::to_owned)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut tally = Tally::new(workspace, started);
        tally.total_files = count(unique.len());

        let mut missing = Vec::new();
        let mut present = Vec::new();
        for path in unique {
            if tokio::fs::metadata(root.join(&path))
                .await
                .is_ok_and(|m| m.is_file())
            {
                present.push(path);
            } else {
                missing.push(path);
            }
        }
        let prepared = self.prepare(&root, &present, &mut tally).await;

        tracing::info!(
            workspace,
            source_job_id,
            retry_job_id,
            total_files = tally.total_files,
            missing = missing.len(),
            "retry started"
        );
        events.emit(tally.event("retry started")).await;

        for path in missing {
            tally.failed += 1;
            self.record_retry_failure(workspace, source_job_id, retry_job_id, &path, RETRY_MISSING_REASON)
                .await?;
            events
                .emit(tally.event(format!("retry failed, file missing: {path}")))
                .await;
        }

        for file in prepared {
            match file {
                Prepared::Failed(path, reason) => {
                    tally.failed += 1;
                    self.record_retry_failure(
                        workspace,
                        source_job_id,
                        retry_job_id,
                        &path,
                        &format!("retry failed: {reason}"),
                    )
                    .await?;
                    events.emit(tally.event(format!("retry failed: {path}"))).await;
                }
                Prepared::Ready(path, chunks) => {
                    match self
                        .index_file(workspace, &head, &path, &chunks, &mut tally, events)
                        .await
                    {
                        Ok(()) => {
                            self.db.delete_failures(source_job_id, &path).await?;
                            events.emit(tally.event(format!("retry succeeded: {path}"))).await;
                        }
                        Err(e) => {
                            tally.failed += count(chunks.len().max(1));
                            self.record_retry_failure(
                                workspace,
                                source_job_id,
                                retry_job_id,
                                &path,
                                &format!("retry failed: {e}"),
                            )
                            .await?;
                            events.emit(tally.event(format!("retry failed: {path}"))).await;
                        }
                    }
                }
            }
        }

        let report = tally.report(&head);
        events.emit(tally.event("retry finished")).await;
        tracing::info!(
            workspace,
            retry_job_id,
            processed_chunks = report.processed_chunks,
            failed_chunks = report.failed_chunks,
            "retry finished"
        );
        Ok(report)
    }

    /// Chunk every path up front so totals are known before any embedding call.
    async fn prepare(&self, root: &Path, paths: &[String], tally: &mut Tally) -> Vec<Prepared> {
        let mut prepared = Vec::with_capacity(paths.len());
        for path in paths {
            match chunk_file(root, path, &self.rules, self.settings.max_file_bytes).await {
                Ok(chunks) => {
                    tally.total_chunks += count(chunks.len());
                    prepared.push(Prepared::Ready(path.clone(), chunks));
                }
                Err(e) => {
                    tracing::warn!(path, "cannot chunk file: {e}");
                    prepared.push(Prepared::Failed(path.clone(), e.to_string()));
                }
            }
        }
        prepared
    }

    async fn index_file(
        &self,
        workspace: &str,
        head: &str,
        path: &str,
        chunks: &[Chunk],
        tally: &mut Tally,
        events: &ProgressSender,
    ) -> Result<()> {
        self.store.delete_path(workspace, path).await?;

        let batch_size = self.settings.batch_size.max(1);
        for (batch_no, batch) in chunks.chunks(batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self.embedder.embed_batch(&texts).await?;
            self.store
                .upsert_at(workspace, head, path, batch, vectors, batch_no * batch_size)
                .await?;

            let before = tally.processed;
            tally.processed += count(batch.len());
            if before / LOG_EVERY_CHUNKS != tally.processed / LOG_EVERY_CHUNKS {
                tracing::info!(
                    workspace,
                    total_files = tally.total_files,
                    total_chunks = tally.total_chunks,
                    processed_chunks = tally.processed,
                    failed_chunks = tally.failed,
                    elapsed_ms = tally.elapsed_ms(),
                    "index progress"
                );
            }
            events.emit(tally.event(format!("indexed: {path}"))).await;
        }
        tracing::debug!(workspace, path, chunks = chunks.len(), "file indexed");
        Ok(())
    }

    async fn record_retry_failure(
        &self,
        workspace: &str,
        source_job_id: &str,
        retry_job_id: &str,
        path: &str,
        reason: &str,
    ) -> Result<()> {
        let retry_count = self
            .db
            .increment_retry_count(source_job_id, path)
            .await?
            .unwrap_or(1);
        tracing::warn!(workspace, retry_job_id, path, retry_count, "{reason}");
        self.db
            .record_failure(retry_job_id, workspace, path, reason, retry_count)
            .await?;
        Ok(())
    }
}
