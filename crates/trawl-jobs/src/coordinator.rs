//! Durable index jobs: creation, background execution and retry of failures.

use std::any::Any;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinError;
use trawl_index::{BuildReport, IndexBuilder, progress};
use trawl_llm::Embedder;
use trawl_memory::{
    FailureRecord, IndexJob, IndexMode, JobCounters, JobFilter, JobStatus, SqliteStore,
    now_rfc3339,
};
use uuid::Uuid;

use crate::error::{JobError, Result};
use crate::locks::WorkspaceLocks;

pub const BUSY_MESSAGE: &str = "workspace busy: another index job is running";

const PROGRESS_CAPACITY: usize = 64;
const RETRY_ALL_LIMIT: u32 = 200;
const MAX_REPORTED_INVALID_PATHS: usize = 20;
const MAX_JOB_PAGE_SIZE: u32 = 200;
const MAX_FAILURE_PAGE_SIZE: u32 = 500;

/// Who is asking. Non-admins only see and act on their own jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    pub user_id: String,
    pub is_admin: bool,
}

impl Requester {
    #[must_use]
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            is_admin: false,
        }
    }

    #[must_use]
    pub fn admin(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            is_admin: true,
        }
    }

    fn can_access(&self, job: &IndexJob) -> bool {
        self.is_admin || job.user_id == self.user_id
    }

    fn owner_filter(&self) -> Option<String> {
        (!self.is_admin).then(|| self.user_id.clone())
    }
}

/// One page of a listing plus the unpaged total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

enum Work {
    Build(IndexMode),
    Retry {
        source_job_id: String,
        paths: Vec<String>,
    },
}

pub struct JobCoordinator<E: Embedder + 'static> {
    builder: Arc<IndexBuilder<E>>,
    db: SqliteStore,
    locks: WorkspaceLocks,
}

impl<E: Embedder + 'static> JobCoordinator<E> {
    #[must_use]
    pub fn new(builder: Arc<IndexBuilder<E>>) -> Self {
        let db = builder.db().clone();
        Self {
            builder,
            db,
            locks: WorkspaceLocks::new(),
        }
    }

    #[must_use]
    pub fn locks(&self) -> &WorkspaceLocks {
        &self.locks
    }

    /// Start a `full` or `incremental` build of `workspace`.
    ///
    /// The job row is returned at once; the build runs in the background. When
    /// another build holds the workspace the new job is finalized `failed`
    /// immediately and returned in that state.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::InvalidMode`] for an unknown mode (or `retry_failed`,
    /// which needs a source job), and [`JobError::Storage`] if the row cannot
    /// be written.
    pub async fn create_job(
        &self,
        requester: &Requester,
        workspace: &str,
        mode: &str,
    ) -> Result<IndexJob> {
        let mode = mode
            .parse::<IndexMode>()
            .ok()
            .filter(|m| *m != IndexMode::RetryFailed)
            .ok_or_else(|| JobError::InvalidMode(mode.to_owned()))?;
        self.start(requester, workspace.trim(), mode, None, Work::Build(mode))
            .await
    }

    /// Retry every path in the failure ledger of a failed job.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`/`Forbidden` for an inaccessible job, `NotFailed` if it
    /// did not fail, and `NoFailures` when its ledger is empty.
    pub async fn retry_job_failures(
        &self,
        requester: &Requester,
        source_job_id: &str,
    ) -> Result<IndexJob> {
        let source = self.get_job(requester, source_job_id).await?;
        if source.status != JobStatus::Failed {
            return Err(JobError::NotFailed {
                job_id: source.job_id,
                status: source.status,
            });
        }
        let paths = self.db.failure_paths(&source.job_id).await?;
        if paths.is_empty() {
            return Err(JobError::NoFailures(source.job_id));
        }
        self.start_retry(requester, source, paths).await
    }

    /// Retry a chosen subset of a job's failed paths.
    ///
    /// Paths are trimmed and deduplicated. Every one must appear in the source
    /// job's ledger; otherwise nothing is started.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`/`Forbidden` for an inaccessible job, `NoFailures` when
    /// its ledger is empty, `RetryPathsRequired` for an empty selection and
    /// `InvalidRetryPaths` listing up to 20 unknown paths.
    pub async fn retry_job_failure_paths(
        &self,
        requester: &Requester,
        source_job_id: &str,
        paths: &[String],
    ) -> Result<IndexJob> {
        let source = self.get_job(requester, source_job_id).await?;
        let known: BTreeSet<String> = self
            .db
            .failure_paths(&source.job_id)
            .await?
            .into_iter()
            .collect();
        if known.is_empty() {
            return Err(JobError::NoFailures(source.job_id));
        }

        let requested: Vec<String> = paths
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_owned)
            .collect();
        if requested.is_empty() {
            return Err(JobError::RetryPathsRequired);
        }
        let invalid: Vec<String> = requested
            .iter()
            .filter(|p| !known.contains(*p))
            .take(MAX_REPORTED_INVALID_PATHS)
            .cloned()
            .collect();
        if !invalid.is_empty() {
            return Err(JobError::InvalidRetryPaths {
                job_id: source.job_id,
                invalid,
            });
        }
        self.start_retry(requester, source, requested).await
    }

    /// Retry the failures of up to 200 failed jobs, newest first.
    ///
    /// Jobs that cannot be retried are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error only if the failed jobs cannot be listed.
    pub async fn retry_all_failed_jobs(
        &self,
        requester: &Requester,
        workspace: Option<&str>,
    ) -> Result<Vec<IndexJob>> {
        let owner = requester.owner_filter();
        let failed = self
            .db
            .list_failed_jobs(owner.as_deref(), workspace, RETRY_ALL_LIMIT)
            .await?;

        let mut created = Vec::new();
        for job in failed {
            match self.retry_job_failures(requester, &job.job_id).await {
                Ok(retry) => created.push(retry),
                Err(e) if e.is_client_error() => {
                    tracing::debug!(job_id = %job.job_id, "skipping retry: {e}");
                }
                Err(e) => {
                    tracing::warn!(job_id = %job.job_id, "retry failed to start: {e}");
                }
            }
        }
        tracing::info!(retried = created.len(), "retry of failed jobs started");
        Ok(created)
    }

    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id and `Forbidden` when the requester
    /// neither owns the job nor is an admin.
    pub async fn get_job(&self, requester: &Requester, job_id: &str) -> Result<IndexJob> {
        let job = self
            .db
            .get_job(job_id)
            .await?
            .ok_or_else(|| JobError::NotFound(job_id.to_owned()))?;
        if !requester.can_access(&job) {
            return Err(JobError::Forbidden(job_id.to_owned()));
        }
        Ok(job)
    }

    /// Jobs visible to the requester, most recently updated first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_jobs(
        &self,
        requester: &Requester,
        workspace: Option<&str>,
        status: Option<JobStatus>,
        page: u32,
        page_size: u32,
    ) -> Result<Page<IndexJob>> {
        let filter = JobFilter {
            user_id: requester.owner_filter(),
            workspace: workspace.map(str::to_owned),
            status,
        };
        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_JOB_PAGE_SIZE);
        let (items, total) = self.db.list_jobs(&filter, page, page_size).await?;
        Ok(Page {
            items,
            total,
            page,
            page_size,
        })
    }

    /// Failure ledger of one job, newest first.
    ///
    /// # Errors
    ///
    /// Same access errors as [`get_job`](Self::get_job).
    pub async fn list_job_failures(
        &self,
        requester: &Requester,
        job_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Page<FailureRecord>> {
        let job = self.get_job(requester, job_id).await?;
        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_FAILURE_PAGE_SIZE);
        let (items, total) = self.db.list_failures(&job.job_id, page, page_size).await?;
        Ok(Page {
            items,
            total,
            page,
            page_size,
        })
    }

    /// Poll a job until it leaves `running`.
    ///
    /// # Errors
    ///
    /// Same access errors as [`get_job`](Self::get_job).
    pub async fn wait_for_job(
        &self,
        requester: &Requester,
        job_id: &str,
        poll: Duration,
    ) -> Result<IndexJob> {
        loop {
            let job = self.get_job(requester, job_id).await?;
            if job.status.is_terminal() {
                return Ok(job);
            }
            tokio::time::sleep(poll).await;
        }
    }

    async fn start_retry(
        &self,
        requester: &Requester,
        source: IndexJob,
        paths: Vec<String>,
    ) -> Result<IndexJob> {
        let work = Work::Retry {
            source_job_id: source.job_id.clone(),
            paths,
        };
        self.start(
            requester,
            &source.workspace,
            IndexMode::RetryFailed,
            Some(source.job_id),
            work,
        )
        .await
    }

    async fn start(
        &self,
        requester: &Requester,
        workspace: &str,
        mode: IndexMode,
        source_job_id: Option<String>,
        work: Work,
    ) -> Result<IndexJob> {
        let now = now_rfc3339();
        let job = IndexJob {
            job_id: Uuid::new_v4().to_string(),
            user_id: requester.user_id.clone(),
            workspace: workspace.to_owned(),
            mode,
            status: JobStatus::Running,
            counters: JobCounters::default(),
            error_message: None,
            source_job_id,
            created_at: now.clone(),
            updated_at: now,
        };
        self.db.insert_job(&job).await?;

        let Some(guard) = self.locks.try_acquire(workspace) else {
            tracing::warn!(job_id = %job.job_id, workspace, "{BUSY_MESSAGE}");
            self.db
                .finalize_job(&job.job_id, JobStatus::Failed, None, Some(BUSY_MESSAGE))
                .await?;
            return self
                .db
                .get_job(&job.job_id)
                .await?
                .ok_or(JobError::NotFound(job.job_id));
        };

        tracing::info!(job_id = %job.job_id, workspace, mode = %mode, "index job started");
        self.spawn_worker(job.clone(), guard, work);
        Ok(job)
    }

    fn spawn_worker(&self, job: IndexJob, guard: OwnedMutexGuard<()>, work: Work) {
        let builder = Arc::clone(&self.builder);
        let db = self.db.clone();
        tokio::spawn(async move {
            let _guard = guard;
            let (events, mut rx) = progress::channel(PROGRESS_CAPACITY);

            let persister = {
                let db = db.clone();
                let job_id = job.job_id.clone();
                tokio::spawn(async move {
                    while let Some(event) = rx.recv().await {
                        if let Err(e) = db.update_progress(&job_id, &event.counters()).await {
                            tracing::warn!(job_id = %job_id, "failed to persist progress: {e}");
                        }
                    }
                })
            };

            let run = {
                let job_id = job.job_id.clone();
                let workspace = job.workspace.clone();
                tokio::spawn(async move {
                    match work {
                        Work::Build(mode) => builder.build(&workspace, mode, &job_id, &events).await,
                        Work::Retry {
                            source_job_id,
                            paths,
                        } => {
                            builder
                                .retry_paths(&workspace, &source_job_id, &job_id, &paths, &events)
                                .await
                        }
                    }
                })
            };

            let outcome = run.await;
            if let Err(e) = persister.await {
                tracing::warn!(job_id = %job.job_id, "progress task ended abnormally: {e}");
            }
            finish(&db, &job, outcome).await;
        });
    }
}

async fn finish(
    db: &SqliteStore,
    job: &IndexJob,
    outcome: std::result::Result<trawl_index::Result<BuildReport>, JoinError>,
) {
    let (status, counters, message) = match outcome {
        Ok(Ok(report)) => {
            let counters = JobCounters {
                total_files: report.total_files,
                total_chunks: report.total_chunks,
                processed_chunks: report.processed_chunks,
                failed_chunks: report.failed_chunks,
                percent: 100,
                elapsed_ms: report.elapsed_ms,
            };
            if report.failed_chunks > 0 {
                let message = format!(
                    "index finished with failures: failed_chunks={}",
                    report.failed_chunks
                );
                (JobStatus::Failed, Some(counters), Some(message))
            } else {
                (JobStatus::Done, Some(counters), None)
            }
        }
        Ok(Err(e)) => (JobStatus::Failed, None, Some(e.to_string())),
        Err(e) if e.is_panic() => {
            let message = format!("index worker panicked: {}", panic_message(&*e.into_panic()));
            (JobStatus::Failed, None, Some(message))
        }
        Err(e) => (JobStatus::Failed, None, Some(format!("index worker stopped: {e}"))),
    };

    match &message {
        Some(m) => tracing::warn!(job_id = %job.job_id, workspace = %job.workspace, "index job failed: {m}"),
        None => tracing::info!(job_id = %job.job_id, workspace = %job.workspace, "index job done"),
    }
    if let Err(e) = db
        .finalize_job(&job.job_id, status, counters.as_ref(), message.as_deref())
        .await
    {
        tracing::error!(job_id = %job.job_id, "failed to finalize job: {e}");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requester_access() {
        let job = IndexJob {
            job_id: "j".into(),
            user_id: "alice".into(),
            workspace: "w".into(),
            mode: IndexMode::Full,
            status: JobStatus::Running,
            counters: JobCounters::default(),
            error_message: None,
            source_job_id: None,
            created_at: String::new(),
            updated_at: String::new(),
        };
        assert!(Requester::user("alice").can_access(&job));
        assert!(!Requester::user("bob").can_access(&job));
        assert!(Requester::admin("root").can_access(&job));
        assert_eq!(Requester::user("bob").owner_filter().as_deref(), Some("bob"));
        assert_eq!(Requester::admin("root").owner_filter(), None);
    }

    #[test]
    fn panic_payloads() {
        let s: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*s), "boom");
        let s: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*s), "bang");
        let s: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(&*s), "unknown panic");
    }
}
