use super::{SqliteStore, page_offset, truncate_chars};
use crate::error::MemoryError;
use crate::types::{IndexJob, IndexMode, JobCounters, JobFilter, JobStatus, now_rfc3339};

/// Upper bound on the stored job error message.
pub const MAX_ERROR_CHARS: usize = 1000;

const JOB_COLUMNS: &str = "job_id, user_id, workspace, mode, status, total_files, total_chunks, \
     processed_chunks, failed_chunks, percent, elapsed_ms, error_message, source_job_id, \
     created_at, updated_at";

type JobRow = (
    String,
    String,
    String,
    String,
    String,
    i64,
    i64,
    i64,
    i64,
    i64,
    i64,
    Option<String>,
    Option<String>,
    String,
    String,
);

fn job_from_row(row: JobRow) -> Result<IndexJob, MemoryError> {
    let (
        job_id,
        user_id,
        workspace,
        mode,
        status,
        total_files,
        total_chunks,
        processed_chunks,
        failed_chunks,
        percent,
        elapsed_ms,
        error_message,
        source_job_id,
        created_at,
        updated_at,
    ) = row;
    let mode = mode
        .parse::<IndexMode>()
        .map_err(|e| MemoryError::InvalidRow(format!("job {job_id} mode: {e}")))?;
    let status = status
        .parse::<JobStatus>()
        .map_err(|e| MemoryError::InvalidRow(format!("job {job_id} status: {e}")))?;
    Ok(IndexJob {
        counters: JobCounters {
            total_files: u64::try_from(total_files)?,
            total_chunks: u64::try_from(total_chunks)?,
            processed_chunks: u64::try_from(processed_chunks)?,
            failed_chunks: u64::try_from(failed_chunks)?,
            percent: u8::try_from(percent.clamp(0, 100))?,
            elapsed_ms: u64::try_from(elapsed_ms)?,
        },
        job_id,
        user_id,
        workspace,
        mode,
        status,
        error_message,
        source_job_id,
        created_at,
        updated_at,
    })
}

fn counter(value: u64) -> Result<i64, MemoryError> {
    Ok(i64::try_from(value)?)
}

impl SqliteStore {
    /// Persist a new job row exactly as given.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails (including a duplicate job id).
    pub async fn insert_job(&self, job: &IndexJob) -> Result<(), MemoryError> {
        let c = &job.counters;
        sqlx::query(
            "INSERT INTO index_jobs (job_id, user_id, workspace, mode, status, total_files, \
             total_chunks, processed_chunks, failed_chunks, percent, elapsed_ms, error_message, \
             source_job_id, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&job.job_id)
        .bind(&job.user_id)
        .bind(&job.workspace)
        .bind(job.mode.as_str())
        .bind(job.status.as_str())
        .bind(counter(c.total_files)?)
        .bind(counter(c.total_chunks)?)
        .bind(counter(c.processed_chunks)?)
        .bind(counter(c.failed_chunks)?)
        .bind(i64::from(c.percent))
        .bind(counter(c.elapsed_ms)?)
        .bind(
            job.error_message
                .as_deref()
                .map(|m| truncate_chars(m, MAX_ERROR_CHARS)),
        )
        .bind(&job.source_job_id)
        .bind(&job.created_at)
        .bind(&job.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the query fails or the stored row is malformed.
    pub async fn get_job(&self, job_id: &str) -> Result<Option<IndexJob>, MemoryError> {
        let row: Option<JobRow> =
            sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM index_jobs WHERE job_id = ?"))
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(job_from_row).transpose()
    }

    /// One page of jobs, most recently updated first, plus the total match count.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_jobs(
        &self,
        filter: &JobFilter,
        page: u32,
        page_size: u32,
    ) -> Result<(Vec<IndexJob>, u64), MemoryError> {
        let user = filter.user_id.as_deref();
        let workspace = filter.workspace.as_deref();
        let status = filter.status.map(JobStatus::as_str);
        let predicate = "(? IS NULL OR user_id = ?) AND (? IS NULL OR workspace = ?) \
                         AND (? IS NULL OR status = ?)";

        let (total,): (i64,) =
            sqlx::query_as(&format!("SELECT COUNT(*) FROM index_jobs WHERE {predicate}"))
                .bind(user)
                .bind(user)
                .bind(workspace)
                .bind(workspace)
                .bind(status)
                .bind(status)
                .fetch_one(&self.pool)
                .await?;

        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM index_jobs WHERE {predicate} \
             ORDER BY updated_at DESC, job_id LIMIT ? OFFSET ?"
        ))
        .bind(user)
        .bind(user)
        .bind(workspace)
        .bind(workspace)
        .bind(status)
        .bind(status)
        .bind(i64::from(page_size))
        .bind(page_offset(page, page_size))
        .fetch_all(&self.pool)
        .await?;

        let jobs = rows
            .into_iter()
            .map(job_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((jobs, u64::try_from(total)?))
    }

    /// Overwrite the counters of a running job.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn update_progress(
        &self,
        job_id: &str,
        counters: &JobCounters,
    ) -> Result<(), MemoryError> {
        sqlx::query(
            "UPDATE index_jobs SET total_files = ?, total_chunks = ?, processed_chunks = ?, \
             failed_chunks = ?, percent = ?, elapsed_ms = ?, updated_at = ? \
             WHERE job_id = ? AND status = 'running'",
        )
        .bind(counter(counters.total_files)?)
        .bind(counter(counters.total_chunks)?)
        .bind(counter(counters.processed_chunks)?)
        .bind(counter(counters.failed_chunks)?)
        .bind(i64::from(counters.percent))
        .bind(counter(counters.elapsed_ms)?)
        .bind(now_rfc3339())
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Move a running job to a terminal status.
    ///
    /// Jobs already terminal are left untouched, so a status can never
    /// transition twice.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn finalize_job(
        &self,
        job_id: &str,
        status: JobStatus,
        counters: Option<&JobCounters>,
        error_message: Option<&str>,
    ) -> Result<(), MemoryError> {
        let message = error_message.map(|m| truncate_chars(m, MAX_ERROR_CHARS));
        let now = now_rfc3339();
        match counters {
            Some(c) => {
                sqlx::query(
                    "UPDATE index_jobs SET status = ?, total_files = ?, total_chunks = ?, \
                     processed_chunks = ?, failed_chunks = ?, percent = ?, elapsed_ms = ?, \
                     error_message = ?, updated_at = ? WHERE job_id = ? AND status = 'running'",
                )
                .bind(status.as_str())
                .bind(counter(c.total_files)?)
                .bind(counter(c.total_chunks)?)
                .bind(counter(c.processed_chunks)?)
                .bind(counter(c.failed_chunks)?)
                .bind(i64::from(c.percent))
                .bind(counter(c.elapsed_ms)?)
                .bind(message)
                .bind(now)
                .bind(job_id)
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query(
                    "UPDATE index_jobs SET status = ?, error_message = ?, updated_at = ? \
                     WHERE job_id = ? AND status = 'running'",
                )
                .bind(status.as_str())
                .bind(message)
                .bind(now)
                .bind(job_id)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    /// Failed jobs, newest first, optionally restricted to a workspace and owner.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_failed_jobs(
        &self,
        user_id: Option<&str>,
        workspace: Option<&str>,
        limit: u32,
    ) -> Result<Vec<IndexJob>, MemoryError> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM index_jobs WHERE status = 'failed' \
             AND (? IS NULL OR user_id = ?) AND (? IS NULL OR workspace = ?) \
             ORDER BY updated_at DESC, job_id LIMIT ?"
        ))
        .bind(user_id)
        .bind(user_id)
        .bind(workspace)
        .bind(workspace)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(job_from_row).collect()
    }
}
