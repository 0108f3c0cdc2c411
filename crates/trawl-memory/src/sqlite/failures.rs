use super::{SqliteStore, page_offset, truncate_chars};
use crate::error::MemoryError;
use crate::types::{FailureRecord, now_rfc3339};

/// Upper bound on a stored failure reason.
pub const MAX_REASON_CHARS: usize = 2000;

type FailureRow = (i64, String, String, String, String, i64, String);

fn failure_from_row(row: FailureRow) -> Result<FailureRecord, MemoryError> {
    let (id, job_id, workspace, path, reason, retry_count, created_at) = row;
    Ok(FailureRecord {
        id,
        job_id,
        workspace,
        path,
        reason,
        retry_count: u32::try_from(retry_count)?,
        created_at,
    })
}

impl SqliteStore {
    /// Append one failure row. The reason is cut to [`MAX_REASON_CHARS`].
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn record_failure(
        &self,
        job_id: &str,
        workspace: &str,
        path: &str,
        reason: &str,
        retry_count: u32,
    ) -> Result<(), MemoryError> {
        sqlx::query(
            "INSERT INTO index_failures (job_id, workspace, path, reason, retry_count, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(job_id)
        .bind(workspace)
        .bind(path)
        .bind(truncate_chars(reason, MAX_REASON_CHARS))
        .bind(i64::from(retry_count))
        .bind(now_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// One page of a job's failures, newest first, plus the total count.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_failures(
        &self,
        job_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<(Vec<FailureRecord>, u64), MemoryError> {
        let (total,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM index_failures WHERE job_id = ?")
                .bind(job_id)
                .fetch_one(&self.pool)
                .await?;

        let rows: Vec<FailureRow> = sqlx::query_as(
            "SELECT id, job_id, workspace, path, reason, retry_count, created_at \
             FROM index_failures WHERE job_id = ? \
             ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
        )
        .bind(job_id)
        .bind(i64::from(page_size))
        .bind(page_offset(page, page_size))
        .fetch_all(&self.pool)
        .await?;

        let records = rows
            .into_iter()
            .map(failure_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((records, u64::try_from(total)?))
    }

    /// Distinct failed paths of a job, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn failure_paths(&self, job_id: &str) -> Result<Vec<String>, MemoryError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT path FROM index_failures WHERE job_id = ? ORDER BY path",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    /// Drop every failure row of `job_id` for `path`. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn delete_failures(&self, job_id: &str, path: &str) -> Result<u64, MemoryError> {
        let result = sqlx::query("DELETE FROM index_failures WHERE job_id = ? AND path = ?")
            .bind(job_id)
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Bump `retry_count` on the failure rows of `job_id` for `path`.
    ///
    /// Returns the new highest count, or `None` when no row matched.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn increment_retry_count(
        &self,
        job_id: &str,
        path: &str,
    ) -> Result<Option<u32>, MemoryError> {
        sqlx::query(
            "UPDATE index_failures SET retry_count = retry_count + 1 WHERE job_id = ? AND path = ?",
        )
        .bind(job_id)
        .bind(path)
        .execute(&self.pool)
        .await?;

        let (max,): (Option<i64>,) = sqlx::query_as(
            "SELECT MAX(retry_count) FROM index_failures WHERE job_id = ? AND path = ?",
        )
        .bind(job_id)
        .bind(path)
        .fetch_one(&self.pool)
        .await?;
        max.map(u32::try_from).transpose().map_err(Into::into)
    }
}
