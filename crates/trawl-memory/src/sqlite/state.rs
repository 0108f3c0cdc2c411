use super::SqliteStore;
use crate::error::MemoryError;
use crate::types::now_rfc3339;

impl SqliteStore {
    /// Commit the last build of `workspace` ran against, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn last_indexed_commit(&self, workspace: &str) -> Result<Option<String>, MemoryError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT last_indexed_commit FROM index_state WHERE workspace = ?")
                .bind(workspace)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|r| r.0))
    }

    /// Overwrite the commit pointer of `workspace`.
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert fails.
    pub async fn set_last_indexed_commit(
        &self,
        workspace: &str,
        commit: &str,
    ) -> Result<(), MemoryError> {
        sqlx::query(
            "INSERT INTO index_state (workspace, last_indexed_commit, last_indexed_at) \
             VALUES (?, ?, ?) \
             ON CONFLICT(workspace) DO UPDATE SET \
             last_indexed_commit = excluded.last_indexed_commit, \
             last_indexed_at = excluded.last_indexed_at",
        )
        .bind(workspace)
        .bind(commit)
        .bind(now_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
