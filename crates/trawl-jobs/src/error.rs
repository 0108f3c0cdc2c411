use trawl_index::IndexError;
use trawl_memory::{JobStatus, MemoryError};

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("index job not found: {0}")]
    NotFound(String),

    #[error("no permission to access index job {0}")]
    Forbidden(String),

    #[error("invalid index mode {0:?}: expected full or incremental")]
    InvalidMode(String),

    #[error("only failed jobs can be retried: job {job_id} is {status}")]
    NotFailed { job_id: String, status: JobStatus },

    #[error("no failure records found for job {0}")]
    NoFailures(String),

    #[error("retry paths are required")]
    RetryPathsRequired,

    #[error("paths are not in the failure records of job {job_id}: {}", invalid.join(", "))]
    InvalidRetryPaths { job_id: String, invalid: Vec<String> },

    #[error("storage error: {0}")]
    Storage(#[from] MemoryError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),
}

impl JobError {
    /// Whether the caller can fix the request (as opposed to a server fault).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Storage(_) | Self::Index(_))
    }
}

pub type Result<T> = std::result::Result<T, JobError>;
