use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// How an index build selects the files it touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexMode {
    Full,
    Incremental,
    RetryFailed,
}

impl IndexMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
            Self::RetryFailed => "retry_failed",
        }
    }
}

impl fmt::Display for IndexMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a mode or status string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown value: {0}")]
pub struct ParseEnumError(pub String);

impl FromStr for IndexMode {
    type Err = ParseEnumError;

    /// Case-insensitive, surrounding whitespace ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "incremental" => Ok(Self::Incremental),
            "retry_failed" => Ok(Self::RetryFailed),
            _ => Err(ParseEnumError(s.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Done,
    Failed,
}

impl JobStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "running" => Ok(Self::Running),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            _ => Err(ParseEnumError(s.to_owned())),
        }
    }
}

/// Progress counters persisted on every job row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounters {
    pub total_files: u64,
    pub total_chunks: u64,
    pub processed_chunks: u64,
    pub failed_chunks: u64,
    pub percent: u8,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexJob {
    pub job_id: String,
    pub user_id: String,
    pub workspace: String,
    pub mode: IndexMode,
    pub status: JobStatus,
    #[serde(flatten)]
    pub counters: JobCounters,
    pub error_message: Option<String>,
    /// Job whose failures this job retries.
    pub source_job_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// One failed path of one job attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub id: i64,
    pub job_id: String,
    pub workspace: String,
    pub path: String,
    pub reason: String,
    pub retry_count: u32,
    pub created_at: String,
}

/// Optional predicates for listing jobs. `None` matches everything.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub user_id: Option<String>,
    pub workspace: Option<String>,
    pub status: Option<JobStatus>,
}

/// Current time as RFC 3339 with microseconds, the format every row uses.
#[must_use]
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}
