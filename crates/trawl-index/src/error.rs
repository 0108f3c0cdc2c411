//! Error types for trawl-index.

use std::num::TryFromIntError;

use trawl_llm::LlmError;
use trawl_memory::{MemoryError, VectorStoreError};

use crate::vcs::VcsError;

/// Errors raised while detecting changes, chunking, building or searching.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// Missing or disabled settings: embedding endpoint, vector search switch.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Embedding provider or vector store failure.
    #[error("external service error: {0}")]
    ExternalService(String),

    #[error("version control error: {0}")]
    VersionControl(#[from] VcsError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid workspace name: {0}")]
    InvalidWorkspace(String),

    #[error("file exceeds max_file_bytes: {path} ({size} > {limit} bytes)")]
    FileTooLarge { path: String, size: u64, limit: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] MemoryError),

    #[error("invalid boundary pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("integer conversion failed: {0}")]
    IntConversion(#[from] TryFromIntError),

    #[error("{0}")]
    Other(String),
}

impl From<LlmError> for IndexError {
    fn from(err: LlmError) -> Self {
        if err.is_configuration() {
            Self::Configuration(err.to_string())
        } else {
            Self::ExternalService(err.to_string())
        }
    }
}

impl From<VectorStoreError> for IndexError {
    fn from(err: VectorStoreError) -> Self {
        Self::ExternalService(err.to_string())
    }
}

impl IndexError {
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llm_configuration_maps_to_configuration() {
        let err: IndexError = LlmError::Configuration("model").into();
        assert!(err.is_configuration());

        let err: IndexError = LlmError::Other("boom".into()).into();
        assert!(matches!(err, IndexError::ExternalService(_)));
    }

    #[test]
    fn vector_store_errors_are_external() {
        let err: IndexError = VectorStoreError::Upsert("down".into()).into();
        assert!(err.to_string().contains("down"));
        assert!(matches!(err, IndexError::ExternalService(_)));
    }

    #[test]
    fn file_too_large_message() {
        let err = IndexError::FileTooLarge {
            path: "a.md".into(),
            size: 10,
            limit: 5,
        };
        assert_eq!(
            err.to_string(),
            "file exceeds max_file_bytes: a.md (10 > 5 bytes)"
        );
    }
}
