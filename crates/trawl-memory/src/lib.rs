//! Persistence for trawl: pluggable vector stores plus the `SQLite` records
//! behind index jobs, commit pointers and the failure ledger.

pub mod error;
pub mod in_memory_store;
pub mod qdrant_ops;
pub mod sqlite;
pub mod types;
pub mod vector_store;

pub use error::MemoryError;
pub use in_memory_store::InMemoryVectorStore;
pub use qdrant_ops::QdrantOps;
pub use sqlite::{MAX_ERROR_CHARS, MAX_REASON_CHARS, SqliteStore};
pub use types::{
    FailureRecord, IndexJob, IndexMode, JobCounters, JobFilter, JobStatus, ParseEnumError,
    now_rfc3339,
};
pub use vector_store::{
    FieldCondition, FieldValue, ScoredVectorPoint, VectorFilter, VectorPoint, VectorStore,
    VectorStoreError,
};
