//! Incremental semantic indexing of workspace trees and hybrid retrieval.
//!
//! A build detects what changed since the last recorded commit, chunks the
//! affected files by suffix-driven rules, embeds the chunks in batches and
//! writes them to a vector store scoped by workspace. Per-file failures land
//! in the failure ledger so they can be retried without a full rebuild.

pub mod changes;
pub mod chunker;
pub mod error;
pub mod indexer;
pub mod progress;
pub mod retriever;
pub mod rules;
pub mod store;
#[cfg(test)]
pub(crate) mod test_utils;
pub mod vcs;
pub mod workspace;

pub use error::{IndexError, Result};
pub use indexer::{BuildReport, BuildSettings, IndexBuilder};
pub use progress::{ProgressEvent, ProgressSender};
pub use retriever::{SearchEngine, SearchHit, SearchSettings};
pub use rules::{ChunkLimits, ChunkRules};
pub use store::ChunkStore;
pub use vcs::{GitCli, VcsError, VersionControl};
pub use workspace::{DirectoryWorkspaces, WorkspaceResolver};
