//! Index job coordination.
//!
//! Jobs are persisted rows that move from `running` to `done` or `failed`
//! exactly once. Each accepted job runs on its own task while holding its
//! workspace lock, so two builds never touch one workspace's index at the
//! same time.

pub mod coordinator;
pub mod error;
pub mod locks;

pub use coordinator::{BUSY_MESSAGE, JobCoordinator, Page, Requester};
pub use error::{JobError, Result};
pub use locks::WorkspaceLocks;
