//! Per-workspace build locks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;

/// Arena of one async mutex per workspace, created on first use and kept for
/// the life of the process.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceLocks {
    inner: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl WorkspaceLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, workspace: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(map.entry(workspace.to_owned()).or_default())
    }

    /// Take the workspace lock without waiting. `None` means a build holds it.
    /// The lock is released when the guard drops.
    #[must_use]
    pub fn try_acquire(&self, workspace: &str) -> Option<OwnedMutexGuard<()>> {
        self.lock_for(workspace).try_lock_owned().ok()
    }

    #[must_use]
    pub fn is_busy(&self, workspace: &str) -> bool {
        self.lock_for(workspace).try_lock().is_err()
    }
}
