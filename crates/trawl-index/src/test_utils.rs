use std::path::Path;
use std::sync::Mutex;

use trawl_memory::vector_store::BoxFuture;

use crate::vcs::{VcsError, VersionControl};

/// Scripted version control: fixed head, diff and ls-files output.
///
/// A `None` diff makes `diff_name_status` fail like a bad revision range.
pub struct FakeVcs {
    pub repository: bool,
    pub head: Mutex<String>,
    pub diff: Mutex<Option<String>>,
    pub tracked: Mutex<String>,
}

impl FakeVcs {
    pub fn repo(head: &str) -> Self {
        Self {
            repository: true,
            head: Mutex::new(head.to_owned()),
            diff: Mutex::new(None),
            tracked: Mutex::new(String::new()),
        }
    }

    pub fn plain() -> Self {
        Self {
            repository: false,
            ..Self::repo("")
        }
    }

    pub fn with_diff(self, diff: &str) -> Self {
        *self.diff.lock().unwrap() = Some(diff.to_owned());
        self
    }

    pub fn with_tracked(self, tracked: &str) -> Self {
        *self.tracked.lock().unwrap() = tracked.to_owned();
        self
    }

    pub fn set_head(&self, head: &str) {
        *self.head.lock().unwrap() = head.to_owned();
    }
}

impl VersionControl for FakeVcs {
    fn is_repository(&self, _root: &Path) -> bool {
        self.repository
    }

    fn head<'a>(&'a self, _root: &'a Path) -> BoxFuture<'a, Result<String, VcsError>> {
        let head = self.head.lock().unwrap().clone();
        Box::pin(async move { Ok(head) })
    }

    fn diff_name_status<'a>(
        &'a self,
        _root: &'a Path,
        _from: &'a str,
        _to: &'a str,
    ) -> BoxFuture<'a, Result<String, VcsError>> {
        let out = self.diff.lock().unwrap().clone().ok_or(VcsError::CommandFailed {
            args: "diff --name-status".into(),
            reason: "bad revision".into(),
        });
        Box::pin(async move { out })
    }

    fn list_tracked<'a>(&'a self, _root: &'a Path) -> BoxFuture<'a, Result<String, VcsError>> {
        let out = self.tracked.lock().unwrap().clone();
        Box::pin(async move { Ok(out) })
    }
}
