use std::path::{Path, PathBuf};

use crate::error::{IndexError, Result};

/// Maps a workspace name to the directory holding its tree.
pub trait WorkspaceResolver: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the name is invalid or the workspace does not exist.
    fn resolve(&self, workspace: &str) -> Result<PathBuf>;
}

/// Workspaces are the immediate subdirectories of one base directory.
#[derive(Debug, Clone)]
pub struct DirectoryWorkspaces {
    base: PathBuf,
}

impl DirectoryWorkspaces {
    #[must_use]
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }
}

impl WorkspaceResolver for DirectoryWorkspaces {
    fn resolve(&self, workspace: &str) -> Result<PathBuf> {
        let name = workspace.trim();
        if name.is_empty()
            || name == "."
            || name.contains("..")
            || name.contains('/')
            || name.contains('\\')
        {
            return Err(IndexError::InvalidWorkspace(workspace.to_owned()));
        }
        let root = self.base.join(name);
        if !root.is_dir() {
            return Err(IndexError::NotFound(format!("workspace {name}")));
        }
        Ok(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_existing_subdirectory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("docs")).unwrap();
        let resolver = DirectoryWorkspaces::new(dir.path());
        assert_eq!(resolver.resolve(" docs ").unwrap(), dir.path().join("docs"));
    }

    #[test]
    fn rejects_traversal_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = DirectoryWorkspaces::new(dir.path());
        for bad in ["", ".", "..", "a/b", "a\\b", "../etc"] {
            assert!(
                matches!(resolver.resolve(bad), Err(IndexError::InvalidWorkspace(_))),
                "{bad} accepted"
            );
        }
        assert!(matches!(
            resolver.resolve("missing"),
            Err(IndexError::NotFound(_))
        ));
    }
}
