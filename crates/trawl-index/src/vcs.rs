//! Version-control collaborator: head resolution, name/status diffs and
//! tracked-file listing.

use std::path::Path;

use trawl_memory::vector_store::BoxFuture;

#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    #[error("not a repository: {0}")]
    NotARepository(String),

    #[error("git {args} failed: {reason}")]
    CommandFailed { args: String, reason: String },

    #[error("git command not found")]
    NotInstalled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Raw-text access to a workspace's history.
pub trait VersionControl: Send + Sync {
    fn is_repository(&self, root: &Path) -> bool;

    /// Current head revision id.
    fn head<'a>(&'a self, root: &'a Path) -> BoxFuture<'a, Result<String, VcsError>>;

    /// `--name-status` output between two revisions.
    fn diff_name_status<'a>(
        &'a self,
        root: &'a Path,
        from: &'a str,
        to: &'a str,
    ) -> BoxFuture<'a, Result<String, VcsError>>;

    /// One tracked path per line, relative to `root`.
    fn list_tracked<'a>(&'a self, root: &'a Path) -> BoxFuture<'a, Result<String, VcsError>>;
}

/// [`VersionControl`] backed by the `git` binary.
#[derive(Debug, Clone, Default)]
pub struct GitCli;

impl GitCli {
    async fn run(root: &Path, args: &[&str]) -> Result<String, VcsError> {
        let output = tokio::process::Command::new("git")
            .arg("-C")
            .arg(root)
            .args(args)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    VcsError::NotInstalled
                } else {
                    VcsError::Io(e)
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_owned();
            let reason = [stderr, stdout]
                .into_iter()
                .find(|s| !s.is_empty())
                .unwrap_or_else(|| "git command failed".to_owned());
            return Err(VcsError::CommandFailed {
                args: args.join(" "),
                reason,
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl VersionControl for GitCli {
    fn is_repository(&self, root: &Path) -> bool {
        root.join(".git").exists()
    }

    fn head<'a>(&'a self, root: &'a Path) -> BoxFuture<'a, Result<String, VcsError>> {
        Box::pin(async move {
            if !self.is_repository(root) {
                return Err(VcsError::NotARepository(root.display().to_string()));
            }
            let out = Self::run(root, &["rev-parse", "HEAD"]).await?;
            Ok(out.trim().to_owned())
        })
    }

    fn diff_name_status<'a>(
        &'a self,
        root: &'a Path,
        from: &'a str,
        to: &'a str,
    ) -> BoxFuture<'a, Result<String, VcsError>> {
        Box::pin(async move {
            let range = format!("{from}..{to}");
            Self::run(root, &["diff", "--name-status", &range]).await
        })
    }

    fn list_tracked<'a>(&'a self, root: &'a Path) -> BoxFuture<'a, Result<String, VcsError>> {
        Box::pin(async move { Self::run(root, &["ls-files"]).await })
    }
}
