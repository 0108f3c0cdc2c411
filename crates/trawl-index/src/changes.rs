//! Decides which files a build must (re)index and which it must purge.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use trawl_memory::IndexMode;

use crate::error::{IndexError, Result};
use crate::rules::ChunkRules;
use crate::vcs::VersionControl;

/// Files to index and files to purge, both sorted and suffix-filtered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub changed: Vec<String>,
    pub deleted: Vec<String>,
    /// Set when the result came from a full enumeration; the workspace's
    /// existing vectors must be purged before indexing.
    pub full_rebuild: bool,
}

impl ChangeSet {
    #[must_use]
    pub fn total_files(&self) -> usize {
        self.changed.len() + self.deleted.len()
    }
}

/// Read-only change detection over one workspace.
pub struct ChangeDetector {
    vcs: Arc<dyn VersionControl>,
    rules: Arc<ChunkRules>,
}

impl ChangeDetector {
    #[must_use]
    pub fn new(vcs: Arc<dyn VersionControl>, rules: Arc<ChunkRules>) -> Self {
        Self { vcs, rules }
    }

    /// # Errors
    ///
    /// Returns an error if full enumeration fails, or when asked to detect
    /// changes for a retry build (those carry explicit paths).
    pub async fn detect(
        &self,
        root: &Path,
        mode: IndexMode,
        last_commit: Option<&str>,
        head: &str,
    ) -> Result<ChangeSet> {
        match mode {
            IndexMode::Full => self.full(root).await,
            IndexMode::RetryFailed => Err(IndexError::Other(
                "retry builds do not run change detection".into(),
            )),
            IndexMode::Incremental => {
                let Some(last) = last_commit.filter(|c| !c.is_empty()) else {
                    tracing::info!(root = %root.display(), "no recorded commit, full rebuild");
                    return self.full(root).await;
                };
                if !self.vcs.is_repository(root) {
                    return self.full(root).await;
                }
                if last == head {
                    return Ok(ChangeSet::default());
                }
                match self.vcs.diff_name_status(root, last, head).await {
                    Ok(output) => {
                        let (changed, deleted) = parse_name_status(&output, &self.rules);
                        Ok(ChangeSet {
                            changed,
                            deleted,
                            full_rebuild: false,
                        })
                    }
                    Err(e) => {
                        tracing::warn!(
                            root = %root.display(),
                            last,
                            head,
                            "diff failed, falling back to full rebuild: {e}"
                        );
                        self.full(root).await
                    }
                }
            }
        }
    }

    async fn full(&self, root: &Path) -> Result<ChangeSet> {
        let changed = if self.vcs.is_repository(root) {
            let output = self.vcs.list_tracked(root).await?;
            let paths: BTreeSet<String> = output
                .lines()
                .map(str::trim)
                .filter(|p| !p.is_empty() && self.rules.is_indexable(p))
                .map(str::to_owned)
                .collect();
            paths.into_iter().collect()
        } else {
            walk_files(root.to_path_buf(), Arc::clone(&self.rules)).await?
        };
        Ok(ChangeSet {
            changed,
            deleted: Vec::new(),
            full_rebuild: true,
        })
    }
}

/// Partition `git diff --name-status` output into (changed, deleted).
///
/// `D*` statuses are deletions; anything else indexes the last tab-separated
/// field, which for renames and copies is the new path. A rename also deletes
/// its source path.
#[must_use]
pub fn parse_name_status(output: &str, rules: &ChunkRules) -> (Vec<String>, Vec<String>) {
    let mut changed = BTreeSet::new();
    let mut deleted = BTreeSet::new();
    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 2 {
            continue;
        }
        let status = parts[0].trim().to_ascii_uppercase();
        if status.starts_with('R') && parts.len() >= 3 {
            let source = parts[1].trim();
            if !source.is_empty() && rules.is_indexable(source) {
                deleted.insert(source.to_owned());
            }
        }
        let path = parts[parts.len() - 1].trim();
        if path.is_empty() || !rules.is_indexable(path) {
            continue;
        }
        if status.starts_with('D') {
            deleted.insert(path.to_owned());
        } else {
            changed.insert(path.to_owned());
        }
    }
    (changed.into_iter().collect(), deleted.into_iter().collect())
}

/// Every indexable file under `root`, skipping `.git/`, as sorted `/`-separated
/// relative paths.
async fn walk_files(root: PathBuf, rules: Arc<ChunkRules>) -> Result<Vec<String>> {
    tokio::task::spawn_blocking(move || {
        let mut paths: Vec<String> = ignore::WalkBuilder::new(&root)
            .hidden(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .ignore(false)
            .parents(false)
            .filter_entry(|e| e.file_name() != ".git")
            .build()
            .flatten()
            .filter(|e| e.file_type().is_some_and(|ft| ft.is_file()))
            .filter_map(|e| {
                e.path()
                    .strip_prefix(&root)
                    .ok()
                    .map(|p| p.to_string_lossy().replace('\\', "/"))
            })
            .filter(|p| rules.is_indexable(p))
            .collect();
        paths.sort();
        paths
    })
    .await
    .map_err(|e| IndexError::Other(format!("directory walk panicked: {e}")))
}
