//! External collaborator interfaces: the git diff provider,
//! verbose logger, and config loader are explicitly out of scope for
//! the core — only the interfaces they must satisfy are specified
//! here. `FsDiffProvider` is a minimal filesystem-based stand-in for
//! local testing/demo use; it does not implement real git plumbing.

use std::path::{Path, PathBuf};

use crate::model::{DiffFile, DiffStatus};

/// Aggregate counts alongside a `DiffProvider::collect` result.
#[derive(Debug, Clone, Default)]
pub struct DiffSummary {
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
    pub renamed: usize,
}

#[derive(Debug, Clone)]
pub struct DiffCollection {
    pub files: Vec<DiffFile>,
    pub summary: DiffSummary,
    pub base: String,
    pub target: String,
}

/// Yields the set of changed paths between two git revisions, plus
/// blob/working-tree content for the review viewer.
pub trait DiffProvider {
    fn collect(&self, base: &str, target: &str) -> Result<DiffCollection, String>;
    fn read_blob(&self, revision: &str, path: &str) -> Result<Option<Vec<u8>>, String>;
    fn read_local(&self, path: &str) -> Result<Option<Vec<u8>>, String>;
}

/// Opt-in debug stream, independent of the `tracing` file log —
/// this is the collaborator-facing verbose channel the review UI and
/// CLI summary may also write to.
pub trait Logger {
    fn verbose(&self, message: &str);
}

/// Yields fully-resolved `TargetConfig`s before the core runs. The
/// concrete JSON-file loader lives in `config.rs`; this trait exists so
/// callers may substitute another source (environment, remote config
/// service) without touching the core.
pub trait ConfigLoader {
    fn load(&self) -> Result<Vec<crate::model::TargetConfig>, String>;
}

/// A minimal, non-git stand-in `DiffProvider`: treats `base`/`target` as
/// two directories on disk and diffs their file sets by presence and
/// byte content. Exists only so `dockhand review` is runnable end to
/// end without a real git integration; production use is expected to
/// supply a real `DiffProvider`.
pub struct FsDiffProvider {
    pub base_dir: PathBuf,
    pub target_dir: PathBuf,
}

impl FsDiffProvider {
    pub fn new(base_dir: PathBuf, target_dir: PathBuf) -> Self {
        Self { base_dir, target_dir }
    }

    fn walk_relative(root: &Path) -> Vec<String> {
        if !root.exists() {
            return Vec::new();
        }
        walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.path().strip_prefix(root).ok().map(|p| p.to_string_lossy().replace('\\', "/")))
            .collect()
    }
}

impl DiffProvider for FsDiffProvider {
    fn collect(&self, base: &str, target: &str) -> Result<DiffCollection, String> {
        let base_files = Self::walk_relative(&self.base_dir);
        let target_files = Self::walk_relative(&self.target_dir);
        let base_set: std::collections::HashSet<&str> = base_files.iter().map(String::as_str).collect();
        let target_set: std::collections::HashSet<&str> = target_files.iter().map(String::as_str).collect();

        let mut files = Vec::new();
        let mut summary = DiffSummary::default();
        for path in &target_files {
            if !base_set.contains(path.as_str()) {
                files.push(DiffFile { path: path.clone(), status: DiffStatus::A, old_path: None, similarity: None });
                summary.added += 1;
            } else {
                let base_bytes = std::fs::read(self.base_dir.join(path)).unwrap_or_default();
                let target_bytes = std::fs::read(self.target_dir.join(path)).unwrap_or_default();
                if base_bytes != target_bytes {
                    files.push(DiffFile {
                        path: path.clone(),
                        status: DiffStatus::M,
                        old_path: None,
                        similarity: None,
                    });
                    summary.modified += 1;
                }
            }
        }
        for path in &base_files {
            if !target_set.contains(path.as_str()) {
                files.push(DiffFile { path: path.clone(), status: DiffStatus::D, old_path: None, similarity: None });
                summary.deleted += 1;
            }
        }
        Ok(DiffCollection { files, summary, base: base.to_string(), target: target.to_string() })
    }

    fn read_blob(&self, _revision: &str, path: &str) -> Result<Option<Vec<u8>>, String> {
        match std::fs::read(self.base_dir.join(path)) {
            Ok(b) => Ok(Some(b)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.to_string()),
        }
    }

    fn read_local(&self, path: &str) -> Result<Option<Vec<u8>>, String> {
        match std::fs::read(self.target_dir.join(path)) {
            Ok(b) => Ok(Some(b)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// A `Logger` that writes through `tracing::debug!`, so the opt-in
/// verbose stream lands in the same file-only log as everything else
/// rather than stdout.
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn verbose(&self, message: &str) {
        tracing::debug!("{message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fs_diff_provider_detects_add_modify_delete() {
        let base = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        std::fs::write(base.path().join("unchanged.txt"), b"same").unwrap();
        std::fs::write(target.path().join("unchanged.txt"), b"same").unwrap();
        std::fs::write(base.path().join("changed.txt"), b"before").unwrap();
        std::fs::write(target.path().join("changed.txt"), b"after").unwrap();
        std::fs::write(base.path().join("removed.txt"), b"gone").unwrap();
        std::fs::write(target.path().join("added.txt"), b"new").unwrap();

        let provider = FsDiffProvider::new(base.path().to_path_buf(), target.path().to_path_buf());
        let collection = provider.collect("base", "target").unwrap();
        assert_eq!(collection.summary.added, 1);
        assert_eq!(collection.summary.modified, 1);
        assert_eq!(collection.summary.deleted, 1);
    }
}
