//! Transport driver contract and its optional capabilities.
//!
//! The source this is drawn from uses duck typing: a driver "has" an
//! operation if the function exists on it. Rust has no structural
//! typing, so per the design note we model the required contract as one
//! trait (`Uploader`) and each optional operation as its own trait
//! (`BulkUpload`, `DiffCapable`, `ListRemoteFiles`); a driver implements
//! only the ones it supports and exposes them through the
//! `as_bulk_upload`/`as_diff_capable`/`as_lister` interface-assertion
//! methods, which default to `None`. This is the same shape as a
//! `SftpLike` trait object, generalized from one trait to
//! three.

pub mod local;
pub mod rsync;
pub mod scp;
pub mod sftp;
pub mod ssh_opts;

use std::time::Duration;

use crate::error::UploadError;
use crate::model::{RemoteFileContent, UploadFile};

pub type Progress<'a> = dyn FnMut(u64, u64) + 'a;

/// Result of a `bulkUpload` call.
#[derive(Debug, Clone, Copy, Default)]
pub struct BulkUploadResult {
    pub success_count: usize,
    pub failed_count: usize,
    pub total_size: u64,
    pub duration: Duration,
}

/// Itemized-changes entry, used by rsync's `getDiff`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEntry {
    pub path: String,
    pub status: DiffEntryStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffEntryStatus {
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, Default)]
pub struct DiffOptions {
    pub checksum: bool,
    pub ignore_patterns: Vec<String>,
    pub remote_dir: Option<String>,
    /// When `Some`, only these destination-relative paths are compared.
    pub files: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct DiffResult {
    pub entries: Vec<DiffEntry>,
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
}

/// The contract every transport driver implements.
pub trait Uploader: Send {
    /// Establishes the session; retry/backoff is the caller's
    /// responsibility (see `pipeline::connect_with_retry`), so drivers
    /// implement a single connection attempt here.
    fn connect(&mut self) -> Result<(), UploadError>;

    /// Idempotent, never raises. Cleans up any temp directory, closes
    /// the session.
    fn disconnect(&mut self);

    /// Creates `dest/rel_path` and all missing parents. "Already
    /// exists" is success. Idempotent; implementations cache
    /// already-created paths.
    fn mkdir(&mut self, rel_path: &str) -> Result<(), UploadError>;

    /// Writes `file` to `dest/rel_path`, creating parent directories
    /// first. `on_progress` is called with `(transferred, total)` at
    /// least at start and end.
    fn upload(
        &mut self,
        file: &UploadFile,
        rel_path: &str,
        on_progress: &mut Progress<'_>,
    ) -> Result<(), UploadError>;

    /// Removes file or directory recursively. Not-found is success.
    fn delete(&mut self, rel_path: &str) -> Result<(), UploadError>;

    /// Returns `None` for missing entries and for directories. Fails
    /// only on genuine transport errors.
    fn read_file(&mut self, rel_path: &str) -> Result<Option<RemoteFileContent>, UploadError>;

    /// Interface-assertion helper for the optional bulk-upload capability.
    fn as_bulk_upload(&mut self) -> Option<&mut dyn BulkUpload> {
        None
    }

    /// Interface-assertion helper for the optional server-side diff capability.
    fn as_diff_capable(&mut self) -> Option<&mut dyn DiffCapable> {
        None
    }

    /// Interface-assertion helper for the optional remote-listing capability.
    fn as_lister(&mut self) -> Option<&mut dyn ListRemoteFiles> {
        None
    }
}

/// Optional: transfer many files in one underlying operation.
pub trait BulkUpload {
    fn bulk_upload(
        &mut self,
        files: &[(UploadFile, String)],
        on_progress: &mut Progress<'_>,
    ) -> Result<BulkUploadResult, UploadError>;
}

/// Optional: server-side comparison of a local tree with the remote destination.
pub trait DiffCapable {
    fn get_diff(&mut self, local_dir: &std::path::Path, options: &DiffOptions) -> Result<DiffResult, UploadError>;
}

/// Optional: list destination-root-relative remote paths. Required for mirror mode.
pub trait ListRemoteFiles {
    fn list_remote_files(&mut self) -> Result<Vec<String>, UploadError>;
}
