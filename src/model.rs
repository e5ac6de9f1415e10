//! Data model shared across the uploader, pipeline, and review server.
//!
//! Field names and shapes follow the wire/data model in the design doc
//! directly so that `serde_json` round-trips match the review
//! server's JSON protocol without a translation layer.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A single changed path as produced by the git collaborator (`DiffProvider`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffFile {
    pub path: String,
    pub status: DiffStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub old_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub similarity: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiffStatus {
    A,
    M,
    D,
    R,
    C,
    T,
    U,
    X,
}

/// What kind of change an `UploadFile` represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Add,
    Modify,
    Delete,
}

/// Where an `UploadFile`'s bytes come from. Exactly one variant is valid
/// for a non-delete, non-directory entry (see `UploadFile::content_source`).
#[derive(Debug, Clone)]
pub enum ContentSource {
    /// Bytes already materialized in memory (e.g. read from a git blob).
    Bytes(Vec<u8>),
    /// An absolute local path to read from on demand.
    Path(PathBuf),
}

/// The unit of work handed to an uploader driver.
#[derive(Debug, Clone)]
pub struct UploadFile {
    /// Destination-root-relative path, forward-slash separated, no leading slash.
    pub relative_path: String,
    /// Byte count; 0 for directories and deletes.
    pub size: u64,
    pub is_directory: bool,
    pub change_type: ChangeType,
    /// `None` for deletes and directories; `Some` otherwise.
    pub source: Option<ContentSource>,
}

impl UploadFile {
    pub fn directory(relative_path: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            size: 0,
            is_directory: true,
            change_type: ChangeType::Add,
            source: None,
        }
    }

    pub fn delete(relative_path: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            size: 0,
            is_directory: false,
            change_type: ChangeType::Delete,
            source: None,
        }
    }

    /// Invariant check: delete ⇒ no content source; directory ⇒ no content source.
    pub fn is_well_formed(&self) -> bool {
        match self.change_type {
            ChangeType::Delete => self.source.is_none(),
            _ if self.is_directory => self.source.is_none(),
            _ => self.source.is_some(),
        }
    }
}

/// A file's content as read for the review diff viewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileContent {
    pub path: String,
    /// `None` iff the file is binary or absent.
    pub content: Option<String>,
    pub is_binary: bool,
}

/// NUL byte within the first 8192 bytes marks a file as binary.
pub fn is_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(8192).any(|&b| b == 0)
}

/// Content read back from the remote side for comparison.
#[derive(Debug, Clone)]
pub struct RemoteFileContent {
    pub content: Vec<u8>,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Local,
    Sftp,
    Scp,
    Rsync,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Update,
    Mirror,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Auth {
    KeyFile { path: PathBuf },
    Password { password: String },
    None,
}

/// Protocol-specific knobs that don't belong on the shared struct.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProtocolOptions {
    /// Widen SSH algorithm negotiation for pre-OpenSSH-8 servers.
    #[serde(default)]
    pub legacy_mode: bool,
    /// Path to the `rsync` binary on the remote side; a `sudo` substring
    /// triggers privileged mkdir/delete/read prefixing.
    #[serde(default)]
    pub rsync_path: Option<String>,
    /// Extra arguments appended verbatim to the rsync invocation.
    #[serde(default)]
    pub rsync_extra_args: Vec<String>,
}

/// A fully-resolved per-target configuration, as handed down by the
/// (out of scope) `ConfigLoader` collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub user: Option<String>,
    pub protocol: Protocol,
    pub dest: String,
    #[serde(default = "default_auth")]
    pub auth: Auth,
    #[serde(default = "default_sync_mode")]
    pub sync_mode: SyncMode,
    #[serde(default)]
    pub preserve_permissions: bool,
    #[serde(default)]
    pub preserve_timestamps: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_retry")]
    pub retry: usize,
    #[serde(default)]
    pub ignore: Vec<String>,
    #[serde(default)]
    pub protocol_options: ProtocolOptions,
}

fn default_port() -> u16 {
    22
}
fn default_auth() -> Auth {
    Auth::None
}
fn default_sync_mode() -> SyncMode {
    SyncMode::Update
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_retry() -> usize {
    3
}

impl TargetConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// `host:port:dest` — two targets with identical identity are the same destination.
    pub fn identity(&self) -> TargetIdentity {
        TargetIdentity { host: self.host.clone(), port: self.port, dest: self.dest.clone() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TargetIdentity {
    pub host: String,
    pub port: u16,
    pub dest: String,
}

impl std::fmt::Display for TargetIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.host, self.port, self.dest)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    Pending,
    Connecting,
    Uploading,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOutcome {
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileResult {
    pub relative_path: String,
    pub outcome: FileOutcome,
    pub size: u64,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

/// Per-target lifecycle and file-level record, keyed by `TargetIdentity`
/// in the progress aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetResult {
    pub host: String,
    pub dest: String,
    pub status: TargetStatus,
    pub files: Vec<FileResult>,
    pub success_count: u64,
    pub failed_count: u64,
    pub skipped_count: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

impl TargetResult {
    pub fn pending(host: impl Into<String>, dest: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            dest: dest.into(),
            status: TargetStatus::Pending,
            files: Vec::new(),
            success_count: 0,
            failed_count: 0,
            skipped_count: 0,
            error: None,
            duration: Duration::ZERO,
        }
    }

    pub fn record_file(&mut self, result: FileResult) {
        match result.outcome {
            FileOutcome::Completed => self.success_count += 1,
            FileOutcome::Failed => self.failed_count += 1,
            FileOutcome::Skipped => self.skipped_count += 1,
        }
        self.files.push(result);
    }
}

/// Aggregate over all targets for one upload invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadResult {
    pub success_targets: u64,
    pub failed_targets: u64,
    pub targets: Vec<TargetResult>,
    pub total_files: u64,
    pub total_size: u64,
    #[serde(with = "duration_millis")]
    pub total_duration: Duration,
}

impl UploadResult {
    /// Builds the aggregate from a completed set of per-target results.
    /// `total_files`/`total_size` count only files whose outcome is
    /// `Completed`.
    pub fn from_targets(targets: Vec<TargetResult>, total_duration: Duration) -> Self {
        let success_targets =
            targets.iter().filter(|t| t.status == TargetStatus::Completed).count() as u64;
        let failed_targets =
            targets.iter().filter(|t| t.status == TargetStatus::Failed).count() as u64;
        let total_files = targets
            .iter()
            .flat_map(|t| &t.files)
            .filter(|f| f.outcome == FileOutcome::Completed)
            .count() as u64;
        let total_size = targets
            .iter()
            .flat_map(|t| &t.files)
            .filter(|f| f.outcome == FileOutcome::Completed)
            .map(|f| f.size)
            .sum();
        Self { success_targets, failed_targets, targets, total_files, total_size, total_duration }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Connecting,
    Uploading,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub target_index: usize,
    pub total_targets: usize,
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub dest: Option<String>,
    pub file_index: usize,
    pub total_files: usize,
    pub current_file: String,
    pub bytes_transferred: u64,
    pub file_size: u64,
    pub status: ProgressStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeNodeType {
    Directory,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeNodeStatus {
    A,
    M,
    D,
    U,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeNode {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub node_type: TreeNodeType,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub status: Option<TreeNodeStatus>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub children: Option<Vec<TreeNode>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub loaded: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub file_count: Option<usize>,
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u128(d.as_millis())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_file_invariants() {
        assert!(UploadFile::directory("assets").is_well_formed());
        assert!(UploadFile::delete("old.txt").is_well_formed());
        let add = UploadFile {
            relative_path: "a.txt".into(),
            size: 3,
            is_directory: false,
            change_type: ChangeType::Add,
            source: Some(ContentSource::Bytes(vec![1, 2, 3])),
        };
        assert!(add.is_well_formed());

        let malformed = UploadFile {
            relative_path: "b.txt".into(),
            size: 3,
            is_directory: false,
            change_type: ChangeType::Add,
            source: None,
        };
        assert!(!malformed.is_well_formed());
    }

    #[test]
    fn binary_detection_looks_at_first_8192_bytes() {
        assert!(!is_binary(b"hello world"));
        let mut with_nul = vec![b'a'; 100];
        with_nul[50] = 0;
        assert!(is_binary(&with_nul));
        let mut late_nul = vec![b'a'; 9000];
        late_nul[8500] = 0;
        assert!(!is_binary(&late_nul));
    }

    #[test]
    fn upload_result_counts_only_completed_files() {
        let mut t = TargetResult::pending("h1", "/dest");
        t.status = TargetStatus::Completed;
        t.record_file(FileResult {
            relative_path: "a".into(),
            outcome: FileOutcome::Completed,
            size: 10,
            duration: Duration::from_millis(5),
            error: None,
        });
        t.record_file(FileResult {
            relative_path: "b".into(),
            outcome: FileOutcome::Failed,
            size: 20,
            duration: Duration::from_millis(5),
            error: Some("boom".into()),
        });
        let result = UploadResult::from_targets(vec![t], Duration::from_secs(1));
        assert_eq!(result.total_files, 1);
        assert_eq!(result.total_size, 10);
        assert_eq!(result.success_targets, 1);
        assert_eq!(result.failed_targets, 0);
    }
}
