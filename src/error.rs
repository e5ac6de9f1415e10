//! Repository-wide structured errors for the transport/pipeline layer.
//!
//! Uses small `Display`-implementing enums
//! instead of stringly-typed `anyhow::Error` at API boundaries, so callers
//! can match on error *kind* to drive retry and strict/lenient policy.

use std::fmt;
use std::path::PathBuf;

/// The five error kinds named in the transfer pipeline's error design,
/// plus an `Io` catch-all for uncategorized transport failures.
#[derive(Debug, Clone)]
pub enum UploadError {
    /// Credentials rejected. Never retried; fatal for the target.
    Auth(String),
    /// Unreachable host, handshake failure, missing helper binary,
    /// unsupported protocol. Retried during `connect`.
    Connection(String),
    /// Connect or per-operation timeout. Subject to retry during connect.
    Timeout(String),
    /// Remote mkdir/delete/upload rejected by server permissions.
    Permission(String),
    /// I/O failure mid-transfer, unreadable source, protocol-level write error.
    Transfer(String),
    /// Uncategorized I/O error, e.g. a local read failure before any
    /// network operation was attempted.
    Io(String),
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadError::Auth(m) => write!(f, "authentication failed: {m}"),
            UploadError::Connection(m) => write!(f, "connection failed: {m}"),
            UploadError::Timeout(m) => write!(f, "operation timed out: {m}"),
            UploadError::Permission(m) => write!(f, "permission denied: {m}"),
            UploadError::Transfer(m) => write!(f, "transfer failed: {m}"),
            UploadError::Io(m) => write!(f, "I/O error: {m}"),
        }
    }
}

impl std::error::Error for UploadError {}

impl UploadError {
    /// Whether this error should be retried when it occurs before any data
    /// has moved (connect, handshake, auth). Conservative: only clearly
    /// transient network conditions are retriable; bad credentials are not.
    pub fn is_retriable_pre_transfer(&self) -> bool {
        matches!(self, UploadError::Connection(_) | UploadError::Timeout(_))
    }

    /// Whether this error should be retried when it occurs mid-transfer
    /// (a single file's read/write/rename). Permission and auth failures
    /// are not retried — retrying won't change the server's answer.
    pub fn is_retriable_during_transfer(&self) -> bool {
        matches!(self, UploadError::Transfer(_) | UploadError::Io(_) | UploadError::Timeout(_))
    }
}

/// Errors raised while creating a remote directory tree (mkdir -p semantics).
#[derive(Debug, Clone)]
pub enum MkdirError {
    /// Target path exists and is a file where a directory was expected.
    ExistsAsFile(PathBuf),
    /// Transport-level error surfaced while probing or creating a path.
    Transport(PathBuf, String),
}

impl fmt::Display for MkdirError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MkdirError::ExistsAsFile(p) => {
                write!(f, "remote path exists as a file (expected directory): {}", display_path(p))
            }
            MkdirError::Transport(p, msg) => {
                write!(f, "failed to create remote directory {}: {msg}", display_path(p))
            }
        }
    }
}

impl std::error::Error for MkdirError {}

impl From<MkdirError> for UploadError {
    fn from(e: MkdirError) -> Self {
        match e {
            MkdirError::ExistsAsFile(p) => {
                UploadError::Transfer(format!("exists as file: {}", display_path(&p)))
            }
            MkdirError::Transport(_, msg) => UploadError::Transfer(msg),
        }
    }
}

fn display_path(p: &std::path::Path) -> String {
    let s = p.to_string_lossy().to_string();
    if s.contains('\\') { s.replace('\\', "/") } else { s }
}

/// Errors raised while planning a mirror-mode sync.
#[derive(Debug, Clone)]
pub enum MirrorError {
    /// The driver handed to the planner does not support `list_remote_files`.
    ListingUnsupported(String),
    /// The driver failed the remote listing operation.
    ListingFailed(String),
}

impl fmt::Display for MirrorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MirrorError::ListingUnsupported(host) => {
                write!(f, "target {host} does not support listing remote files; mirror mode unavailable")
            }
            MirrorError::ListingFailed(msg) => write!(f, "failed to list remote files: {msg}"),
        }
    }
}

impl std::error::Error for MirrorError {}

/// Errors raised by the review server.
#[derive(Debug, Clone)]
pub enum ReviewError {
    Bind(String),
    Protocol(String),
    Upstream(String),
}

impl fmt::Display for ReviewError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReviewError::Bind(m) => write!(f, "failed to bind review server: {m}"),
            ReviewError::Protocol(m) => write!(f, "review protocol error: {m}"),
            ReviewError::Upstream(m) => write!(f, "remote comparison failed: {m}"),
        }
    }
}

impl std::error::Error for ReviewError {}
