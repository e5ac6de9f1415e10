//! Remote-diff proxy and the review session state that owns it.
//!
//! The session references the uploader driver (to fetch remote content
//! for comparison) and the driver needs to report first-connect errors
//! back to the session so later calls short-circuit — a cyclic
//! reference. Per the design note, the cycle is broken with
//! a `SessionHandle` indirection: the driver only borrows a narrow
//! `recordError` callback, not the whole session.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::UploadError;
use crate::model::{ContentSource, RemoteFileContent, TargetConfig, UploadFile};
use crate::uploader::{DiffCapable, DiffOptions, DiffResult, Uploader};

/// The narrow interface the proxy exposes to whatever constructs it,
/// so the session that owns the proxy never needs a direct reference
/// back into itself.
pub trait SessionHandle: Send + Sync {
    fn record_error(&self, message: String);

    /// The first recorded error, if any, so callers can short-circuit
    /// instead of re-dialing a driver that already failed once.
    fn error(&self) -> Option<String>;
}

/// A `SessionHandle` that simply stores the first error observed.
#[derive(Default)]
pub struct FirstErrorHandle {
    error: Mutex<Option<String>>,
}

impl FirstErrorHandle {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionHandle for FirstErrorHandle {
    fn record_error(&self, message: String) {
        let mut slot = self.error.lock().expect("session handle mutex poisoned");
        if slot.is_none() {
            *slot = Some(message);
        }
    }

    fn error(&self) -> Option<String> {
        self.error.lock().expect("session handle mutex poisoned").clone()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RemoteStatus {
    pub exists: bool,
    pub has_changes: bool,
}

/// A thin facade around the first configured target's driver, memoized
/// for the review session. Per the design note's open question,
/// the *first* configured target is always the comparison source even
/// when multiple targets exist.
pub struct RemoteDiffProxy<'a> {
    driver: Box<dyn Uploader + 'a>,
    handle: std::sync::Arc<dyn SessionHandle>,
    connected: bool,
    local_files: HashMap<String, UploadFile>,
    source_dir: PathBuf,
    bulk_diff_cache: Option<Option<DiffResult>>,
}

impl<'a> RemoteDiffProxy<'a> {
    pub fn new(
        driver: Box<dyn Uploader + 'a>,
        local_files: Vec<UploadFile>,
        handle: std::sync::Arc<dyn SessionHandle>,
        source_dir: PathBuf,
    ) -> Self {
        let local_files =
            local_files.into_iter().map(|f| (f.relative_path.clone(), f)).collect();
        Self { driver, handle, connected: false, local_files, source_dir, bulk_diff_cache: None }
    }

    pub fn first_target_driver(
        target: &TargetConfig,
        factory: impl FnOnce(&TargetConfig) -> Box<dyn Uploader + 'a>,
        local_files: Vec<UploadFile>,
        handle: std::sync::Arc<dyn SessionHandle>,
        source_dir: PathBuf,
    ) -> Self {
        Self::new(factory(target), local_files, handle, source_dir)
    }

    /// Tries the driver's bulk-diff fast path (rsync dry-run) to derive
    /// the full changed set in one round-trip, caching the outcome for
    /// the life of the session. Returns `None` when the driver doesn't
    /// support it or the dry-run fails, so callers fall back to
    /// per-file probing via `get_local_and_remote_contents`.
    pub fn try_bulk_diff(&mut self) -> Option<DiffResult> {
        if let Some(cached) = &self.bulk_diff_cache {
            return cached.clone();
        }
        let result = self.compute_bulk_diff();
        self.bulk_diff_cache = Some(result.clone());
        result
    }

    fn compute_bulk_diff(&mut self) -> Option<DiffResult> {
        self.driver.as_diff_capable()?;
        self.ensure_connected().ok()?;
        let local_dir = self.source_dir.clone();
        self.driver.as_diff_capable()?.get_diff(&local_dir, &DiffOptions::default()).ok()
    }

    /// Reads from the upload set (`content` or `sourcePath`); an empty
    /// buffer for unknown paths.
    pub fn get_local_file_content(&self, path: &str) -> Vec<u8> {
        match self.local_files.get(path).and_then(|f| f.source.as_ref()) {
            Some(ContentSource::Bytes(bytes)) => bytes.clone(),
            Some(ContentSource::Path(p)) => std::fs::read(p).unwrap_or_default(),
            None => Vec::new(),
        }
    }

    fn ensure_connected(&mut self) -> Result<(), UploadError> {
        if self.connected {
            return Ok(());
        }
        if let Some(message) = self.handle.error() {
            return Err(UploadError::Connection(message));
        }
        match self.driver.connect() {
            Ok(()) => {
                self.connected = true;
                Ok(())
            }
            Err(e) => {
                self.handle.record_error(e.to_string());
                Err(e)
            }
        }
    }

    /// Lazy-connects the driver, recording first-connect errors via the
    /// session handle so subsequent calls short-circuit on the same
    /// failure without re-dialing.
    pub fn get_remote_file_content(
        &mut self,
        path: &str,
    ) -> Result<Option<RemoteFileContent>, UploadError> {
        self.ensure_connected()?;
        self.driver.read_file(path)
    }

    /// `{local, remote, remoteStatus}` where `hasChanges` holds iff the
    /// remote is absent, its bytes differ, or its binary-ness differs.
    pub fn get_local_and_remote_contents(
        &mut self,
        path: &str,
    ) -> Result<(Vec<u8>, Option<RemoteFileContent>, RemoteStatus), UploadError> {
        let local = self.get_local_file_content(path);
        let remote = self.get_remote_file_content(path)?;
        let status = match &remote {
            None => RemoteStatus { exists: false, has_changes: true },
            Some(content) => {
                let local_binary = crate::model::is_binary(&local);
                let remote_binary = crate::model::is_binary(&content.content);
                let has_changes = local_binary != remote_binary || local != content.content;
                RemoteStatus { exists: true, has_changes }
            }
        };
        Ok((local, remote, status))
    }

    /// Disconnects the read-only proxy before the real upload fan-out
    /// starts, freeing the socket (confirm path, shared resources).
    pub fn disconnect(&mut self) {
        if self.connected {
            self.driver.disconnect();
            self.connected = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChangeType;
    use crate::uploader::local::LocalUploader;

    #[test]
    fn local_content_read_from_bytes_source() {
        let handle = std::sync::Arc::new(FirstErrorHandle::new());
        let dir = tempfile::tempdir().unwrap();
        let driver: Box<dyn Uploader> = Box::new(LocalUploader::new(dir.path().to_path_buf(), false));
        let files = vec![UploadFile {
            relative_path: "a.txt".into(),
            size: 5,
            is_directory: false,
            change_type: ChangeType::Modify,
            source: Some(ContentSource::Bytes(b"hello".to_vec())),
        }];
        let proxy = RemoteDiffProxy::new(driver, files, handle, dir.path().to_path_buf());
        assert_eq!(proxy.get_local_file_content("a.txt"), b"hello");
        assert_eq!(proxy.get_local_file_content("missing.txt"), Vec::<u8>::new());
    }

    #[test]
    fn remote_status_reports_missing_as_changed() {
        let handle = std::sync::Arc::new(FirstErrorHandle::new());
        let dir = tempfile::tempdir().unwrap();
        let driver: Box<dyn Uploader> = Box::new(LocalUploader::new(dir.path().to_path_buf(), false));
        let mut proxy = RemoteDiffProxy::new(driver, vec![], handle, dir.path().to_path_buf());
        let (_, remote, status) = proxy.get_local_and_remote_contents("missing.txt").unwrap();
        assert!(remote.is_none());
        assert!(!status.exists);
        assert!(status.has_changes);
    }

    #[test]
    fn connect_failure_is_recorded_on_handle() {
        struct AlwaysFails;
        impl Uploader for AlwaysFails {
            fn connect(&mut self) -> Result<(), UploadError> {
                Err(UploadError::Connection("refused".into()))
            }
            fn disconnect(&mut self) {}
            fn mkdir(&mut self, _: &str) -> Result<(), UploadError> {
                Ok(())
            }
            fn upload(
                &mut self,
                _: &UploadFile,
                _: &str,
                _: &mut crate::uploader::Progress<'_>,
            ) -> Result<(), UploadError> {
                Ok(())
            }
            fn delete(&mut self, _: &str) -> Result<(), UploadError> {
                Ok(())
            }
            fn read_file(&mut self, _: &str) -> Result<Option<RemoteFileContent>, UploadError> {
                Ok(None)
            }
        }
        let handle = std::sync::Arc::new(FirstErrorHandle::new());
        let driver: Box<dyn Uploader> = Box::new(AlwaysFails);
        let mut proxy = RemoteDiffProxy::new(driver, vec![], handle.clone(), PathBuf::from("/tmp"));
        let result = proxy.get_remote_file_content("x.txt");
        assert!(result.is_err());
        assert!(handle.error().is_some());
    }
}
