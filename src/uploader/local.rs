//! Local filesystem driver: copies within the local filesystem. The
//! only driver guaranteed to support every optional capability except
//! bulk upload and server-side diff.

use std::collections::HashSet;
use std::fs;
use std::io::Read;
use std::path::PathBuf;

use filetime::{FileTime, set_file_times};
use walkdir::WalkDir;

use crate::error::{MkdirError, UploadError};
use crate::model::{ContentSource, RemoteFileContent, UploadFile};
use crate::uploader::{ListRemoteFiles, Progress, Uploader};

pub struct LocalUploader {
    dest: PathBuf,
    preserve_timestamps: bool,
    created_dirs: HashSet<PathBuf>,
}

impl LocalUploader {
    pub fn new(dest: PathBuf, preserve_timestamps: bool) -> Self {
        Self { dest, preserve_timestamps, created_dirs: HashSet::new() }
    }

    fn resolve(&self, rel_path: &str) -> PathBuf {
        self.dest.join(rel_path)
    }
}

impl Uploader for LocalUploader {
    fn connect(&mut self) -> Result<(), UploadError> {
        fs::create_dir_all(&self.dest).map_err(|e| UploadError::Connection(e.to_string()))
    }

    fn disconnect(&mut self) {}

    fn mkdir(&mut self, rel_path: &str) -> Result<(), UploadError> {
        let full = self.resolve(rel_path);
        if self.created_dirs.contains(&full) {
            return Ok(());
        }
        match fs::create_dir_all(&full) {
            Ok(()) => {
                self.created_dirs.insert(full);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                self.created_dirs.insert(full);
                Ok(())
            }
            Err(_) if full.is_file() => Err(MkdirError::ExistsAsFile(full).into()),
            Err(e) => Err(MkdirError::Transport(full, e.to_string()).into()),
        }
    }

    fn upload(
        &mut self,
        file: &UploadFile,
        rel_path: &str,
        on_progress: &mut Progress<'_>,
    ) -> Result<(), UploadError> {
        if file.is_directory {
            self.mkdir(rel_path)?;
            on_progress(0, 0);
            return Ok(());
        }

        let full = self.resolve(rel_path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(|e| UploadError::Transfer(e.to_string()))?;
        }

        let total = file.size;
        on_progress(0, total);
        match file.source.as_ref() {
            Some(ContentSource::Bytes(bytes)) => {
                fs::write(&full, bytes).map_err(|e| UploadError::Transfer(e.to_string()))?;
            }
            Some(ContentSource::Path(src)) => {
                fs::copy(src, &full).map_err(|e| UploadError::Transfer(e.to_string()))?;
            }
            None => return Err(UploadError::Transfer(format!("{rel_path}: no content source"))),
        }
        on_progress(total, total);

        if self.preserve_timestamps {
            if let Some(ContentSource::Path(src)) = file.source.as_ref() {
                if let Ok(meta) = fs::metadata(src) {
                    let atime = FileTime::from_last_access_time(&meta);
                    let mtime = FileTime::from_last_modification_time(&meta);
                    let _ = set_file_times(&full, atime, mtime);
                }
            }
        }
        Ok(())
    }

    fn delete(&mut self, rel_path: &str) -> Result<(), UploadError> {
        let full = self.resolve(rel_path);
        match fs::symlink_metadata(&full) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&full)
                .map_err(|e| UploadError::Transfer(format!("delete {rel_path}: {e}"))),
            Ok(_) => fs::remove_file(&full)
                .map_err(|e| UploadError::Transfer(format!("delete {rel_path}: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(UploadError::Transfer(format!("delete {rel_path}: {e}"))),
        }
    }

    fn read_file(&mut self, rel_path: &str) -> Result<Option<RemoteFileContent>, UploadError> {
        let full = self.resolve(rel_path);
        let meta = match fs::symlink_metadata(&full) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(UploadError::Io(e.to_string())),
        };
        if meta.is_dir() {
            return Ok(None);
        }
        let mut content = Vec::new();
        fs::File::open(&full)
            .and_then(|mut f| f.read_to_end(&mut content))
            .map_err(|e| UploadError::Io(e.to_string()))?;
        let size = content.len() as u64;
        Ok(Some(RemoteFileContent { content, size }))
    }

    fn as_lister(&mut self) -> Option<&mut dyn ListRemoteFiles> {
        Some(self)
    }
}

impl ListRemoteFiles for LocalUploader {
    fn list_remote_files(&mut self) -> Result<Vec<String>, UploadError> {
        if !self.dest.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in WalkDir::new(&self.dest).into_iter().filter_map(Result::ok) {
            if entry.file_type().is_dir() {
                continue;
            }
            if let Ok(rel) = entry.path().strip_prefix(&self.dest) {
                out.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
        Ok(out)
    }
}
