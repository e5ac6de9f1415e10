//! SFTP driver: an embedded SSH+SFTP session via `ssh2`.
//!
//! Connection setup follows
//! `transfer/session.rs::{create_tcp_connection, try_key_authentication,
//! connect_session}`; the mkdir-walk-parents and delete-unlink-then-rmdir
//! behavior on `transfer/workers/upload.rs::ensure_remote_dir_all_generic`
//! and its sibling delete helper.

use std::collections::HashSet;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::Path;
use std::time::Duration;

use ssh2::Session;

use crate::error::{MkdirError, UploadError};
use crate::model::{Auth, ContentSource, RemoteFileContent, UploadFile};
use crate::uploader::{ListRemoteFiles, Progress, Uploader};

pub struct SftpOptions {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub auth: Auth,
    pub connect_timeout: Duration,
    pub legacy_mode: bool,
}

pub struct SftpUploader {
    opts: SftpOptions,
    dest: String,
    session: Option<Session>,
    created_dirs: HashSet<String>,
}

impl SftpUploader {
    pub fn new(opts: SftpOptions, dest: String) -> Self {
        Self { opts, dest, session: None, created_dirs: HashSet::new() }
    }

    fn sftp(&self) -> Result<ssh2::Sftp, UploadError> {
        self.session
            .as_ref()
            .ok_or_else(|| UploadError::Connection("not connected".into()))?
            .sftp()
            .map_err(|e| UploadError::Connection(format!("sftp channel: {e}")))
    }

    fn remote_path(&self, rel_path: &str) -> String {
        format!("{}/{}", self.dest.trim_end_matches('/'), rel_path)
    }

    fn try_key_authentication(session: &Session, user: &str) -> Result<(), UploadError> {
        let candidates = ["id_ed25519", "id_rsa", "id_ecdsa"];
        let home = dirs::home_dir().ok_or_else(|| UploadError::Auth("no home directory".into()))?;
        let mut last_err = None;
        for name in candidates {
            let key_path = home.join(".ssh").join(name);
            if !key_path.exists() {
                continue;
            }
            match session.userauth_pubkey_file(user, None, &key_path, None) {
                Ok(()) => return Ok(()),
                Err(e) => last_err = Some(e.to_string()),
            }
        }
        Err(UploadError::Auth(
            last_err.unwrap_or_else(|| "no usable key found under ~/.ssh".into()),
        ))
    }
}

impl Uploader for SftpUploader {
    fn connect(&mut self) -> Result<(), UploadError> {
        let addr = format!("{}:{}", self.opts.host, self.opts.port);
        let tcp = TcpStream::connect(&addr)
            .map_err(|e| UploadError::Connection(format!("tcp connect {addr}: {e}")))?;
        tcp.set_read_timeout(Some(self.opts.connect_timeout)).ok();
        tcp.set_write_timeout(Some(self.opts.connect_timeout)).ok();

        let mut session = Session::new().map_err(|e| UploadError::Connection(e.to_string()))?;
        if self.opts.legacy_mode {
            let _ = session.method_pref(
                ssh2::MethodType::Kex,
                "diffie-hellman-group-exchange-sha1,diffie-hellman-group14-sha1,diffie-hellman-group1-sha1",
            );
            let _ = session.method_pref(ssh2::MethodType::HostKey, "ssh-rsa,ssh-dss");
        }
        session.set_tcp_stream(tcp);
        session.handshake().map_err(|e| UploadError::Connection(format!("handshake: {e}")))?;

        match &self.opts.auth {
            Auth::KeyFile { path } => {
                session
                    .userauth_pubkey_file(&self.opts.user, None, path, None)
                    .map_err(|e| UploadError::Auth(e.to_string()))?;
            }
            Auth::Password { password } => {
                session
                    .userauth_password(&self.opts.user, password)
                    .map_err(|e| UploadError::Auth(e.to_string()))?;
            }
            Auth::None => {
                Self::try_key_authentication(&session, &self.opts.user)?;
            }
        }
        if !session.authenticated() {
            return Err(UploadError::Auth("authentication did not complete".into()));
        }
        self.session = Some(session);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.session = None;
        self.created_dirs.clear();
    }

    fn mkdir(&mut self, rel_path: &str) -> Result<(), UploadError> {
        let full = self.remote_path(rel_path);
        if self.created_dirs.contains(&full) {
            return Ok(());
        }
        let sftp = self.sftp()?;
        let mut built = String::new();
        for segment in full.trim_start_matches('/').split('/') {
            if segment.is_empty() {
                continue;
            }
            built.push('/');
            built.push_str(segment);
            if self.created_dirs.contains(&built) {
                continue;
            }
            match sftp.stat(Path::new(&built)) {
                Ok(stat) if stat.is_dir() => {}
                Ok(_) => {
                    return Err(MkdirError::ExistsAsFile(built.clone().into()).into());
                }
                Err(_) => {
                    if let Err(e) = sftp.mkdir(Path::new(&built), 0o755) {
                        // ssh2 surfaces "already exists" as a generic failure code;
                        // re-stat to distinguish a benign race from a real failure.
                        if sftp.stat(Path::new(&built)).map(|s| s.is_dir()).unwrap_or(false) {
                            // fallthrough: created concurrently, treat as success
                        } else {
                            return Err(MkdirError::Transport(built.clone().into(), e.to_string()).into());
                        }
                    }
                }
            }
            self.created_dirs.insert(built.clone());
        }
        Ok(())
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
        if let Some(parent) = Path::new(rel_path).parent().filter(|p| !p.as_os_str().is_empty()) {
            self.mkdir(&parent.to_string_lossy())?;
        }

        let bytes: Vec<u8> = match file.source.as_ref() {
            Some(ContentSource::Bytes(b)) => b.clone(),
            Some(ContentSource::Path(p)) => {
                std::fs::read(p).map_err(|e| UploadError::Transfer(e.to_string()))?
            }
            None => return Err(UploadError::Transfer(format!("{rel_path}: no content source"))),
        };

        let sftp = self.sftp()?;
        let full = self.remote_path(rel_path);
        let total = bytes.len() as u64;
        on_progress(0, total);
        let mut remote = sftp
            .create(Path::new(&full))
            .map_err(|e| UploadError::Transfer(format!("create {full}: {e}")))?;
        const CHUNK: usize = 64 * 1024;
        let mut sent: u64 = 0;
        for chunk in bytes.chunks(CHUNK) {
            remote.write_all(chunk).map_err(|e| UploadError::Transfer(e.to_string()))?;
            sent += chunk.len() as u64;
            on_progress(sent, total);
        }
        on_progress(total, total);
        Ok(())
    }

    fn delete(&mut self, rel_path: &str) -> Result<(), UploadError> {
        let sftp = self.sftp()?;
        let full = self.remote_path(rel_path);
        let path = Path::new(&full);
        match sftp.unlink(path) {
            Ok(()) => Ok(()),
            Err(_) => match sftp.rmdir(path) {
                Ok(()) => Ok(()),
                Err(e) => {
                    // "no such file" (after either attempt) is success.
                    if sftp.stat(path).is_err() {
                        Ok(())
                    } else {
                        Err(UploadError::Transfer(format!("delete {full}: {e}")))
                    }
                }
            },
        }
    }

    fn read_file(&mut self, rel_path: &str) -> Result<Option<RemoteFileContent>, UploadError> {
        let sftp = self.sftp()?;
        let full = self.remote_path(rel_path);
        let path = Path::new(&full);
        let stat = match sftp.stat(path) {
            Ok(s) => s,
            Err(_) => return Ok(None),
        };
        if stat.is_dir() {
            return Ok(None);
        }
        let mut remote =
            sftp.open(path).map_err(|e| UploadError::Transfer(format!("open {full}: {e}")))?;
        let mut content = Vec::new();
        remote.read_to_end(&mut content).map_err(|e| UploadError::Transfer(e.to_string()))?;
        let size = content.len() as u64;
        Ok(Some(RemoteFileContent { content, size }))
    }

    fn as_lister(&mut self) -> Option<&mut dyn ListRemoteFiles> {
        Some(self)
    }
}

impl ListRemoteFiles for SftpUploader {
    fn list_remote_files(&mut self) -> Result<Vec<String>, UploadError> {
        let sftp = self.sftp()?;
        let mut out = Vec::new();
        let root = self.dest.clone();
        walk(&sftp, Path::new(&root), &root, &mut out)?;
        Ok(out)
    }
}

fn walk(
    sftp: &ssh2::Sftp,
    dir: &Path,
    root: &str,
    out: &mut Vec<String>,
) -> Result<(), UploadError> {
    let entries = match sftp.readdir(dir) {
        Ok(e) => e,
        Err(_) => return Ok(()),
    };
    for (path, stat) in entries {
        let name = match path.file_name() {
            Some(n) => n.to_string_lossy().to_string(),
            None => continue,
        };
        if name == "." || name == ".." {
            continue;
        }
        if stat.is_dir() {
            walk(sftp, &path, root, out)?;
        } else {
            if let Ok(rel) = path.strip_prefix(root) {
                out.push(rel.to_string_lossy().trim_start_matches('/').replace('\\', "/"));
            }
        }
    }
    Ok(())
}
