//! Rsync driver: spawns the external `rsync` binary, reusing the shared
//! SSH-option builder. Implements all three optional capabilities
//! Staging and itemize-changes parsing are grounded on the
//! design note on subprocess lifetimes (scoped temp dirs)
//! and on rsync itemize-changes interpretation.

use std::collections::HashSet;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::Instant;

use tempfile::TempDir;

use crate::error::{MkdirError, UploadError};
use crate::model::{ContentSource, ProtocolOptions, RemoteFileContent, UploadFile};
use crate::uploader::ssh_opts::SshOptions;
use crate::uploader::{
    BulkUpload, BulkUploadResult, DiffCapable, DiffEntry, DiffEntryStatus, DiffOptions, DiffResult,
    ListRemoteFiles, Progress, Uploader,
};

pub struct RsyncUploader {
    opts: SshOptions,
    dest: String,
    protocol_options: ProtocolOptions,
    preserve_permissions: bool,
    preserve_timestamps: bool,
    created_dirs: HashSet<String>,
}

impl RsyncUploader {
    pub fn new(
        opts: SshOptions,
        dest: String,
        protocol_options: ProtocolOptions,
        preserve_permissions: bool,
        preserve_timestamps: bool,
    ) -> Self {
        Self {
            opts,
            dest,
            protocol_options,
            preserve_permissions,
            preserve_timestamps,
            created_dirs: HashSet::new(),
        }
    }

    fn is_sudo(&self) -> bool {
        self.protocol_options.rsync_path.as_deref().map(|p| p.contains("sudo")).unwrap_or(false)
    }

    fn remote_cmd(&self, cmd: &str) -> String {
        if self.is_sudo() { format!("sudo {cmd}") } else { cmd.to_string() }
    }

    fn remote_path(&self, rel_path: &str) -> String {
        format!("{}/{}", self.dest.trim_end_matches('/'), rel_path)
    }

    fn ssh_command(&self, remote_cmd: &str) -> Result<Command, UploadError> {
        let mut cmd = Command::new("ssh");
        cmd.args(self.opts.ssh_args()).arg(remote_cmd);
        self.opts.wrap_with_sshpass(cmd)
    }

    fn run(cmd: &mut Command) -> Result<Output, UploadError> {
        cmd.output().map_err(|e| UploadError::Connection(format!("spawn failed: {e}")))
    }

    /// Exit codes 23 (partial transfer) and 24 (vanished source) are
    /// warnings, not failures.
    fn check_exit(output: &Output, context: &str) -> Result<bool, UploadError> {
        match output.status.code() {
            Some(0) => Ok(false),
            Some(23) | Some(24) => Ok(true),
            _ => Err(UploadError::Transfer(format!(
                "{context}: {}",
                String::from_utf8_lossy(&output.stderr)
            ))),
        }
    }

    fn archive_flags(&self) -> String {
        let mut flags = String::from("-rlKDO");
        if self.preserve_timestamps {
            flags.push('t');
        }
        if self.preserve_permissions {
            flags.push('p');
        }
        flags
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = vec![self.archive_flags(), "-e".to_string(), self.opts.rsync_ssh_command()];
        if let Some(rsync_path) = &self.protocol_options.rsync_path {
            args.push(format!("--rsync-path={rsync_path}"));
        }
        args.extend(self.protocol_options.rsync_extra_args.clone());
        args
    }

    /// Stages `files` into a temp directory mirroring the destination
    /// layout, preserving relative paths exactly so a single `rsync -r`
    /// call reproduces the whole set.
    fn stage(&self, files: &[(UploadFile, String)]) -> Result<TempDir, UploadError> {
        let staging = tempfile::tempdir().map_err(|e| UploadError::Io(e.to_string()))?;
        for (file, rel_path) in files {
            if file.is_directory {
                std::fs::create_dir_all(staging.path().join(rel_path))
                    .map_err(|e| UploadError::Io(e.to_string()))?;
                continue;
            }
            let target = staging.path().join(rel_path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| UploadError::Io(e.to_string()))?;
            }
            match file.source.as_ref() {
                Some(ContentSource::Bytes(bytes)) => {
                    std::fs::write(&target, bytes).map_err(|e| UploadError::Io(e.to_string()))?;
                }
                Some(ContentSource::Path(src)) => {
                    std::fs::copy(src, &target).map_err(|e| UploadError::Io(e.to_string()))?;
                }
                None => {
                    return Err(UploadError::Transfer(format!("{rel_path}: no content source")));
                }
            }
        }
        Ok(staging)
    }
}

impl Uploader for RsyncUploader {
    fn connect(&mut self) -> Result<(), UploadError> {
        let mut cmd = self.ssh_command("echo ok")?;
        let output = RsyncUploader::run(&mut cmd)?;
        if !output.status.success() {
            return Err(UploadError::Connection(format!(
                "ssh probe failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(())
    }

    fn disconnect(&mut self) {}

    fn mkdir(&mut self, rel_path: &str) -> Result<(), UploadError> {
        let full = self.remote_path(rel_path);
        if self.created_dirs.contains(&full) {
            return Ok(());
        }
        let cmd_str = self.remote_cmd(&format!("mkdir -p '{full}'"));
        let mut cmd = self.ssh_command(&cmd_str)?;
        let output = RsyncUploader::run(&mut cmd)?;
        if output.status.success() {
            self.created_dirs.insert(full);
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if stderr.contains("Not a directory") || stderr.contains("File exists") {
            Err(MkdirError::ExistsAsFile(full.into()).into())
        } else {
            Err(MkdirError::Transport(full.into(), stderr).into())
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
        let staging = self.stage(std::slice::from_ref(&(file.clone(), rel_path.to_string())))?;
        let total = file.size;
        on_progress(0, total);

        let mut args = self.base_args();
        let staged_file = staging.path().join(rel_path);
        args.push(staged_file.to_string_lossy().into_owned());
        args.push(format!(
            "{}:{}",
            self.opts.user_at_host(),
            self.remote_path(rel_path)
        ));
        let mut cmd = Command::new("rsync");
        cmd.args(&args);
        let mut cmd = self.opts.wrap_with_sshpass(cmd)?;
        let output = RsyncUploader::run(&mut cmd)?;
        Self::check_exit(&output, &format!("rsync {rel_path}"))?;
        on_progress(total, total);
        Ok(())
    }

    fn delete(&mut self, rel_path: &str) -> Result<(), UploadError> {
        let full = self.remote_path(rel_path);
        let cmd_str = self.remote_cmd(&format!("rm -rf '{full}'"));
        let mut cmd = self.ssh_command(&cmd_str)?;
        let output = RsyncUploader::run(&mut cmd)?;
        if output.status.success() {
            return Ok(());
        }
        Err(UploadError::Transfer(format!(
            "delete {full}: {}",
            String::from_utf8_lossy(&output.stderr)
        )))
    }

    fn read_file(&mut self, rel_path: &str) -> Result<Option<RemoteFileContent>, UploadError> {
        let full = self.remote_path(rel_path);
        let test_cmd = format!(
            "if [ -d '{full}' ]; then exit 2; elif [ -e '{full}' ]; then {}; else exit 1; fi",
            self.remote_cmd(&format!("cat '{full}'"))
        );
        let mut cmd = self.ssh_command(&test_cmd)?;
        let output = RsyncUploader::run(&mut cmd)?;
        match output.status.code() {
            Some(0) => {
                let content = output.stdout;
                let size = content.len() as u64;
                Ok(Some(RemoteFileContent { content, size }))
            }
            Some(1) | Some(2) => Ok(None),
            _ => Err(UploadError::Transfer(format!(
                "read {full}: {}",
                String::from_utf8_lossy(&output.stderr)
            ))),
        }
    }

    fn as_bulk_upload(&mut self) -> Option<&mut dyn BulkUpload> {
        Some(self)
    }

    fn as_diff_capable(&mut self) -> Option<&mut dyn DiffCapable> {
        Some(self)
    }

    fn as_lister(&mut self) -> Option<&mut dyn ListRemoteFiles> {
        Some(self)
    }
}

impl BulkUpload for RsyncUploader {
    fn bulk_upload(
        &mut self,
        files: &[(UploadFile, String)],
        on_progress: &mut Progress<'_>,
    ) -> Result<BulkUploadResult, UploadError> {
        let start = Instant::now();
        let total_size: u64 = files.iter().map(|(f, _)| f.size).sum();
        on_progress(0, total_size);

        let staging = self.stage(files)?;
        let mut args = self.base_args();
        let stage_src = format!("{}/", staging.path().to_string_lossy());
        args.push(stage_src);
        args.push(format!("{}:{}/", self.opts.user_at_host(), self.dest.trim_end_matches('/')));

        let mut cmd = Command::new("rsync");
        cmd.args(&args);
        let mut cmd = self.opts.wrap_with_sshpass(cmd)?;
        let output = RsyncUploader::run(&mut cmd)?;
        let warned = match Self::check_exit(&output, "rsync bulk upload") {
            Ok(w) => w,
            Err(_) => {
                // Every file in the batch is marked failed — a
                // faithfully-preserved oddity: exit codes 23/24 would
                // imply partial success but are not disambiguated here.
                on_progress(0, total_size);
                return Ok(BulkUploadResult {
                    success_count: 0,
                    failed_count: files.len(),
                    total_size,
                    duration: start.elapsed(),
                });
            }
        };
        let _ = warned;
        on_progress(total_size, total_size);
        Ok(BulkUploadResult {
            success_count: files.len(),
            failed_count: 0,
            total_size,
            duration: start.elapsed(),
        })
    }
}

impl DiffCapable for RsyncUploader {
    fn get_diff(
        &mut self,
        local_dir: &Path,
        options: &DiffOptions,
    ) -> Result<DiffResult, UploadError> {
        let mut args = vec!["-n".to_string(), "--itemize-changes".to_string()];
        args.push("-e".into());
        args.push(self.opts.rsync_ssh_command());
        if options.checksum {
            args.push("--checksum".into());
        }
        for pattern in &options.ignore_patterns {
            args.push(format!("--exclude={pattern}"));
        }
        let _files_list_file;
        match &options.files {
            Some(files) => {
                let mut tmp =
                    tempfile::NamedTempFile::new().map_err(|e| UploadError::Io(e.to_string()))?;
                for f in files {
                    writeln!(tmp, "{f}").map_err(|e| UploadError::Io(e.to_string()))?;
                }
                args.push(format!("--files-from={}", tmp.path().to_string_lossy()));
                _files_list_file = Some(tmp);
            }
            None => {
                args.push("--delete".into());
                _files_list_file = None;
            }
        }
        let remote_dir = options.remote_dir.as_deref().unwrap_or(self.dest.as_str());
        args.push(format!("{}/", local_dir.to_string_lossy()));
        args.push(format!("{}:{}/", self.opts.user_at_host(), remote_dir.trim_end_matches('/')));

        let mut cmd = Command::new("rsync");
        cmd.args(&args);
        let mut cmd = self.opts.wrap_with_sshpass(cmd)?;
        let output = RsyncUploader::run(&mut cmd)?;
        RsyncUploader::check_exit(&output, "rsync getDiff")?;
        Ok(parse_itemize_changes(&String::from_utf8_lossy(&output.stdout)))
    }
}

impl ListRemoteFiles for RsyncUploader {
    fn list_remote_files(&mut self) -> Result<Vec<String>, UploadError> {
        let cmd_str =
            self.remote_cmd(&format!("cd '{}' 2>/dev/null && find . -type f", self.dest));
        let mut cmd = self.ssh_command(&cmd_str)?;
        let output = RsyncUploader::run(&mut cmd)?;
        if !output.status.success() {
            return Err(UploadError::Transfer(format!(
                "list remote files: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .filter_map(|l| l.strip_prefix("./"))
            .map(|s| s.to_string())
            .collect())
    }
}

/// Parses rsync `--itemize-changes` output into `DiffEntry`s.
/// Each line begins with an 11-character YXcstpoguax block; `<`
/// (transfer to remote) is a modify, `*deleting` a delete, and
/// `>f+++++++++` a new file.
fn parse_itemize_changes(output: &str) -> DiffResult {
    let mut entries = Vec::new();
    for line in output.lines() {
        if line.starts_with("*deleting") {
            if let Some(path) = line.splitn(2, ' ').nth(1) {
                entries.push(DiffEntry { path: path.trim().to_string(), status: DiffEntryStatus::Deleted });
            }
            continue;
        }
        if line.len() < 12 {
            continue;
        }
        let (block, rest) = line.split_at(11);
        let path = rest.trim().to_string();
        if path.is_empty() {
            continue;
        }
        if block.starts_with(">f+++++++++") {
            entries.push(DiffEntry { path, status: DiffEntryStatus::Added });
        } else if block.starts_with('<') {
            entries.push(DiffEntry { path, status: DiffEntryStatus::Modified });
        }
    }
    let added = entries.iter().filter(|e| e.status == DiffEntryStatus::Added).count();
    let modified = entries.iter().filter(|e| e.status == DiffEntryStatus::Modified).count();
    let deleted = entries.iter().filter(|e| e.status == DiffEntryStatus::Deleted).count();
    DiffResult { entries, added, modified, deleted }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn itemize_changes_classifies_add_modify_delete() {
        let output = ">f+++++++++ new.txt\n<f.st...... changed.txt\n*deleting old.txt\n";
        let result = parse_itemize_changes(output);
        assert_eq!(result.added, 1);
        assert_eq!(result.modified, 1);
        assert_eq!(result.deleted, 1);
        assert!(result.entries.iter().any(|e| e.path == "new.txt" && e.status == DiffEntryStatus::Added));
        assert!(result.entries.iter().any(|e| e.path == "old.txt" && e.status == DiffEntryStatus::Deleted));
    }

    #[test]
    fn sudo_rsync_path_prefixes_remote_commands() {
        let opts = SshOptions {
            host: "h".into(),
            port: 22,
            user: None,
            key_file: None,
            password: None,
            connect_timeout_secs: 10,
            legacy_mode: false,
        };
        let protocol_options =
            ProtocolOptions { rsync_path: Some("sudo rsync".into()), ..Default::default() };
        let u = RsyncUploader::new(opts, "/srv".into(), protocol_options, false, false);
        assert_eq!(u.remote_cmd("mkdir -p /srv/x"), "sudo mkdir -p /srv/x");
    }
}
