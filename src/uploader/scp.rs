//! SCP driver: spawns the external `scp` binary, using an auxiliary
//! `ssh` channel for directory operations and reads. Has no
//! bulk capability.

use std::collections::HashSet;
use std::io::Write as _;
use std::process::{Command, Output};

use crate::error::{MkdirError, UploadError};
use crate::model::{ContentSource, RemoteFileContent, UploadFile};
use crate::uploader::ssh_opts::SshOptions;
use crate::uploader::{Progress, Uploader};

pub struct ScpUploader {
    opts: SshOptions,
    dest: String,
    created_dirs: HashSet<String>,
}

impl ScpUploader {
    pub fn new(opts: SshOptions, dest: String) -> Self {
        Self { opts, dest, created_dirs: HashSet::new() }
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
}

impl Uploader for ScpUploader {
    fn connect(&mut self) -> Result<(), UploadError> {
        let mut cmd = self.ssh_command("echo ok")?;
        let output = Self::run(&mut cmd)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(UploadError::Connection(format!("ssh probe failed: {stderr}")));
        }
        Ok(())
    }

    fn disconnect(&mut self) {}

    fn mkdir(&mut self, rel_path: &str) -> Result<(), UploadError> {
        let full = self.remote_path(rel_path);
        if self.created_dirs.contains(&full) {
            return Ok(());
        }
        let mut cmd = self.ssh_command(&format!("mkdir -p '{full}'"))?;
        let output = Self::run(&mut cmd)?;
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
        if let Some(parent) = std::path::Path::new(rel_path).parent().filter(|p| !p.as_os_str().is_empty())
        {
            self.mkdir(&parent.to_string_lossy())?;
        }

        let (local_path, _staging) = match file.source.as_ref() {
            Some(ContentSource::Path(p)) => (p.clone(), None),
            Some(ContentSource::Bytes(bytes)) => {
                let staging = tempfile::NamedTempFile::new()
                    .map_err(|e| UploadError::Io(e.to_string()))?;
                staging.as_file().write_all(bytes).map_err(|e| UploadError::Io(e.to_string()))?;
                let path = staging.path().to_path_buf();
                (path, Some(staging))
            }
            None => return Err(UploadError::Transfer(format!("{rel_path}: no content source"))),
        };

        let full = self.remote_path(rel_path);
        let total = file.size;
        on_progress(0, total);
        let mut args = self.opts.scp_args();
        args.push(local_path.to_string_lossy().into_owned());
        args.push(format!("{}:{}", self.opts.user_at_host(), full));
        let mut cmd = Command::new("scp");
        cmd.args(&args);
        let mut cmd = self.opts.wrap_with_sshpass(cmd)?;
        let output = Self::run(&mut cmd)?;
        if !output.status.success() {
            return Err(UploadError::Transfer(format!(
                "scp {rel_path}: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        on_progress(total, total);
        Ok(())
    }

    fn delete(&mut self, rel_path: &str) -> Result<(), UploadError> {
        let full = self.remote_path(rel_path);
        let mut cmd = self.ssh_command(&format!("rm -rf '{full}'"))?;
        let output = Self::run(&mut cmd)?;
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
        let mut cmd = self.ssh_command(&format!(
            "if [ -d '{full}' ]; then exit 2; elif [ -e '{full}' ]; then cat '{full}'; else exit 1; fi"
        ))?;
        let output = Self::run(&mut cmd)?;
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_path_joins_dest_and_rel() {
        let opts = SshOptions {
            host: "h".into(),
            port: 22,
            user: None,
            key_file: None,
            password: None,
            connect_timeout_secs: 10,
            legacy_mode: false,
        };
        let u = ScpUploader::new(opts, "/srv/app/".into());
        assert_eq!(u.remote_path("a/b.txt"), "/srv/app/a/b.txt");
    }
}
