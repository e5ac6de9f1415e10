//! Shared SSH option builder for the SCP and rsync external-process
//! drivers, following the same
//! `transfer/session.rs` connection setup, generalized from the ssh2
//! session builder to an argv builder for subprocess invocations.

use std::process::Command;

#[derive(Debug, Clone)]
pub struct SshOptions {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub key_file: Option<std::path::PathBuf>,
    pub password: Option<String>,
    pub connect_timeout_secs: u64,
    pub legacy_mode: bool,
}

impl SshOptions {
    pub fn user_at_host(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", self.host),
            None => self.host.clone(),
        }
    }

    /// Builds the shared `-o ...` option block, in the exact order
    /// the wire format specifies: BatchMode, StrictHostKeyChecking,
    /// ConnectTimeout, then legacy algorithm widening if requested.
    fn common_opts(&self) -> Vec<String> {
        let mut opts = Vec::new();
        if self.password.is_none() {
            opts.push("-o".into());
            opts.push("BatchMode=yes".into());
        }
        opts.push("-o".into());
        opts.push("StrictHostKeyChecking=accept-new".into());
        opts.push("-o".into());
        opts.push(format!("ConnectTimeout={}", self.connect_timeout_secs));
        if self.legacy_mode {
            opts.push("-o".into());
            opts.push(
                "KexAlgorithms=+diffie-hellman-group-exchange-sha1,diffie-hellman-group14-sha1,diffie-hellman-group1-sha1"
                    .into(),
            );
            opts.push("-o".into());
            opts.push("HostKeyAlgorithms=+ssh-rsa,ssh-dss".into());
            opts.push("-o".into());
            opts.push("PubkeyAcceptedAlgorithms=+ssh-rsa".into());
        }
        opts
    }

    /// Argument list for an `ssh` invocation (used for the mkdir -p /
    /// rm -rf / cat auxiliary channel, and connectivity probing).
    pub fn ssh_args(&self) -> Vec<String> {
        let mut args = self.common_opts();
        args.push("-p".into());
        args.push(self.port.to_string());
        if let Some(key) = &self.key_file {
            args.push("-i".into());
            args.push(key.to_string_lossy().into_owned());
        }
        args.push(self.user_at_host());
        args
    }

    /// Argument list for an `scp`/`rsync -e ssh` transport connection
    /// (scp uses `-P` for the port, not `-p`).
    pub fn scp_args(&self) -> Vec<String> {
        let mut args = self.common_opts();
        args.push("-P".into());
        args.push(self.port.to_string());
        if let Some(key) = &self.key_file {
            args.push("-i".into());
            args.push(key.to_string_lossy().into_owned());
        }
        args
    }

    /// The `-e <ssh-cmd>` value rsync needs to reuse the same option set.
    pub fn rsync_ssh_command(&self) -> String {
        let mut parts = vec!["ssh".to_string()];
        parts.extend(self.common_opts());
        parts.push("-p".into());
        parts.push(self.port.to_string());
        if let Some(key) = &self.key_file {
            parts.push("-i".into());
            parts.push(key.to_string_lossy().into_owned());
        }
        shell_join(&parts)
    }

    /// Wraps `cmd` with `sshpass -p <password> ...` when password auth
    /// is configured and the `sshpass` binary is on PATH.
    pub fn wrap_with_sshpass(&self, mut cmd: Command) -> Result<Command, crate::error::UploadError> {
        let Some(password) = &self.password else { return Ok(cmd) };
        if which::which("sshpass").is_err() {
            return Err(crate::error::UploadError::Connection(
                "password auth requested but sshpass is not on PATH".into(),
            ));
        }
        let program = cmd.get_program().to_owned();
        let args: Vec<_> = cmd.get_args().map(|a| a.to_owned()).collect();
        let mut wrapped = Command::new("sshpass");
        wrapped.arg("-p").arg(password).arg(program).args(args);
        // Preserve whatever current_dir/envs callers may have set before wrapping.
        if let Some(dir) = cmd.get_current_dir() {
            wrapped.current_dir(dir);
        }
        cmd = wrapped;
        Ok(cmd)
    }
}

fn shell_join(parts: &[String]) -> String {
    parts
        .iter()
        .map(|p| if p.contains(' ') { format!("\"{p}\"") } else { p.clone() })
        .collect::<Vec<_>>()
        .join(" ")
}
