use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing_appender::non_blocking;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use dockhand::capability::has_list_remote_files;
use dockhand::collaborators::FsDiffProvider;
use dockhand::config;
use dockhand::fanout::{run_fanout, FanoutOptions};
use dockhand::ignore::IgnoreMatcher;
use dockhand::mirror::plan_mirror_deletions;
use dockhand::model::{Auth, ContentSource, Protocol, TargetConfig, UploadFile};
use dockhand::review::{run_review_server, ReviewOutcome};
use dockhand::uploader::local::LocalUploader;
use dockhand::uploader::rsync::RsyncUploader;
use dockhand::uploader::scp::ScpUploader;
use dockhand::uploader::sftp::{SftpOptions, SftpUploader};
use dockhand::uploader::ssh_opts::SshOptions;
use dockhand::uploader::Uploader;
use dockhand::util;

mod cli;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        cli::Commands::Push { targets, source, mirror, yes, parallel, strict, retry, port, json } => {
            run_push(&targets, &source, mirror, yes, parallel, strict, retry, port, json)
        }
        cli::Commands::Review { targets, source, port } => run_review_only(&targets, &source, port),
    }
}

fn init_tracing(verbose: bool) {
    let logs_dir = state_dir().join("logs");
    let _ = std::fs::create_dir_all(&logs_dir);
    let log_path = logs_dir.join("debug.log");
    let level = if verbose { "debug" } else { "warn" };

    match OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(file) => {
            let (writer, guard) = non_blocking(file);
            // Leaked so the background writer thread survives for the process lifetime.
            let _ = Box::leak(Box::new(guard));
            let layer =
                fmt::layer().with_writer(writer).with_ansi(false).with_filter(EnvFilter::new(level));
            tracing_subscriber::registry().with(layer).init();
        }
        Err(e) => {
            eprintln!("warning: could not open debug log at {}: {e}", log_path.display());
        }
    }
}

fn state_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".dockhand")
}

/// Checks for `rsync`/`scp`/`ssh`/`sshpass` on PATH *before* the fan-out
/// executor starts, as needed by the configured protocols.
fn preflight_check_binaries(targets: &[TargetConfig]) -> Result<()> {
    let mut needed = std::collections::HashSet::new();
    for target in targets {
        match target.protocol {
            Protocol::Scp => {
                needed.insert("scp");
                needed.insert("ssh");
            }
            Protocol::Rsync => {
                needed.insert("rsync");
                needed.insert("ssh");
            }
            Protocol::Sftp | Protocol::Local => {}
        }
        if matches!(target.auth, Auth::Password { .. }) && matches!(target.protocol, Protocol::Scp | Protocol::Rsync)
        {
            needed.insert("sshpass");
        }
    }
    for binary in needed {
        which::which(binary)
            .with_context(|| format!("required binary `{binary}` was not found on PATH"))?;
    }
    Ok(())
}

fn build_driver(target: &TargetConfig) -> Box<dyn Uploader + Send> {
    match target.protocol {
        Protocol::Local => Box::new(LocalUploader::new(PathBuf::from(&target.dest), target.preserve_timestamps)),
        Protocol::Sftp => {
            let opts = SftpOptions {
                host: target.host.clone(),
                port: target.port,
                user: target.user.clone().unwrap_or_default(),
                auth: target.auth.clone(),
                connect_timeout: target.timeout(),
                legacy_mode: target.protocol_options.legacy_mode,
            };
            Box::new(SftpUploader::new(opts, target.dest.clone()))
        }
        Protocol::Scp => Box::new(ScpUploader::new(ssh_options(target), target.dest.clone())),
        Protocol::Rsync => Box::new(RsyncUploader::new(
            ssh_options(target),
            target.dest.clone(),
            target.protocol_options.clone(),
            target.preserve_permissions,
            target.preserve_timestamps,
        )),
    }
}

fn ssh_options(target: &TargetConfig) -> SshOptions {
    let (key_file, password) = match &target.auth {
        Auth::KeyFile { path } => (Some(path.clone()), None),
        Auth::Password { password } => (None, Some(password.clone())),
        Auth::None => (None, None),
    };
    SshOptions {
        host: target.host.clone(),
        port: target.port,
        user: target.user.clone(),
        key_file,
        password,
        connect_timeout_secs: target.timeout_secs,
        legacy_mode: target.protocol_options.legacy_mode,
    }
}

/// Walks `source` into the unit-of-work list C1 expects. Every file is
/// reported as a `modify` since there is no real `DiffProvider` wired
/// up here — a production caller
/// supplies the git-derived change set instead.
fn collect_upload_files(source: &Path) -> Result<Vec<UploadFile>> {
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(source).into_iter().filter_map(std::result::Result::ok) {
        if entry.file_type().is_dir() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(source)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        files.push(UploadFile {
            relative_path: rel,
            size,
            is_directory: false,
            change_type: dockhand::model::ChangeType::Modify,
            source: Some(ContentSource::Path(entry.path().to_path_buf())),
        });
    }
    Ok(files)
}

#[allow(clippy::too_many_arguments)]
fn run_push(
    targets_path: &Path,
    source: &Path,
    mirror: bool,
    yes: bool,
    parallel: bool,
    strict: bool,
    retry: usize,
    port: u16,
    json: bool,
) -> Result<()> {
    let mut targets = config::load_targets(targets_path)?;
    for target in &mut targets {
        target.retry = retry;
    }
    preflight_check_binaries(&targets)?;

    let base_files = collect_upload_files(source)?;
    let files_by_target = plan_mirror_files(&targets, &base_files, mirror)?;

    if !yes {
        let provider = FsDiffProvider::new(tempfile::tempdir()?.keep(), source.to_path_buf());
        let diff = provider.collect("working-tree", "local").map_err(|e| anyhow::anyhow!(e))?;
        let outcome = tokio_runtime()?.block_on(run_review_server(
            port,
            diff,
            targets.clone(),
            base_files.clone(),
            source.to_path_buf(),
            build_driver,
        ))?;
        match outcome {
            ReviewOutcome::Cancelled { .. } => {
                println!("cancelled");
                return Ok(());
            }
            ReviewOutcome::Confirmed { progress_controller, changed_files } => {
                let result = run_fanout(
                    &targets,
                    &changed_files,
                    &files_by_target,
                    &FanoutOptions { parallel, strict, delete_remote: mirror },
                    &build_driver,
                    Some(&mut |event: &dockhand::model::ProgressEvent| {
                        progress_controller.send_progress(event.clone())
                    }),
                );
                progress_controller.send_complete(&result);
                render_result(&result, json)?;
                return exit_status(&result);
            }
        }
    }

    let result = if json {
        run_fanout(
            &targets,
            &base_files,
            &files_by_target,
            &FanoutOptions { parallel, strict, delete_remote: mirror },
            &build_driver,
            None,
        )
    } else {
        let (_mp, bars) = util::init_target_progress_bars(targets.len());
        run_fanout(
            &targets,
            &base_files,
            &files_by_target,
            &FanoutOptions { parallel, strict, delete_remote: mirror },
            &build_driver,
            Some(&mut |event: &dockhand::model::ProgressEvent| {
                let Some(bar) = bars.get(event.target_index) else { return };
                bar.set_length(event.total_files as u64);
                bar.set_position(event.file_index as u64);
                bar.set_message(event.current_file.clone());
                if matches!(event.status, dockhand::model::ProgressStatus::Completed | dockhand::model::ProgressStatus::Failed) {
                    bar.finish_with_message(event.current_file.clone());
                }
            }),
        )
    };
    render_result(&result, json)?;
    exit_status(&result)
}

fn run_review_only(targets_path: &Path, source: &Path, port: u16) -> Result<()> {
    let targets = config::load_targets(targets_path)?;
    let base_files = collect_upload_files(source)?;
    let provider = FsDiffProvider::new(tempfile::tempdir()?.keep(), source.to_path_buf());
    let diff = provider.collect("working-tree", "local").map_err(|e| anyhow::anyhow!(e))?;
    let outcome = tokio_runtime()?
        .block_on(run_review_server(port, diff, targets, base_files, source.to_path_buf(), build_driver))?;
    match outcome {
        ReviewOutcome::Cancelled { .. } => println!("cancelled"),
        ReviewOutcome::Confirmed { progress_controller, .. } => {
            progress_controller.close();
            println!("confirmed (review-only: no upload performed)");
        }
    }
    Ok(())
}

fn plan_mirror_files(
    targets: &[TargetConfig],
    base_files: &[UploadFile],
    mirror: bool,
) -> Result<std::collections::HashMap<String, Vec<UploadFile>>> {
    let mut map = std::collections::HashMap::new();
    if !mirror {
        return Ok(map);
    }
    for target in targets {
        if target.sync_mode != dockhand::model::SyncMode::Mirror {
            continue;
        }
        let mut driver = build_driver(target);
        if !has_list_remote_files(driver.as_mut()) {
            tracing::warn!(host = %target.host, "mirror mode requested but driver cannot list remote files");
            continue;
        }
        if driver.connect().is_err() {
            continue;
        }
        let ignore = IgnoreMatcher::compile(&target.ignore);
        if let Ok(plan) = plan_mirror_deletions(base_files, driver.as_mut(), &ignore) {
            map.insert(target.identity().to_string(), plan);
        }
        driver.disconnect();
    }
    Ok(map)
}

fn render_result(result: &dockhand::model::UploadResult, json: bool) -> Result<()> {
    if json {
        util::print_json_summary(result);
    } else {
        util::print_summary(result);
    }
    util::write_failure_ledger(&state_dir().join("logs/failures.jsonl"), &result.targets);
    Ok(())
}

fn exit_status(result: &dockhand::model::UploadResult) -> Result<()> {
    if result.failed_targets > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn tokio_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime for the review server")
}
