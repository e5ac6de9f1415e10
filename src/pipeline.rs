//! Per-target transfer pipeline: connect → sync → disconnect with
//! retry/backoff, bulk-vs-per-file strategy selection, and the
//! strict/lenient error policy, in the style of
//! `transfer/workers/upload.rs::run_upload_workers` for the retry loop
//! shape, adapted from a worker-pool-over-a-channel to a single
//! serialized per-target run ("operations against its driver are
//! serialized").

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::capability::has_bulk_upload;
use crate::error::UploadError;
use crate::model::{
    ChangeType, FileOutcome, ProgressStatus, TargetConfig, TargetIdentity, TargetStatus,
    UploadFile,
};
use crate::progress::{file_progress_event, file_result, AggregatorHandle, ProgressCallback};
use crate::uploader::Uploader;

pub struct PipelineOptions {
    pub strict: bool,
    pub delete_remote: bool,
}

/// Connects with bounded retry and exponential backoff: attempts
/// `1..retry`, waiting `1000 * 2^(n-1)` ms between attempts. Retry is
/// skipped entirely for `AuthError`.
pub fn connect_with_retry(driver: &mut dyn Uploader, retry: usize) -> Result<(), UploadError> {
    let attempts = retry.max(1);
    let mut last_err = None;
    for attempt in 1..=attempts {
        match driver.connect() {
            Ok(()) => return Ok(()),
            Err(UploadError::Auth(msg)) => return Err(UploadError::Auth(msg)),
            Err(e) => {
                warn!(attempt, error = %e, "connect attempt failed");
                last_err = Some(e);
                if attempt < attempts {
                    let wait_ms = 1000u64.saturating_mul(1u64 << (attempt - 1));
                    thread::sleep(Duration::from_millis(wait_ms));
                }
            }
        }
    }
    Err(UploadError::Connection(format!(
        "connection failed after {attempts} attempt(s): {}",
        last_err.map(|e| e.to_string()).unwrap_or_default()
    )))
}

/// Runs the full per-target pipeline against an already-planned file
/// list (mirror deletions, if any, already appended by the caller).
pub fn run_target(
    target_index: usize,
    total_targets: usize,
    target: &TargetConfig,
    files: &[UploadFile],
    driver: &mut dyn Uploader,
    options: &PipelineOptions,
    mut aggregator: AggregatorHandle<'_>,
    mut on_progress: Option<&mut ProgressCallback<'_>>,
) {
    let id = target.identity();
    aggregator.init_target(id.clone(), &target.host, &target.dest);
    let start = Instant::now();

    aggregator.set_status(&id, TargetStatus::Connecting);
    emit(
        &mut aggregator,
        on_progress.as_deref_mut(),
        target_index,
        total_targets,
        target,
        0,
        files.len(),
        "",
        0,
        0,
        ProgressStatus::Connecting,
    );

    if let Err(e) = connect_with_retry(driver, target.retry) {
        aggregator.set_status(&id, TargetStatus::Failed);
        aggregator.set_error(&id, e.to_string());
        aggregator.set_duration(&id, start.elapsed());
        return;
    }

    aggregator.set_status(&id, TargetStatus::Uploading);

    let (to_delete, to_upload): (Vec<&UploadFile>, Vec<&UploadFile>) =
        files.iter().partition(|f| f.change_type == ChangeType::Delete);

    let mut had_fatal_failure = false;

    if options.delete_remote && target.sync_mode == crate::model::SyncMode::Mirror {
        for entry in &to_delete {
            match driver.delete(&entry.relative_path) {
                Ok(()) => {
                    aggregator.record_file_result(
                        &id,
                        file_result(&entry.relative_path, FileOutcome::Completed, 0, Duration::ZERO, None),
                    );
                }
                Err(e) => {
                    aggregator.record_file_result(
                        &id,
                        file_result(
                            &entry.relative_path,
                            FileOutcome::Failed,
                            0,
                            Duration::ZERO,
                            Some(e.to_string()),
                        ),
                    );
                    if options.strict {
                        had_fatal_failure = true;
                        break;
                    }
                }
            }
        }
    }

    if !had_fatal_failure && !to_upload.is_empty() {
        if has_bulk_upload(driver) {
            emit(
                &mut aggregator,
                on_progress.as_deref_mut(),
                target_index,
                total_targets,
                target,
                0,
                to_upload.len(),
                "(bulk)",
                0,
                0,
                ProgressStatus::Uploading,
            );
            let owned: Vec<(UploadFile, String)> =
                to_upload.iter().map(|f| ((*f).clone(), f.relative_path.clone())).collect();
            let bulk = driver.as_bulk_upload().expect("has_bulk_upload checked above");
            match bulk.bulk_upload(&owned, &mut |_, _| {}) {
                Ok(result) if result.failed_count == 0 => {
                    let per_file = result.duration / (to_upload.len() as u32).max(1);
                    for f in &to_upload {
                        aggregator.record_file_result(
                            &id,
                            file_result(&f.relative_path, FileOutcome::Completed, f.size, per_file, None),
                        );
                    }
                }
                Ok(_) => {
                    for f in &to_upload {
                        aggregator.record_file_result(
                            &id,
                            file_result(
                                &f.relative_path,
                                FileOutcome::Failed,
                                f.size,
                                Duration::ZERO,
                                Some("Bulk upload failed".to_string()),
                            ),
                        );
                    }
                    had_fatal_failure = options.strict;
                }
                Err(e) => {
                    for f in &to_upload {
                        aggregator.record_file_result(
                            &id,
                            file_result(
                                &f.relative_path,
                                FileOutcome::Failed,
                                f.size,
                                Duration::ZERO,
                                Some(e.to_string()),
                            ),
                        );
                    }
                    had_fatal_failure = options.strict;
                }
            }
        } else {
            for (file_index, file) in to_upload.iter().enumerate() {
                emit(
                    &mut aggregator,
                    on_progress.as_deref_mut(),
                    target_index,
                    total_targets,
                    target,
                    file_index,
                    to_upload.len(),
                    &file.relative_path,
                    0,
                    file.size,
                    ProgressStatus::Uploading,
                );
                let file_start = Instant::now();
                let rel_path = file.relative_path.clone();
                let upload_result =
                    driver.upload(file, &rel_path, &mut |_transferred, _total| {});
                match upload_result {
                    Ok(()) => {
                        aggregator.record_file_result(
                            &id,
                            file_result(&rel_path, FileOutcome::Completed, file.size, file_start.elapsed(), None),
                        );
                    }
                    Err(e) => {
                        debug!(path = %rel_path, error = %e, "upload failed");
                        aggregator.record_file_result(
                            &id,
                            file_result(
                                &rel_path,
                                FileOutcome::Failed,
                                file.size,
                                file_start.elapsed(),
                                Some(e.to_string()),
                            ),
                        );
                        if options.strict {
                            had_fatal_failure = true;
                            break;
                        }
                    }
                }
            }
        }
    }

    driver.disconnect();

    let final_status = if aggregator.has_failed_files(&id) || had_fatal_failure {
        TargetStatus::Failed
    } else {
        TargetStatus::Completed
    };
    aggregator.set_status(&id, final_status);
    aggregator.set_duration(&id, start.elapsed());
    if final_status == TargetStatus::Completed {
        info!(host = %target.host, dest = %target.dest, elapsed = ?start.elapsed(), "target completed");
    }
}

#[allow(clippy::too_many_arguments)]
fn emit(
    aggregator: &mut AggregatorHandle<'_>,
    callback: Option<&mut ProgressCallback<'_>>,
    target_index: usize,
    total_targets: usize,
    target: &TargetConfig,
    file_index: usize,
    total_files: usize,
    current_file: &str,
    bytes_transferred: u64,
    file_size: u64,
    status: ProgressStatus,
) {
    let event = file_progress_event(
        target_index,
        total_targets,
        &target.host,
        Some(&target.dest),
        file_index,
        total_files,
        current_file,
        bytes_transferred,
        file_size,
        status,
    );
    aggregator.emit_progress(event, callback);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Auth, ContentSource, Protocol, ProtocolOptions, SyncMode};
    use crate::uploader::local::LocalUploader;

    fn target_config(dest: std::path::PathBuf) -> TargetConfig {
        TargetConfig {
            host: "localhost".into(),
            port: 0,
            user: None,
            protocol: Protocol::Local,
            dest: dest.to_string_lossy().into_owned(),
            auth: Auth::None,
            sync_mode: SyncMode::Update,
            preserve_permissions: false,
            preserve_timestamps: false,
            timeout_secs: 5,
            retry: 1,
            ignore: vec![],
            protocol_options: ProtocolOptions::default(),
        }
    }

    #[test]
    fn spec_scenario_empty_file_list_completes() {
        let dir = tempfile::tempdir().unwrap();
        let target = target_config(dir.path().to_path_buf());
        let mut driver = LocalUploader::new(dir.path().to_path_buf(), false);
        let mut agg = ProgressAggregator::new();
        run_target(
            0,
            1,
            &target,
            &[],
            &mut driver,
            &PipelineOptions { strict: false, delete_remote: false },
            AggregatorHandle::Direct(&mut agg),
            None,
        );
        let result = agg.finish();
        assert_eq!(result.targets[0].status, TargetStatus::Completed);
    }

    #[test]
    fn all_files_succeed_on_local_driver() {
        let dir = tempfile::tempdir().unwrap();
        let target = target_config(dir.path().to_path_buf());
        let mut driver = LocalUploader::new(dir.path().to_path_buf(), false);
        let files = vec![
            UploadFile {
                relative_path: "x".into(),
                size: 3,
                is_directory: false,
                change_type: ChangeType::Add,
                source: Some(ContentSource::Bytes(vec![1, 2, 3])),
            },
            UploadFile {
                relative_path: "y".into(),
                size: 5,
                is_directory: false,
                change_type: ChangeType::Add,
                source: Some(ContentSource::Bytes(vec![1, 2, 3, 4, 5])),
            },
        ];
        let mut agg = ProgressAggregator::new();
        run_target(
            0,
            1,
            &target,
            &files,
            &mut driver,
            &PipelineOptions { strict: false, delete_remote: false },
            AggregatorHandle::Direct(&mut agg),
            None,
        );
        let result = agg.finish();
        assert_eq!(result.targets[0].status, TargetStatus::Completed);
        assert_eq!(result.total_files, 2);
        assert_eq!(result.total_size, 8);
        assert!(dir.path().join("x").exists());
        assert!(dir.path().join("y").exists());
    }

    #[test]
    fn strict_mode_aborts_target_on_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let target = target_config(dir.path().join("readonly-missing"));
        // Force a failure: source path does not exist on disk.
        let files = vec![UploadFile {
            relative_path: "missing".into(),
            size: 3,
            is_directory: false,
            change_type: ChangeType::Add,
            source: Some(ContentSource::Path("/does/not/exist".into())),
        }];
        let mut driver = LocalUploader::new(dir.path().join("readonly-missing"), false);
        let mut agg = ProgressAggregator::new();
        run_target(
            0,
            1,
            &target,
            &files,
            &mut driver,
            &PipelineOptions { strict: true, delete_remote: false },
            AggregatorHandle::Direct(&mut agg),
            None,
        );
        let result = agg.finish();
        assert_eq!(result.targets[0].status, TargetStatus::Failed);
    }
}
