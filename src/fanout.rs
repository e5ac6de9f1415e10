//! Fan-out executor: parallel or sequential dispatch across
//! targets with strict/lenient aggregation. Generalized from
//! `transfer.rs::handle_ts`'s single-direction worker-channel fan-out
//! to per-target driver construction plus the pipeline in `pipeline.rs`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;

use crate::model::{TargetConfig, TargetStatus, UploadFile, UploadResult};
use crate::pipeline::{run_target, PipelineOptions};
use crate::progress::{AggregatorHandle, ProgressAggregator, ProgressCallback};
use crate::uploader::Uploader;

pub struct FanoutOptions {
    pub parallel: bool,
    pub strict: bool,
    pub delete_remote: bool,
}

/// Builds a driver for a target; the caller supplies this so fan-out
/// stays agnostic to the concrete transport construction (auth lookup,
/// ssh option building, etc. live in `main.rs`).
pub type DriverFactory = dyn Fn(&TargetConfig) -> Box<dyn Uploader + Send> + Send + Sync;

/// Runs every target to completion and returns the aggregate result.
/// `files_by_target` maps a target's identity string (`host:port:dest`)
/// to its effective file list; targets with no entry get an empty list
/// but are still initialized for consistent indexing.
pub fn run_fanout(
    targets: &[TargetConfig],
    base_files: &[UploadFile],
    files_by_target: &HashMap<String, Vec<UploadFile>>,
    options: &FanoutOptions,
    build_driver: &DriverFactory,
    mut on_progress: Option<&mut ProgressCallback<'_>>,
) -> UploadResult {
    let mut aggregator = ProgressAggregator::new();
    let total_targets = targets.len();

    // Pre-initialize every target so indices are assigned deterministically
    // from declaration order, in both sequential and parallel mode.
    for target in targets {
        aggregator.init_target(target.identity(), &target.host, &target.dest);
    }

    if !options.parallel {
        for (index, target) in targets.iter().enumerate() {
            let files = effective_files(target, base_files, files_by_target);
            let mut driver = build_driver(target);
            let pipeline_opts =
                PipelineOptions { strict: options.strict, delete_remote: options.delete_remote };
            run_target(
                index,
                total_targets,
                target,
                &files,
                driver.as_mut(),
                &pipeline_opts,
                AggregatorHandle::Direct(&mut aggregator),
                on_progress.as_deref_mut(),
            );
            if options.strict
                && aggregator.target(&target.identity()).map(|t| t.status) == Some(TargetStatus::Failed)
            {
                break;
            }
        }
        return aggregator.finish();
    }

    // Parallel mode: launch all pipelines concurrently, joining at the end.
    // The progress aggregator is shared behind a mutex, but each target's
    // thread only locks it for the duration of an individual mutation
    // (`AggregatorHandle::Shared`), not for the whole connect/upload/
    // disconnect run — otherwise the mutex would serialize every
    // "parallel" target behind whichever one holds it first.
    let shared = Arc::new(Mutex::new(aggregator));
    thread::scope(|scope| {
        let mut handles = Vec::new();
        for (index, target) in targets.iter().enumerate() {
            let files = effective_files(target, base_files, files_by_target);
            let handle = AggregatorHandle::Shared(Arc::clone(&shared));
            let pipeline_opts =
                PipelineOptions { strict: options.strict, delete_remote: options.delete_remote };
            handles.push(scope.spawn(move || {
                let mut driver = build_driver(target);
                run_target(
                    index,
                    total_targets,
                    target,
                    &files,
                    driver.as_mut(),
                    &pipeline_opts,
                    handle,
                    None,
                );
            }));
        }
        for handle in handles {
            let _ = handle.join();
        }
    });

    Arc::into_inner(shared)
        .expect("all scoped threads joined, no outstanding Arc clones")
        .into_inner()
        .expect("progress aggregator mutex poisoned")
        .finish()
}

fn effective_files(
    target: &TargetConfig,
    base_files: &[UploadFile],
    files_by_target: &HashMap<String, Vec<UploadFile>>,
) -> Vec<UploadFile> {
    files_by_target.get(&target.identity().to_string()).cloned().unwrap_or_else(|| base_files.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Auth, ChangeType, ContentSource, Protocol, ProtocolOptions, SyncMode};
    use crate::uploader::local::LocalUploader;

    fn target(host: &str, dest: std::path::PathBuf) -> TargetConfig {
        TargetConfig {
            host: host.into(),
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

    fn local_driver_factory() -> Box<DriverFactory> {
        Box::new(|t: &TargetConfig| {
            Box::new(LocalUploader::new(std::path::PathBuf::from(&t.dest), false)) as Box<dyn Uploader + Send>
        })
    }

    #[test]
    fn spec_scenario_empty_target_list_yields_zero_aggregate() {
        let result = run_fanout(
            &[],
            &[],
            &HashMap::new(),
            &FanoutOptions { parallel: false, strict: false, delete_remote: false },
            &local_driver_factory(),
            None,
        );
        assert_eq!(result.success_targets, 0);
        assert_eq!(result.failed_targets, 0);
    }

    #[test]
    fn spec_scenario_sequential_two_target_all_success() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        let targets = vec![target("A", dir_a.path().to_path_buf()), target("B", dir_b.path().to_path_buf())];
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
        let result = run_fanout(
            &targets,
            &files,
            &HashMap::new(),
            &FanoutOptions { parallel: false, strict: false, delete_remote: false },
            &local_driver_factory(),
            None,
        );
        assert_eq!(result.success_targets, 2);
        assert_eq!(result.failed_targets, 0);
        assert_eq!(result.total_files, 4);
        assert_eq!(result.total_size, 16);
        assert!(dir_a.path().join("x").exists());
        assert!(dir_b.path().join("y").exists());
    }

    #[test]
    fn strict_sequential_short_circuits_after_first_failure() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        let targets = vec![target("A", dir_a.path().to_path_buf()), target("B", dir_b.path().to_path_buf())];
        let files = vec![UploadFile {
            relative_path: "missing".into(),
            size: 3,
            is_directory: false,
            change_type: ChangeType::Add,
            source: Some(ContentSource::Path("/does/not/exist".into())),
        }];
        let result = run_fanout(
            &targets,
            &files,
            &HashMap::new(),
            &FanoutOptions { parallel: false, strict: true, delete_remote: false },
            &local_driver_factory(),
            None,
        );
        assert_eq!(result.failed_targets, 1);
        assert_eq!(result.success_targets, 0);
        // B never ran: its status is still `pending`, not recorded as completed.
        assert_eq!(result.targets[1].status, TargetStatus::Pending);
    }

    #[test]
    fn parallel_mode_runs_all_targets() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        let targets = vec![target("A", dir_a.path().to_path_buf()), target("B", dir_b.path().to_path_buf())];
        let result = run_fanout(
            &targets,
            &[],
            &HashMap::new(),
            &FanoutOptions { parallel: true, strict: false, delete_remote: false },
            &local_driver_factory(),
            None,
        );
        assert_eq!(result.success_targets, 2);
    }

    /// A driver wrapping `LocalUploader` that tracks how many targets are
    /// concurrently connected, to catch a regression back to the
    /// aggregator mutex being held for a whole target's pipeline (which
    /// would serialize connects and collapse `max_observed` to 1).
    struct TrackedUploader {
        inner: LocalUploader,
        in_flight: std::sync::Arc<std::sync::atomic::AtomicUsize>,
        max_observed: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    }

    impl Uploader for TrackedUploader {
        fn connect(&mut self) -> Result<(), crate::error::UploadError> {
            use std::sync::atomic::Ordering;
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_observed.fetch_max(now, Ordering::SeqCst);
            thread::sleep(std::time::Duration::from_millis(40));
            self.inner.connect()
        }

        fn disconnect(&mut self) {
            self.inner.disconnect();
            self.in_flight.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
        }

        fn mkdir(&mut self, rel_path: &str) -> Result<(), crate::error::UploadError> {
            self.inner.mkdir(rel_path)
        }

        fn upload(
            &mut self,
            file: &UploadFile,
            rel_path: &str,
            on_progress: &mut crate::uploader::Progress<'_>,
        ) -> Result<(), crate::error::UploadError> {
            self.inner.upload(file, rel_path, on_progress)
        }

        fn delete(&mut self, rel_path: &str) -> Result<(), crate::error::UploadError> {
            self.inner.delete(rel_path)
        }

        fn read_file(
            &mut self,
            rel_path: &str,
        ) -> Result<Option<crate::model::RemoteFileContent>, crate::error::UploadError> {
            self.inner.read_file(rel_path)
        }
    }

    #[test]
    fn parallel_mode_overlaps_target_connects() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        let targets = vec![target("A", dir_a.path().to_path_buf()), target("B", dir_b.path().to_path_buf())];

        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_observed = Arc::new(AtomicUsize::new(0));
        let in_flight_for_factory = Arc::clone(&in_flight);
        let max_observed_for_factory = Arc::clone(&max_observed);
        let factory: Box<DriverFactory> = Box::new(move |t: &TargetConfig| {
            Box::new(TrackedUploader {
                inner: LocalUploader::new(std::path::PathBuf::from(&t.dest), false),
                in_flight: Arc::clone(&in_flight_for_factory),
                max_observed: Arc::clone(&max_observed_for_factory),
            }) as Box<dyn Uploader + Send>
        });

        let result = run_fanout(
            &targets,
            &[],
            &HashMap::new(),
            &FanoutOptions { parallel: true, strict: false, delete_remote: false },
            &factory,
            None,
        );
        assert_eq!(result.success_targets, 2);
        assert_eq!(
            max_observed.load(Ordering::SeqCst),
            2,
            "both targets should be connecting at once under parallel mode"
        );
    }
}
