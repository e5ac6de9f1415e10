//! Progress aggregator: per-target file counters, statuses, and
//! event fan-out to the UI/TTY. Takes the batching idea from
//! `transfer/workers/mod.rs::Throttler` and extends it to own the
//! canonical per-target state instead of only pacing a progress bar.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use indexmap::IndexMap;

use crate::model::{
    FileOutcome, FileResult, ProgressEvent, ProgressStatus, TargetIdentity, TargetResult,
    TargetStatus, UploadResult,
};

pub type ProgressCallback<'a> = dyn FnMut(&ProgressEvent) + Send + 'a;

/// Owns `Map<targetId, TargetResult>` with insertion order preserved
/// plus the wall-clock start used for `totalDuration`.
pub struct ProgressAggregator {
    targets: IndexMap<TargetIdentity, TargetResult>,
    start: Instant,
}

impl ProgressAggregator {
    pub fn new() -> Self {
        Self { targets: IndexMap::new(), start: Instant::now() }
    }

    /// `initTarget`: registers a target at `pending`, preserving
    /// declaration order even for targets with nothing to do.
    pub fn init_target(&mut self, id: TargetIdentity, host: &str, dest: &str) {
        self.targets.entry(id).or_insert_with(|| TargetResult::pending(host, dest));
    }

    pub fn set_status(&mut self, id: &TargetIdentity, status: TargetStatus) {
        if let Some(t) = self.targets.get_mut(id) {
            t.status = status;
        }
    }

    pub fn set_error(&mut self, id: &TargetIdentity, error: impl Into<String>) {
        if let Some(t) = self.targets.get_mut(id) {
            t.error = Some(error.into());
        }
    }

    /// `recordFileResult`: mutates the per-target file list and
    /// increments counters.
    pub fn record_file_result(&mut self, id: &TargetIdentity, result: FileResult) {
        if let Some(t) = self.targets.get_mut(id) {
            t.record_file(result);
        }
    }

    pub fn set_duration(&mut self, id: &TargetIdentity, duration: Duration) {
        if let Some(t) = self.targets.get_mut(id) {
            t.duration = duration;
        }
    }

    /// `updateFileProgress`: callback-only, no persisted per-byte state.
    pub fn emit_progress(&self, event: ProgressEvent, callback: Option<&mut ProgressCallback<'_>>) {
        if let Some(cb) = callback {
            cb(&event);
        }
    }

    pub fn target(&self, id: &TargetIdentity) -> Option<&TargetResult> {
        self.targets.get(id)
    }

    /// Final aggregate: `successTargets`/`failedTargets` count by
    /// status; `totalFiles`/`totalSize` sum only completed files;
    /// `totalDuration = now - start`.
    pub fn finish(self) -> UploadResult {
        let elapsed = self.start.elapsed();
        let targets: Vec<TargetResult> = self.targets.into_values().collect();
        UploadResult::from_targets(targets, elapsed)
    }
}

impl Default for ProgressAggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregator access for `pipeline::run_target`: sequential fan-out
/// passes a plain borrow, parallel fan-out passes a shared handle so
/// the mutex is locked only for the duration of each individual
/// mutation rather than for a whole target's pipeline run.
pub enum AggregatorHandle<'a> {
    Direct(&'a mut ProgressAggregator),
    Shared(Arc<Mutex<ProgressAggregator>>),
}

impl<'a> AggregatorHandle<'a> {
    pub fn init_target(&mut self, id: TargetIdentity, host: &str, dest: &str) {
        match self {
            Self::Direct(a) => a.init_target(id, host, dest),
            Self::Shared(a) => {
                a.lock().expect("progress aggregator mutex poisoned").init_target(id, host, dest)
            }
        }
    }

    pub fn set_status(&mut self, id: &TargetIdentity, status: TargetStatus) {
        match self {
            Self::Direct(a) => a.set_status(id, status),
            Self::Shared(a) => {
                a.lock().expect("progress aggregator mutex poisoned").set_status(id, status)
            }
        }
    }

    pub fn set_error(&mut self, id: &TargetIdentity, error: impl Into<String>) {
        match self {
            Self::Direct(a) => a.set_error(id, error),
            Self::Shared(a) => {
                a.lock().expect("progress aggregator mutex poisoned").set_error(id, error)
            }
        }
    }

    pub fn record_file_result(&mut self, id: &TargetIdentity, result: FileResult) {
        match self {
            Self::Direct(a) => a.record_file_result(id, result),
            Self::Shared(a) => {
                a.lock().expect("progress aggregator mutex poisoned").record_file_result(id, result)
            }
        }
    }

    pub fn set_duration(&mut self, id: &TargetIdentity, duration: Duration) {
        match self {
            Self::Direct(a) => a.set_duration(id, duration),
            Self::Shared(a) => {
                a.lock().expect("progress aggregator mutex poisoned").set_duration(id, duration)
            }
        }
    }

    pub fn emit_progress(&mut self, event: ProgressEvent, callback: Option<&mut ProgressCallback<'_>>) {
        match self {
            Self::Direct(a) => a.emit_progress(event, callback),
            Self::Shared(a) => {
                a.lock().expect("progress aggregator mutex poisoned").emit_progress(event, callback)
            }
        }
    }

    /// Whether the target currently has any recorded file failure.
    pub fn has_failed_files(&mut self, id: &TargetIdentity) -> bool {
        match self {
            Self::Direct(a) => a.target(id).is_some_and(|t| t.failed_count > 0),
            Self::Shared(a) => a
                .lock()
                .expect("progress aggregator mutex poisoned")
                .target(id)
                .is_some_and(|t| t.failed_count > 0),
        }
    }
}

/// Builds a `connecting`/`uploading`/`completed`/`failed` progress
/// event for one file within a target's sequence.
pub fn file_progress_event(
    target_index: usize,
    total_targets: usize,
    host: &str,
    dest: Option<&str>,
    file_index: usize,
    total_files: usize,
    current_file: &str,
    bytes_transferred: u64,
    file_size: u64,
    status: ProgressStatus,
) -> ProgressEvent {
    ProgressEvent {
        target_index,
        total_targets,
        host: host.to_string(),
        dest: dest.map(str::to_string),
        file_index,
        total_files,
        current_file: current_file.to_string(),
        bytes_transferred,
        file_size,
        status,
    }
}

pub fn file_result(
    relative_path: impl Into<String>,
    outcome: FileOutcome,
    size: u64,
    duration: Duration,
    error: Option<String>,
) -> FileResult {
    FileResult { relative_path: relative_path.into(), outcome, size, duration, error }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TargetIdentity;

    fn id(n: u16) -> TargetIdentity {
        TargetIdentity { host: "h".into(), port: n, dest: "/d".into() }
    }

    #[test]
    fn insertion_order_preserved_even_for_empty_targets() {
        let mut agg = ProgressAggregator::new();
        agg.init_target(id(1), "h1", "/d1");
        agg.init_target(id(2), "h2", "/d2");
        agg.set_status(&id(1), TargetStatus::Completed);
        agg.set_status(&id(2), TargetStatus::Completed);
        let result = agg.finish();
        assert_eq!(result.targets[0].host, "h1");
        assert_eq!(result.targets[1].host, "h2");
    }

    #[test]
    fn aggregate_counts_only_completed_files() {
        let mut agg = ProgressAggregator::new();
        agg.init_target(id(1), "h1", "/d1");
        agg.set_status(&id(1), TargetStatus::Completed);
        agg.record_file_result(
            &id(1),
            file_result("a", FileOutcome::Completed, 10, Duration::from_millis(1), None),
        );
        agg.record_file_result(
            &id(1),
            file_result("b", FileOutcome::Failed, 20, Duration::from_millis(1), Some("x".into())),
        );
        let result = agg.finish();
        assert_eq!(result.total_files, 1);
        assert_eq!(result.total_size, 10);
        assert_eq!(result.success_targets, 1);
    }

    #[test]
    fn empty_target_list_yields_zero_aggregate() {
        let agg = ProgressAggregator::new();
        let result = agg.finish();
        assert_eq!(result.success_targets, 0);
        assert_eq!(result.failed_targets, 0);
        assert_eq!(result.total_files, 0);
    }
}
