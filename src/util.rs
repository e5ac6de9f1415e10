//! Small ambient helpers shared by the CLI binary: human-readable byte
//! formatting, TTY progress-bar setup, and the JSONL failure ledger.
//! Trimmed to what the CLI
//! surface actually needs (no SQLite-upgrade-era backoff globals).

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::model::{FileOutcome, TargetResult, UploadResult};

#[cfg(windows)]
pub fn try_enable_ansi_on_windows() -> bool {
    enable_ansi_support::enable_ansi_support().is_ok()
}

#[cfg(not(windows))]
pub fn try_enable_ansi_on_windows() -> bool {
    false
}

/// IEC units (KiB/MiB/GiB).
pub fn human_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    let b = bytes as f64;
    if b >= GB {
        format!("{:.2} GiB", b / GB)
    } else if b >= MB {
        format!("{:.2} MiB", b / MB)
    } else if b >= KB {
        format!("{:.2} KiB", b / KB)
    } else {
        format!("{bytes} B")
    }
}

/// One progress bar per in-flight target plus a shared `MultiProgress`,
/// following an `init_progress_and_mp`-style setup.
pub fn init_target_progress_bars(target_count: usize) -> (Arc<MultiProgress>, Vec<ProgressBar>) {
    let mp = Arc::new(MultiProgress::new());
    let style = ProgressStyle::with_template("{prefix:.bold} [{bar:30}] {pos}/{len} {msg}")
        .expect("valid progress template")
        .progress_chars("=> ");
    let bars: Vec<ProgressBar> = (0..target_count)
        .map(|i| {
            let bar = mp.add(ProgressBar::new(0));
            bar.set_style(style.clone());
            bar.set_prefix(format!("target {i}"));
            bar
        })
        .collect();
    let _ = try_enable_ansi_on_windows();
    (mp, bars)
}

/// Prints a concise one-line summary for the
/// full fan-out run.
pub fn print_summary(result: &UploadResult) {
    println!(
        "targets: {} ok, {} failed | files: {} ({}) | elapsed: {:.2}s",
        result.success_targets,
        result.failed_targets,
        result.total_files,
        human_bytes(result.total_size),
        result.total_duration.as_secs_f64(),
    );
    for target in &result.targets {
        println!(
            "  {} -> {}: {:?} ({} ok, {} failed, {} skipped)",
            target.host, target.dest, target.status, target.success_count, target.failed_count, target.skipped_count
        );
    }
}

/// Prints the optional single-line JSON summary under `--json`.
pub fn print_json_summary(result: &UploadResult) {
    if let Ok(line) = serde_json::to_string(result) {
        println!("{line}");
    }
}

/// Appends per-file failures as JSON Lines with a UTC-timestamped
/// batch header, following `write_failures_structured`'s append-only
/// approach so repeated runs accumulate a history rather than clobber it.
pub fn write_failure_ledger(path: &Path, targets: &[TargetResult]) {
    let failures: Vec<_> = targets
        .iter()
        .flat_map(|t| t.files.iter().map(move |f| (t, f)))
        .filter(|(_, f)| f.outcome == FileOutcome::Failed)
        .collect();
    if failures.is_empty() {
        return;
    }
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) else { return };
    let header = serde_json::json!({
        "batch_started_at": Utc::now().to_rfc3339(),
        "failure_count": failures.len(),
    });
    let _ = writeln!(file, "{header}");
    for (target, failure) in failures {
        let line = serde_json::json!({
            "host": target.host,
            "dest": target.dest,
            "path": failure.relative_path,
            "size": failure.size,
            "error": failure.error,
        });
        let _ = writeln!(file, "{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_bytes_picks_appropriate_unit() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(2048), "2.00 KiB");
        assert_eq!(human_bytes(5 * 1024 * 1024), "5.00 MiB");
    }

    #[test]
    fn write_failure_ledger_skips_when_nothing_failed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failures.jsonl");
        let mut target = TargetResult::pending("h", "/d");
        target.record_file(crate::model::FileResult {
            relative_path: "a".into(),
            outcome: FileOutcome::Completed,
            size: 1,
            duration: std::time::Duration::ZERO,
            error: None,
        });
        write_failure_ledger(&path, &[target]);
        assert!(!path.exists());
    }

    #[test]
    fn write_failure_ledger_appends_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failures.jsonl");
        let mut target = TargetResult::pending("h", "/d");
        target.record_file(crate::model::FileResult {
            relative_path: "a".into(),
            outcome: FileOutcome::Failed,
            size: 1,
            duration: std::time::Duration::ZERO,
            error: Some("boom".into()),
        });
        write_failure_ledger(&path, &[target]);
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
