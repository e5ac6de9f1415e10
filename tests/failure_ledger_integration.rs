//! End-to-end: a fan-out run with one failing file writes a structured
//! JSONL failure ledger, and a second run appends rather than clobbers
//! it. Exercises `fanout.rs`/`pipeline.rs` together with `util.rs`.

use std::collections::HashMap;

use dockhand::fanout::{run_fanout, DriverFactory, FanoutOptions};
use dockhand::model::{ChangeType, ContentSource, Protocol, TargetConfig, UploadFile};
use dockhand::uploader::local::LocalUploader;
use dockhand::uploader::Uploader;
use dockhand::util::write_failure_ledger;

fn target(dest: std::path::PathBuf) -> TargetConfig {
    TargetConfig {
        host: "fleet-a".into(),
        port: 0,
        user: None,
        protocol: Protocol::Local,
        dest: dest.to_string_lossy().into_owned(),
        auth: dockhand::model::Auth::None,
        sync_mode: dockhand::model::SyncMode::Update,
        preserve_permissions: false,
        preserve_timestamps: false,
        timeout_secs: 5,
        retry: 1,
        ignore: vec![],
        protocol_options: dockhand::model::ProtocolOptions::default(),
    }
}

fn local_driver_factory() -> Box<DriverFactory> {
    Box::new(|t: &TargetConfig| {
        Box::new(LocalUploader::new(std::path::PathBuf::from(&t.dest), false)) as Box<dyn Uploader + Send>
    })
}

#[test]
fn failed_files_are_appended_to_the_ledger_across_runs() {
    let dest = tempfile::tempdir().unwrap();
    let targets = vec![target(dest.path().to_path_buf())];
    let ledger = tempfile::tempdir().unwrap().keep().join("failures.jsonl");

    let good_and_bad = vec![
        UploadFile {
            relative_path: "ok.txt".into(),
            size: 2,
            is_directory: false,
            change_type: ChangeType::Add,
            source: Some(ContentSource::Bytes(b"ok".to_vec())),
        },
        UploadFile {
            relative_path: "missing.txt".into(),
            size: 9,
            is_directory: false,
            change_type: ChangeType::Add,
            source: Some(ContentSource::Path("/does/not/exist".into())),
        },
    ];

    let result = run_fanout(
        &targets,
        &good_and_bad,
        &HashMap::new(),
        &FanoutOptions { parallel: false, strict: false, delete_remote: false },
        &local_driver_factory(),
        None,
    );
    assert_eq!(result.targets[0].failed_count, 1);
    assert_eq!(result.targets[0].success_count, 1);

    write_failure_ledger(&ledger, &result.targets);
    assert!(ledger.exists());
    let first_pass = std::fs::read_to_string(&ledger).unwrap();
    assert_eq!(first_pass.lines().count(), 2, "one batch header + one failure line");
    assert!(first_pass.contains("missing.txt"));
    assert!(!first_pass.contains("\"path\":\"ok.txt\""));

    // A second failing run appends rather than clobbers.
    write_failure_ledger(&ledger, &result.targets);
    let second_pass = std::fs::read_to_string(&ledger).unwrap();
    assert_eq!(second_pass.lines().count(), 4);
}

#[test]
fn clean_run_never_creates_a_ledger_file() {
    let dest = tempfile::tempdir().unwrap();
    let targets = vec![target(dest.path().to_path_buf())];
    let ledger = tempfile::tempdir().unwrap().keep().join("failures.jsonl");

    let files = vec![UploadFile {
        relative_path: "a.txt".into(),
        size: 1,
        is_directory: false,
        change_type: ChangeType::Add,
        source: Some(ContentSource::Bytes(b"a".to_vec())),
    }];

    let result = run_fanout(
        &targets,
        &files,
        &HashMap::new(),
        &FanoutOptions { parallel: false, strict: false, delete_remote: false },
        &local_driver_factory(),
        None,
    );
    write_failure_ledger(&ledger, &result.targets);
    assert!(!ledger.exists());
}
