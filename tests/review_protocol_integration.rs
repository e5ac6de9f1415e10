//! End-to-end: a filesystem diff collected by `FsDiffProvider` flows
//! through the lazy tree builder and out as the review server's `init`
//! wire frame, exercising `collaborators.rs`, `review::tree`, and
//! `review::protocol` together without spinning up the actual
//! websocket server.

use std::fs;

use dockhand::collaborators::{DiffProvider, FsDiffProvider};
use dockhand::review::protocol::{FileSummary, RemoteTargetSummary, ServerFrame, Summary, UploadButtonState};
use dockhand::review::tree::{build_full_tree, build_root_only, expand_directory, LAZY_LOADING_THRESHOLD};

#[test]
fn diff_collection_builds_root_tree_and_serializes_as_init_frame() {
    let base = tempfile::tempdir().unwrap();
    let target = tempfile::tempdir().unwrap();
    fs::create_dir_all(target.path().join("src")).unwrap();
    fs::write(target.path().join("src/main.rs"), b"fn main() {}").unwrap();
    fs::write(target.path().join("README.md"), b"docs").unwrap();

    let provider = FsDiffProvider::new(base.path().to_path_buf(), target.path().to_path_buf());
    let diff = provider.collect("working-tree", "local").unwrap();
    assert_eq!(diff.summary.added, 2);

    let tree = build_root_only(&diff.files);
    let src_dir = tree.iter().find(|n| n.name == "src").unwrap();
    assert_eq!(src_dir.loaded, Some(false));
    assert!(src_dir.children.is_none());

    let files: Vec<FileSummary> = diff
        .files
        .iter()
        .map(|f| FileSummary { path: f.path.clone(), status: f.status, old_path: f.old_path.clone() })
        .collect();

    let frame = ServerFrame::Init {
        base: diff.base.clone(),
        target: diff.target.clone(),
        diff_mode: true,
        files,
        summary: Summary {
            added: diff.summary.added,
            modified: diff.summary.modified,
            deleted: diff.summary.deleted,
            renamed: diff.summary.renamed,
            total: diff.files.len(),
        },
        remote_targets: vec![RemoteTargetSummary { host: "h1".into(), dest: "/srv".into() }],
        tree: Some(tree),
        lazy_loading: diff.files.len() > LAZY_LOADING_THRESHOLD,
        upload_button_state: Some(UploadButtonState::Enabled),
    };

    let json = serde_json::to_value(&frame).unwrap();
    assert_eq!(json["type"], "init");
    assert_eq!(json["summary"]["total"], 2);
    assert_eq!(json["tree"][0]["loaded"], false);
}

#[test]
fn expand_directory_matches_full_tree_subtree() {
    let base = tempfile::tempdir().unwrap();
    let target = tempfile::tempdir().unwrap();
    fs::create_dir_all(target.path().join("src/nested")).unwrap();
    fs::write(target.path().join("src/a.rs"), b"a").unwrap();
    fs::write(target.path().join("src/nested/b.rs"), b"b").unwrap();

    let provider = FsDiffProvider::new(base.path().to_path_buf(), target.path().to_path_buf());
    let diff = provider.collect("base", "target").unwrap();

    let full = build_full_tree(&diff.files);
    let src_full = full.iter().find(|n| n.name == "src").unwrap();
    let expanded = expand_directory(&diff.files, "src");

    assert_eq!(src_full.children.as_ref().unwrap().len(), expanded.len());
    assert!(expanded.iter().any(|n| n.name == "a.rs"));
    assert!(expanded.iter().any(|n| n.name == "nested"));
}
