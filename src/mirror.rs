//! Mirror planner: reconciles a local file set with a listed
//! remote file set into synthetic `delete` entries.

use crate::error::MirrorError;
use crate::ignore::IgnoreMatcher;
use crate::model::UploadFile;
use crate::uploader::Uploader;

/// Detects the mirror root: if every local `relative_path`
/// shares a common top-level directory, that directory is the mirror
/// root; otherwise the whole destination is the root (represented here
/// as `None`).
pub fn mirror_base_directory(files: &[UploadFile]) -> Option<String> {
    let mut top_levels = files.iter().filter_map(|f| f.relative_path.split('/').next());
    let first = top_levels.next()?;
    if files.iter().all(|f| f.relative_path.starts_with(&format!("{first}/")) || f.relative_path == first)
        && top_levels.all(|t| t == first)
    {
        Some(first.to_string())
    } else {
        None
    }
}

/// Plans mirror-mode deletions: appends a `delete` entry for every
/// remote path not present locally and not ignored.
pub fn plan_mirror_deletions(
    local_files: &[UploadFile],
    driver: &mut dyn Uploader,
    ignore: &IgnoreMatcher,
) -> Result<Vec<UploadFile>, MirrorError> {
    let lister = driver
        .as_lister()
        .ok_or_else(|| MirrorError::ListingUnsupported("target".to_string()))?;
    let remote_files =
        lister.list_remote_files().map_err(|e| MirrorError::ListingFailed(e.to_string()))?;

    let root = mirror_base_directory(local_files);
    let local_set: std::collections::HashSet<&str> =
        local_files.iter().map(|f| f.relative_path.as_str()).collect();

    let mut plan = local_files.to_vec();
    for remote_path in remote_files {
        let relativized = match &root {
            Some(prefix) => {
                let with_slash = format!("{prefix}/");
                if remote_path == *prefix || remote_path.starts_with(&with_slash) {
                    remote_path.clone()
                } else {
                    // Outside the inferred mirror root entirely: not ours to delete.
                    continue;
                }
            }
            None => remote_path.clone(),
        };
        if local_set.contains(relativized.as_str()) {
            continue;
        }
        if ignore.matches(&relativized) {
            continue;
        }
        plan.push(UploadFile::delete(relativized));
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChangeType;
    use crate::uploader::local::LocalUploader;

    fn file(path: &str) -> UploadFile {
        UploadFile {
            relative_path: path.into(),
            size: 0,
            is_directory: false,
            change_type: ChangeType::Modify,
            source: Some(crate::model::ContentSource::Bytes(vec![])),
        }
    }

    #[test]
    fn spec_scenario_mirror_planner_with_ignore() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), b"old").unwrap();
        std::fs::write(dir.path().join("old.html"), b"stale").unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/config"), b"x").unwrap();
        std::fs::write(dir.path().join(".DS_Store"), b"x").unwrap();

        let mut driver = LocalUploader::new(dir.path().to_path_buf(), false);
        let ignore = IgnoreMatcher::compile(&[".git/**".to_string(), ".DS_Store".to_string()]);
        let local = vec![file("index.html")];
        let plan = plan_mirror_deletions(&local, &mut driver, &ignore).unwrap();

        let deletes: Vec<&str> = plan
            .iter()
            .filter(|f| f.change_type == ChangeType::Delete)
            .map(|f| f.relative_path.as_str())
            .collect();
        assert_eq!(deletes, vec!["old.html"]);
    }

    #[test]
    fn mirror_base_directory_detects_common_top_level() {
        let files = vec![file("dist/a.js"), file("dist/sub/b.js")];
        assert_eq!(mirror_base_directory(&files), Some("dist".to_string()));

        let mixed = vec![file("dist/a.js"), file("other/b.js")];
        assert_eq!(mirror_base_directory(&mixed), None);
    }

    #[test]
    fn listing_unsupported_driver_errors() {
        struct NoList;
        impl Uploader for NoList {
            fn connect(&mut self) -> Result<(), crate::error::UploadError> {
                Ok(())
            }
            fn disconnect(&mut self) {}
            fn mkdir(&mut self, _: &str) -> Result<(), crate::error::UploadError> {
                Ok(())
            }
            fn upload(
                &mut self,
                _: &UploadFile,
                _: &str,
                _: &mut crate::uploader::Progress<'_>,
            ) -> Result<(), crate::error::UploadError> {
                Ok(())
            }
            fn delete(&mut self, _: &str) -> Result<(), crate::error::UploadError> {
                Ok(())
            }
            fn read_file(
                &mut self,
                _: &str,
            ) -> Result<Option<crate::model::RemoteFileContent>, crate::error::UploadError> {
                Ok(None)
            }
        }
        let mut driver = NoList;
        let ignore = IgnoreMatcher::compile(&[]);
        let result = plan_mirror_deletions(&[], &mut driver, &ignore);
        assert!(matches!(result, Err(MirrorError::ListingUnsupported(_))));
    }
}
