//! Lazy tree expansion: builds a `TreeNode` forest from a flat
//! diff file list, serving only root entries with `loaded=false` above
//! the lazy-loading threshold and computing a directory's direct
//! children on demand for `expand_directory`.

use crate::model::{DiffFile, DiffStatus, TreeNode, TreeNodeStatus, TreeNodeType};

pub const LAZY_LOADING_THRESHOLD: usize = 100;

fn to_tree_status(status: DiffStatus) -> TreeNodeStatus {
    match status {
        DiffStatus::A => TreeNodeStatus::A,
        DiffStatus::D => TreeNodeStatus::D,
        DiffStatus::M | DiffStatus::R | DiffStatus::C | DiffStatus::T => TreeNodeStatus::M,
        DiffStatus::U | DiffStatus::X => TreeNodeStatus::U,
    }
}

/// Builds the full tree eagerly (used when `files.len() <= threshold`).
pub fn build_full_tree(files: &[DiffFile]) -> Vec<TreeNode> {
    build_level(files, "")
}

/// Builds only the root-level entries, marking directories `loaded=false`.
pub fn build_root_only(files: &[DiffFile]) -> Vec<TreeNode> {
    let mut roots = build_level(files, "");
    for node in &mut roots {
        if node.node_type == TreeNodeType::Directory {
            node.loaded = Some(false);
            node.children = None;
        }
    }
    roots
}

/// Computes the direct children of `prefix` by filtering the full diff
/// set, for an `expand_directory` response.
pub fn expand_directory(files: &[DiffFile], prefix: &str) -> Vec<TreeNode> {
    build_level(files, prefix)
}

fn build_level(files: &[DiffFile], prefix: &str) -> Vec<TreeNode> {
    let prefix_with_slash = if prefix.is_empty() { String::new() } else { format!("{prefix}/") };

    let mut dirs: std::collections::BTreeMap<String, (Vec<DiffFile>, usize)> =
        std::collections::BTreeMap::new();
    let mut direct_files = Vec::new();

    for file in files {
        let Some(rest) = file.path.strip_prefix(&prefix_with_slash) else { continue };
        if rest.is_empty() {
            continue;
        }
        match rest.split_once('/') {
            Some((dir_name, _)) => {
                let entry = dirs.entry(dir_name.to_string()).or_insert_with(|| (Vec::new(), 0));
                entry.1 += 1;
                entry.0.push(file.clone());
            }
            None => direct_files.push(file.clone()),
        }
    }

    let mut nodes: Vec<TreeNode> = dirs
        .into_iter()
        .map(|(name, (nested, count))| {
            let path = format!("{prefix_with_slash}{name}");
            TreeNode {
                name,
                path: path.clone(),
                node_type: TreeNodeType::Directory,
                status: None,
                children: Some(build_level(&nested, &path)),
                loaded: Some(true),
                file_count: Some(count),
            }
        })
        .collect();

    nodes.extend(direct_files.into_iter().map(|file| {
        let name = file.path.rsplit('/').next().unwrap_or(&file.path).to_string();
        TreeNode {
            name,
            path: file.path.clone(),
            node_type: TreeNodeType::File,
            status: Some(to_tree_status(file.status)),
            children: None,
            loaded: None,
            file_count: None,
        }
    }));

    nodes.sort_by(|a, b| a.name.cmp(&b.name));
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diff(path: &str, status: DiffStatus) -> DiffFile {
        DiffFile { path: path.to_string(), status, old_path: None, similarity: None }
    }

    #[test]
    fn full_tree_nests_by_directory() {
        let files = vec![diff("src/main.rs", DiffStatus::M), diff("README.md", DiffStatus::A)];
        let tree = build_full_tree(&files);
        assert_eq!(tree.len(), 2);
        let src = tree.iter().find(|n| n.name == "src").unwrap();
        assert_eq!(src.node_type, TreeNodeType::Directory);
        assert_eq!(src.children.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn root_only_marks_directories_unloaded() {
        let files = vec![diff("src/main.rs", DiffStatus::M)];
        let tree = build_root_only(&files);
        let src = tree.iter().find(|n| n.name == "src").unwrap();
        assert_eq!(src.loaded, Some(false));
        assert!(src.children.is_none());
    }

    #[test]
    fn expand_directory_returns_direct_children_only() {
        let files =
            vec![diff("src/a.rs", DiffStatus::M), diff("src/nested/b.rs", DiffStatus::A)];
        let children = expand_directory(&files, "src");
        assert_eq!(children.len(), 2);
        assert!(children.iter().any(|n| n.name == "a.rs" && n.node_type == TreeNodeType::File));
        assert!(children.iter().any(|n| n.name == "nested" && n.node_type == TreeNodeType::Directory));
    }

    #[test]
    fn spec_boundary_lazy_threshold() {
        assert_eq!(LAZY_LOADING_THRESHOLD, 100);
    }
}
