//! Minimal `TargetConfig` loader. `ConfigLoader` in
//! `collaborators.rs` treats this as one interchangeable source among
//! several; this is the one the CLI ships with. Follows a
//! `Config::read_from`/`save_to` JSON read/write pattern,
//! simplified since there is no persisted schema to migrate here.

use std::path::Path;

use serde::Deserialize;

use crate::model::TargetConfig;

#[derive(Debug, Deserialize)]
struct TargetsFile {
    targets: Vec<TargetConfig>,
}

/// Reads a JSON array of targets (or an object with a `targets` key)
/// from `path`. Falls back to an empty set and a warning, rather than
/// panicking, when the file is missing — matching the usual
/// preference for a sane default over a hard failure on first run.
pub fn load_targets(path: &Path) -> anyhow::Result<Vec<TargetConfig>> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "targets file not found, proceeding with no targets");
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read targets file {}: {e}", path.display()))?;
    parse_targets(&raw)
}

fn parse_targets(raw: &str) -> anyhow::Result<Vec<TargetConfig>> {
    if let Ok(list) = serde_json::from_str::<Vec<TargetConfig>>(raw) {
        return Ok(list);
    }
    let wrapped: TargetsFile = serde_json::from_str(raw)
        .map_err(|e| anyhow::anyhow!("failed to parse targets file: {e}"))?;
    Ok(wrapped.targets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_array() {
        let json = r#"[{"host":"h1","protocol":"local","dest":"/out"}]"#;
        let targets = parse_targets(json).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].host, "h1");
        assert_eq!(targets[0].port, 22);
    }

    #[test]
    fn parses_wrapped_object() {
        let json = r#"{"targets":[{"host":"h2","protocol":"sftp","dest":"/srv"}]}"#;
        let targets = parse_targets(json).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].host, "h2");
    }

    #[test]
    fn missing_file_yields_empty_vec_not_error() {
        let result = load_targets(Path::new("/nonexistent/targets.json")).unwrap();
        assert!(result.is_empty());
    }
}
