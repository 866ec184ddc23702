use crate::parsers::normalize_path;
use errorgraph_core::{ErrorGraphError, Result};
use ignore::{overrides::OverrideBuilder, WalkBuilder};
use std::path::Path;
use tracing::{debug, warn};

const DEFAULT_EXCLUDES: &[&str] = &[
    "!**/.git/**",
    "!**/__pycache__/**",
    "!**/.mypy_cache/**",
    "!**/.pytest_cache/**",
    "!**/.ruff_cache/**",
    "!**/.tox/**",
    "!**/.venv/**",
    "!**/venv/**",
    "!**/node_modules/**",
    "!**/build/**",
    "!**/dist/**",
];

/// Collects scannable files under `root/target`, honouring `.gitignore`.
///
/// `target` may be a file or a directory relative to `root` (empty or "." for the whole tree).
/// Returned paths are relative to `root` and sorted.
pub fn discover_files(root: &Path, target: &str, extensions: &[String]) -> Result<Vec<String>> {
    let target = target.trim();
    let start = if target.is_empty() || target == "." {
        root.to_path_buf()
    } else {
        root.join(target)
    };

    if start.is_file() {
        return Ok(vec![normalize_path(root, &start.to_string_lossy())]);
    }
    if !start.is_dir() {
        return Err(ErrorGraphError::NotFound(format!(
            "scan target {} does not exist",
            start.display()
        )));
    }

    let mut ovr = OverrideBuilder::new(root);
    for exclude in DEFAULT_EXCLUDES {
        let _ = ovr.add(exclude);
    }
    let overrides = ovr
        .build()
        .map_err(|e| ErrorGraphError::Config(format!("invalid exclude pattern: {e}")))?;

    let walker = WalkBuilder::new(&start)
        .hidden(false)
        .git_ignore(true)
        .git_exclude(true)
        .ignore(true)
        .overrides(overrides)
        .build();

    let mut files = Vec::new();
    for dent in walker {
        let dent = match dent {
            Ok(d) => d,
            Err(e) => {
                warn!("walker error: {}", e);
                continue;
            }
        };
        let path = dent.path();
        if !path.is_file() {
            continue;
        }
        let matches = extensions.is_empty()
            || path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| extensions.iter().any(|x| x.trim_start_matches('.') == ext));
        if matches {
            files.push(normalize_path(root, &path.to_string_lossy()));
        }
    }

    files.sort();
    debug!(root = %root.display(), target, files = files.len(), "discovered files");
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn walks_directory_and_filters_extensions() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("pkg/__pycache__")).unwrap();
        std::fs::write(dir.path().join("a.py"), "").unwrap();
        std::fs::write(dir.path().join("pkg/b.py"), "").unwrap();
        std::fs::write(dir.path().join("pkg/notes.txt"), "").unwrap();
        std::fs::write(dir.path().join("pkg/__pycache__/b.py"), "").unwrap();

        let files = discover_files(dir.path(), "", &["py".to_string()]).unwrap();
        assert_eq!(files, vec!["a.py".to_string(), "pkg/b.py".to_string()]);

        let single = discover_files(dir.path(), "pkg/b.py", &["py".to_string()]).unwrap();
        assert_eq!(single, vec!["pkg/b.py".to_string()]);

        assert!(discover_files(dir.path(), "missing", &[]).is_err());
    }
}
