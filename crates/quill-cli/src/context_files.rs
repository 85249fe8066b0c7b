//! Gathering task context files from `--file` glob patterns.

use anyhow::{Context, Result};
use quill_config::ContextConfig;
use quill_core::File;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Expand `patterns` against `workspace` and load the matching files.
///
/// Matches keep pattern order, then glob order; a path matched twice is kept
/// once. Directories are skipped. Files over `max_file_bytes` are skipped and
/// gathering stops before the total would exceed `max_total_bytes`. Paths in
/// the returned files are relative to the workspace where possible.
pub fn gather_context(
    workspace: &Path,
    patterns: &[String],
    limits: &ContextConfig,
) -> Result<Vec<File>> {
    let candidates = expand_patterns(workspace, patterns)?;
    let files = load_within_limits(&candidates, limits, File::load_content);
    Ok(files
        .into_iter()
        .map(|file| {
            let shown = file.path().strip_prefix(workspace).unwrap_or(file.path());
            File::with_content(shown, file.content().unwrap_or_default())
        })
        .collect())
}

/// Stat and `load` each path in order, keeping the size limits against both
/// the stat size and the size actually read.
fn load_within_limits(
    paths: &[PathBuf],
    limits: &ContextConfig,
    load: impl Fn(&File) -> Result<File>,
) -> Vec<File> {
    let mut files = Vec::with_capacity(paths.len());
    let mut total: u64 = 0;
    for path in paths {
        let file = match File::from_path(path) {
            Ok(file) => file,
            Err(e) => {
                warn!("Skipping {}: {:#}", path.display(), e);
                continue;
            }
        };
        if file.size() > limits.max_file_bytes {
            warn!(
                "Skipping {} ({} bytes exceeds the {} byte limit)",
                path.display(),
                file.size(),
                limits.max_file_bytes
            );
            continue;
        }
        if total + file.size() > limits.max_total_bytes {
            warn!(
                "Context limit of {} bytes reached; not including {} or later files",
                limits.max_total_bytes,
                path.display()
            );
            break;
        }

        let loaded = match load(&file) {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!("Skipping {}: {:#}", path.display(), e);
                continue;
            }
        };
        // The file may have changed since it was stat'ed
        if loaded.size() > limits.max_file_bytes {
            warn!("Skipping {}: grew to {} bytes while loading", path.display(), loaded.size());
            continue;
        }
        if total + loaded.size() > limits.max_total_bytes {
            warn!(
                "Context limit of {} bytes reached after {} grew to {} bytes",
                limits.max_total_bytes,
                path.display(),
                loaded.size()
            );
            break;
        }
        total += loaded.size();
        files.push(loaded);
    }

    debug!("Gathered {} context file(s), {} bytes", files.len(), total);
    files
}

fn expand_patterns(workspace: &Path, patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut seen = HashSet::new();
    let mut matches = Vec::new();

    for pattern in patterns {
        let full_pattern = workspace.join(pattern);
        let paths = glob::glob(&full_pattern.to_string_lossy())
            .with_context(|| format!("Invalid file pattern '{}'", pattern))?;

        let before = matches.len();
        for entry in paths {
            match entry {
                Ok(path) if path.is_dir() => continue,
                Ok(path) => {
                    if seen.insert(path.clone()) {
                        matches.push(path);
                    }
                }
                Err(e) => warn!("Cannot read {}: {}", e.path().display(), e.error()),
            }
        }
        if matches.len() == before {
            warn!("No new files match '{}'", pattern);
        }
    }

    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn limits(max_file_bytes: u64, max_total_bytes: u64) -> ContextConfig {
        ContextConfig {
            max_file_bytes,
            max_total_bytes,
        }
    }

    fn workspace() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        std::fs::write(dir.path().join("src/a.rs"), "fn a() {}\n").unwrap();
        std::fs::write(dir.path().join("src/b.rs"), "fn b() {}\n").unwrap();
        std::fs::write(dir.path().join("README.md"), "# Demo\n").unwrap();
        dir
    }

    fn paths(files: &[File]) -> Vec<String> {
        files
            .iter()
            .map(|f| f.path().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_pattern_order_then_glob_order_without_duplicates() {
        let dir = workspace();
        let patterns = vec![
            "README.md".to_string(),
            "src/*".to_string(),
            "src/a.rs".to_string(),
        ];

        let files = gather_context(dir.path(), &patterns, &ContextConfig::default()).unwrap();

        assert_eq!(paths(&files), vec!["README.md", "src/a.rs", "src/b.rs"]);
        assert!(files.iter().all(File::has_content));
        assert_eq!(files[1].content(), Some("fn a() {}\n"));
    }

    #[test]
    fn test_oversized_file_is_skipped() {
        let dir = workspace();
        std::fs::write(dir.path().join("src/big.rs"), "x".repeat(100)).unwrap();
        let patterns = vec!["src/*.rs".to_string()];

        let files = gather_context(dir.path(), &patterns, &limits(50, 1_000)).unwrap();

        assert_eq!(paths(&files), vec!["src/a.rs", "src/b.rs"]);
    }

    #[test]
    fn test_total_limit_stops_gathering() {
        let dir = workspace();
        let patterns = vec!["src/a.rs".to_string(), "src/b.rs".to_string(), "README.md".to_string()];

        // a.rs and b.rs are 10 bytes each
        let files = gather_context(dir.path(), &patterns, &limits(1_000, 15)).unwrap();

        assert_eq!(paths(&files), vec!["src/a.rs"]);
    }

    #[test]
    fn test_growth_after_stat_counts_against_total() {
        let dir = workspace();
        let candidates = vec![dir.path().join("src/a.rs"), dir.path().join("src/b.rs")];
        // Both stat at 10 bytes; b.rs reads back at 30
        let load = |file: &File| {
            if file.path().ends_with("b.rs") {
                Ok(File::with_content(file.path(), "x".repeat(30)))
            } else {
                file.load_content()
            }
        };

        let files = load_within_limits(&candidates, &limits(1_000, 25), load);
        assert_eq!(files.len(), 1);
        assert!(files[0].path().ends_with("a.rs"));

        let files = load_within_limits(&candidates, &limits(20, 1_000), load);
        assert_eq!(files.len(), 1);
        assert!(files[0].path().ends_with("a.rs"));
    }

    #[test]
    fn test_non_utf8_file_is_skipped() {
        let dir = workspace();
        std::fs::write(dir.path().join("src/blob.rs"), [0xff, 0xfe, 0x00]).unwrap();
        let patterns = vec!["src/blob.rs".to_string(), "src/b.rs".to_string()];

        let files = gather_context(dir.path(), &patterns, &ContextConfig::default()).unwrap();

        assert_eq!(paths(&files), vec!["src/b.rs"]);
    }

    #[test]
    fn test_unmatched_pattern_yields_nothing() {
        let dir = workspace();
        let files =
            gather_context(dir.path(), &["*.toml".to_string()], &ContextConfig::default()).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn test_invalid_pattern_is_an_error() {
        let dir = workspace();
        let result = gather_context(dir.path(), &["src/[".to_string()], &ContextConfig::default());
        assert!(result.is_err());
    }
}
