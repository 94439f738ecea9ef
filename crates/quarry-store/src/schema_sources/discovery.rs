//! Discovery of extension schema sources

use std::collections::HashSet;
use std::path::{Path, PathBuf};

const SOURCE_PREFIX: &str = "metrics";
const SOURCE_EXTENSION: &str = "sql";

/// Whether a file name looks like an extension schema source
pub fn is_schema_source(path: &Path) -> bool {
    let has_prefix = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(SOURCE_PREFIX));
    let has_extension = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(SOURCE_EXTENSION));
    has_prefix && has_extension
}

/// Find schema sources in `dirs`, in directory order then file name order
///
/// A file name already found in an earlier directory is skipped. Missing or
/// unreadable directories are logged and skipped.
pub fn discover_schema_sources(dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut seen: HashSet<std::ffi::OsString> = HashSet::new();
    let mut found = Vec::new();

    for dir in dirs {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(
                    component = "quarry_store",
                    op = "discover_schema_sources",
                    dir = %dir.display(),
                    error = %e,
                    "Skipping unreadable extension directory"
                );
                continue;
            }
        };

        let mut candidates: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_schema_source(path))
            .collect();
        candidates.sort();

        for path in candidates {
            let Some(name) = path.file_name().map(|n| n.to_os_string()) else {
                continue;
            };
            if !seen.insert(name) {
                tracing::warn!(
                    component = "quarry_store",
                    op = "discover_schema_sources",
                    path = %path.display(),
                    "Skipping duplicate schema source"
                );
                continue;
            }
            found.push(path);
        }
    }

    found
}
