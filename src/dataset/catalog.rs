//! Data directory listing.
//!
//! Finds the CSV files a dashboard definition can reference, skipping hidden
//! entries and common build/VCS directories.

use anyhow::{anyhow, Result};
use std::path::Path;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Directory names never descended into.
const EXCLUDED_DIRS: &[&str] = &["target", "node_modules", "__pycache__", "venv"];

/// A CSV file found under the data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Path relative to the data directory
    pub path: String,
    /// File size in bytes
    pub size: u64,
}

/// List every `.csv` file under `root`, sorted by path.
pub fn list_csv_files(root: &Path) -> Result<Vec<CatalogEntry>> {
    if !root.exists() {
        return Err(anyhow!("Data directory not found: {}", root.display()));
    }

    if !root.is_dir() {
        return Err(anyhow!("Not a directory: {}", root.display()));
    }

    let mut entries = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_excluded(entry));

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                debug!("Skipping unreadable entry: {}", e);
                continue;
            }
        };

        if !entry.file_type().is_file() || !is_csv(entry.path()) {
            continue;
        }

        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        let rel_path = entry.path().strip_prefix(root).unwrap_or(entry.path());

        entries.push(CatalogEntry {
            path: rel_path.to_string_lossy().to_string(),
            size,
        });
    }

    entries.sort_by(|a, b| a.path.cmp(&b.path));
    debug!("Found {} CSV files under {}", entries.len(), root.display());

    Ok(entries)
}

fn is_excluded(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();

    // Hidden files
    if name.starts_with('.') {
        return true;
    }

    entry.file_type().is_dir() && EXCLUDED_DIRS.contains(&name.as_ref())
}

fn is_csv(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_list_csv_files() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        fs::write(root.join("contest2.csv"), "Contest_ID\nC1\n").unwrap();
        fs::write(root.join("notes.txt"), "ignored").unwrap();
        fs::write(root.join(".hidden.csv"), "x\n1\n").unwrap();
        fs::create_dir(root.join("market")).unwrap();
        fs::write(root.join("market").join("micromarket3.CSV"), "Week\n1\n").unwrap();
        fs::create_dir(root.join("target")).unwrap();
        fs::write(root.join("target").join("build.csv"), "a\n").unwrap();

        let entries = list_csv_files(root).unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();

        let nested = Path::new("market")
            .join("micromarket3.CSV")
            .to_string_lossy()
            .to_string();
        assert_eq!(paths, vec!["contest2.csv", nested.as_str()]);
        assert_eq!(entries[0].size, 14);
    }

    #[test]
    fn test_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("nope");
        assert!(list_csv_files(&missing).is_err());
    }
}
