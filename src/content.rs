//! Content fingerprinting for asset deployments.
//!
//! A fingerprint covers file names and file contents, so renaming, adding,
//! removing or editing any file changes it while touching timestamps does
//! not.

use anyhow::{Context, Result};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// BLAKE3 fingerprint of every regular file below `dir`
pub fn fingerprint(dir: &Path) -> Result<String> {
    let files = collect_files(dir)?;

    let hashes = files
        .par_iter()
        .map(|(relative, path)| -> Result<(&str, blake3::Hash)> {
            let content =
                fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
            Ok((relative.as_str(), blake3::hash(&content)))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut hasher = blake3::Hasher::new();
    for (relative, hash) in hashes {
        hasher.update(relative.as_bytes());
        hasher.update(&[0]);
        hasher.update(hash.as_bytes());
    }

    log::debug!("Fingerprinted {} files in {}", files.len(), dir.display());
    Ok(hasher.finalize().to_hex().to_string())
}

/// Regular files as (slash-separated relative path, full path), sorted
fn collect_files(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(dir)
            .with_context(|| format!("Failed to strip prefix from {}", entry.path().display()))?;
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        files.push((relative, entry.into_path()));
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn site() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("index.html"), "<h1>home</h1>").unwrap();
        fs::create_dir(dir.path().join("css")).unwrap();
        fs::write(dir.path().join("css/site.css"), "body {}").unwrap();
        dir
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let dir = site();
        let first = fingerprint(dir.path()).unwrap();
        assert_eq!(first, fingerprint(dir.path()).unwrap());
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn test_identical_trees_match() {
        let (a, b) = (site(), site());
        assert_eq!(
            fingerprint(a.path()).unwrap(),
            fingerprint(b.path()).unwrap()
        );
    }

    #[test]
    fn test_content_change_detected() {
        let dir = site();
        let before = fingerprint(dir.path()).unwrap();
        fs::write(dir.path().join("css/site.css"), "body { margin: 0 }").unwrap();
        assert_ne!(before, fingerprint(dir.path()).unwrap());
    }

    #[test]
    fn test_rename_detected() {
        let dir = site();
        let before = fingerprint(dir.path()).unwrap();
        fs::rename(dir.path().join("index.html"), dir.path().join("home.html")).unwrap();
        assert_ne!(before, fingerprint(dir.path()).unwrap());
    }

    #[test]
    fn test_empty_directory() {
        let dir = TempDir::new().unwrap();
        let files = collect_files(dir.path()).unwrap();
        assert!(files.is_empty());
        assert_eq!(
            fingerprint(dir.path()).unwrap(),
            blake3::Hasher::new().finalize().to_hex().to_string()
        );
    }

    #[test]
    fn test_relative_paths_sorted() {
        let dir = site();
        let files = collect_files(dir.path()).unwrap();
        let names: Vec<&str> = files.iter().map(|(r, _)| r.as_str()).collect();
        assert_eq!(names, ["css/site.css", "index.html"]);
    }
}
