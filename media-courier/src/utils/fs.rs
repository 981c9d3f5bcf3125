//! Filesystem helpers shared across modules.
//!
//! These helpers provide consistent error context (operation + path) and the
//! job-namespaced artifact queries used by the pipeline.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::domain::JobId;
use crate::{Error, Result};

/// Convert an IO error into an application error with operation + path context.
pub fn io_error(op: &'static str, path: &Path, source: std::io::Error) -> Error {
    Error::io_path(op, path, source)
}

/// Ensure a directory exists, creating it (recursively) if needed.
pub async fn ensure_dir_all_with_op(op: &'static str, path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| io_error(op, path, e))
}

/// Ensure a directory exists (synchronous variant) with a custom operation label.
pub fn ensure_dir_all_sync_with_op(op: &'static str, path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| io_error(op, path, e))
}

/// Total size in bytes of all regular files below `path`.
///
/// Blocking; run it on the blocking pool. Unreadable entries are skipped.
pub fn dir_usage_bytes(path: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(path) else {
        return 0;
    };

    entries
        .flatten()
        .map(|entry| match entry.metadata() {
            Ok(meta) if meta.is_dir() => dir_usage_bytes(&entry.path()),
            Ok(meta) => meta.len(),
            Err(_) => 0,
        })
        .sum()
}

/// Size of a file in bytes.
pub async fn file_size(path: &Path) -> Result<u64> {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.len())
        .map_err(|e| io_error("reading file metadata", path, e))
}

/// Files in `dir` (non-recursive) that belong to `job_id`, sorted by name.
pub async fn list_owned(dir: &Path, job_id: &JobId) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| io_error("listing directory", dir, e))?;

    let mut owned = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| io_error("listing directory", dir, e))?
    {
        let path = entry.path();
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| job_id.owns_file_name(n));
        if is_file && matches {
            owned.push(path);
        }
    }

    owned.sort();
    Ok(owned)
}

/// Remove a file, treating "already gone" as success.
pub async fn remove_file_if_exists(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(io_error("removing file", path, e)),
    }
}

/// Remove every file in `dir` belonging to `job_id`. Returns the number removed.
///
/// Best-effort: failures are logged, never returned.
pub async fn sweep_owned(dir: &Path, job_id: &JobId) -> usize {
    let files = match list_owned(dir, job_id).await {
        Ok(files) => files,
        Err(e) => {
            debug!(job_id = %job_id, error = %e, "Artifact sweep skipped");
            return 0;
        }
    };

    let mut removed = 0;
    for file in files {
        match remove_file_if_exists(&file).await {
            Ok(true) => removed += 1,
            Ok(false) => {}
            Err(e) => warn!(job_id = %job_id, error = %e, "Failed to remove artifact"),
        }
    }
    removed
}

/// Remove every regular file directly inside `dir`. Returns the number removed.
pub async fn clear_files(dir: &Path) -> Result<usize> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(io_error("listing directory", dir, e)),
    };

    let mut removed = 0;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| io_error("listing directory", dir, e))?
    {
        if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
            let path = entry.path();
            match remove_file_if_exists(&path).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => warn!(error = %e, "Failed to remove stale artifact"),
            }
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_list_and_sweep_owned() {
        let dir = TempDir::new().unwrap();
        let id = JobId::from("1_2_3_4");
        for name in ["1_2_3_4.mp4", "1_2_3_4_part001.mp4", "1_2_3_4.jpg", "1_2_3_45.mp4"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }

        let owned = list_owned(dir.path(), &id).await.unwrap();
        let names: Vec<_> = owned
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["1_2_3_4.jpg", "1_2_3_4.mp4", "1_2_3_4_part001.mp4"]);

        assert_eq!(sweep_owned(dir.path(), &id).await, 3);
        assert!(dir.path().join("1_2_3_45.mp4").exists());
    }

    #[tokio::test]
    async fn test_dir_usage_bytes() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a"), vec![0u8; 10]).unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b"), vec![0u8; 5]).unwrap();
        assert_eq!(dir_usage_bytes(dir.path()), 15);
        assert_eq!(dir_usage_bytes(&dir.path().join("missing")), 0);
    }

    #[tokio::test]
    async fn test_clear_files_and_missing_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.mp4"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("keep")).unwrap();
        assert_eq!(clear_files(dir.path()).await.unwrap(), 1);
        assert!(dir.path().join("keep").exists());
        assert_eq!(clear_files(&dir.path().join("nope")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_remove_file_if_exists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x");
        std::fs::write(&path, b"x").unwrap();
        assert!(remove_file_if_exists(&path).await.unwrap());
        assert!(!remove_file_if_exists(&path).await.unwrap());
    }
}
