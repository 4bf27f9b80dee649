//! Atomic file persistence and compression primitives shared by the Lineage
//! Recorder's file backend, the Workflow Store's durable mirror, and the
//! Asset Writer's backup mechanism.
//!
//! The public surface here (`save_to_file`/`load_from_file`/`compress`/
//! `decompress`) mirrors exactly what the teacher crate's own doc comments
//! (`src/lib.rs`) expect from a `persistence` module, even though that
//! module's source was not present in the retrieval pack — only its
//! contract (async file I/O, sync compression) survived; the body below is
//! new.

use std::path::{Path, PathBuf};

use thiserror::Error;
use twox_hash::XxHash3_64;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to create parent directory '{path}': {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write '{path}': {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to rename temp file into place at '{path}': {source}")]
    Rename {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("zstd compression failed: {0}")]
    Compress(std::io::Error),
    #[error("zstd decompression failed: {0}")]
    Decompress(std::io::Error),
}

/// Write `data` to `path` atomically: write to a sibling temp file, then
/// rename over the destination. Creates parent directories as needed.
pub async fn save_to_file(data: &[u8], path: impl AsRef<Path>) -> Result<(), PersistenceError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| PersistenceError::CreateDir {
                    path: parent.display().to_string(),
                    source,
                })?;
        }
    }
    let tmp_path = temp_sibling(path);
    tokio::fs::write(&tmp_path, data)
        .await
        .map_err(|source| PersistenceError::Write {
            path: tmp_path.display().to_string(),
            source,
        })?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|source| PersistenceError::Rename {
            path: path.display().to_string(),
            source,
        })?;
    Ok(())
}

pub async fn load_from_file(path: impl AsRef<Path>) -> Result<Vec<u8>, PersistenceError> {
    let path = path.as_ref();
    tokio::fs::read(path)
        .await
        .map_err(|source| PersistenceError::Read {
            path: path.display().to_string(),
            source,
        })
}

/// Copy the file at `path` to `backup_root/<timestamp>/<file-name>` before it
/// is overwritten, returning the backup's path. A missing source is not an
/// error: there is nothing to back up yet for a freshly created file.
pub async fn create_backup(
    path: impl AsRef<Path>,
    backup_root: impl AsRef<Path>,
    timestamp: chrono::DateTime<chrono::Utc>,
) -> Result<Option<PathBuf>, PersistenceError> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(None);
    }
    let contents = load_from_file(path).await?;
    let stamp = timestamp.format("%Y%m%d_%H%M%S").to_string();
    let file_name = path.file_name().unwrap_or_default();
    let backup_path = backup_root.as_ref().join(stamp).join(file_name);
    save_to_file(&contents, &backup_path).await?;
    Ok(Some(backup_path))
}

pub fn compress(data: &[u8]) -> Result<Vec<u8>, PersistenceError> {
    zstd::encode_all(data, 0).map_err(PersistenceError::Compress)
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>, PersistenceError> {
    zstd::decode_all(data).map_err(PersistenceError::Decompress)
}

/// A stable, filesystem-safe name derived from an arbitrary key, used where
/// a workflow/task identifier needs to become part of a file name (e.g. a
/// saved task state file keyed by task description).
pub fn hashed_file_name(key: &str, extension: &str) -> String {
    let hash = XxHash3_64::oneshot(key.as_bytes());
    format!("{hash:016x}.{extension}")
}

fn temp_sibling(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "tmp".to_string());
    let tmp_name = format!(".{file_name}.tmp");
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(tmp_name),
        _ => PathBuf::from(tmp_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/dir/record.json");
        save_to_file(b"hello", &path).await.unwrap();
        assert_eq!(load_from_file(&path).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn save_leaves_no_temp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("record.json");
        save_to_file(b"hello", &path).await.unwrap();
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn compress_decompress_round_trip() {
        let original = b"the quick brown fox jumps over the lazy dog".repeat(10);
        let compressed = compress(&original).unwrap();
        let decompressed = decompress(&compressed).unwrap();
        assert_eq!(decompressed, original);
    }

    #[tokio::test]
    async fn backup_skips_nonexistent_source() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does_not_exist.txt");
        let backups = dir.path().join("backups");
        let result = create_backup(&missing, &backups, chrono::Utc::now())
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn backup_copies_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("a.py");
        save_to_file(b"print(1)", &original).await.unwrap();
        let backups = dir.path().join("backups");
        let backup_path = create_backup(&original, &backups, chrono::Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(load_from_file(&backup_path).await.unwrap(), b"print(1)");
    }

    #[test]
    fn hashed_file_name_is_stable() {
        let a = hashed_file_name("same-key", "json");
        let b = hashed_file_name("same-key", "json");
        assert_eq!(a, b);
        let c = hashed_file_name("different-key", "json");
        assert_ne!(a, c);
    }
}
