//! Narrow, black-box interfaces to the three external collaborators the
//! Agent Runtime calls out to: the project scanner (Discovery), the merge
//! skill (Coder), and the asset writer (Coder). Each is a trait with a
//! filesystem-backed default implementation, following the same
//! `BoxFuture`-returning trait-method idiom as [`crate::agent::Agent`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use glob::Pattern;
use thiserror::Error;

use crate::model::{ChangeType, FileChange};
use crate::persistence::{self, PersistenceError};

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("failed to read project file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to walk project directory '{path}': {source}")]
    Walk {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid glob pattern '{pattern}': {source}")]
    BadGlob {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
    #[error("merge_error: diff for '{file_path}' did not apply cleanly: {reason}")]
    MergeFailed { file_path: String, reason: String },
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Scans the project tree and returns its contents as a `{path -> content}`
/// map. The filesystem-backed default walks `input_paths`, honoring
/// `exclusions`; a richer deployment may substitute its own scanner.
pub trait ProjectScanner: Send + Sync {
    fn scan<'a>(
        &'a self,
        input_paths: &'a [String],
        exclusions: &'a [String],
    ) -> BoxFuture<'a, Result<BTreeMap<String, String>, CollaboratorError>>;
}

pub struct FilesystemScanner {
    root: PathBuf,
}

impl FilesystemScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ProjectScanner for FilesystemScanner {
    fn scan<'a>(
        &'a self,
        input_paths: &'a [String],
        exclusions: &'a [String],
    ) -> BoxFuture<'a, Result<BTreeMap<String, String>, CollaboratorError>> {
        Box::pin(async move {
            let exclude_patterns = exclusions
                .iter()
                .map(|pattern| {
                    Pattern::new(pattern).map_err(|source| CollaboratorError::BadGlob {
                        pattern: pattern.clone(),
                        source,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            let mut files = BTreeMap::new();
            for input_path in input_paths {
                let include_pattern = Pattern::new(input_path).map_err(|source| CollaboratorError::BadGlob {
                    pattern: input_path.clone(),
                    source,
                })?;
                walk(&self.root, &self.root, &include_pattern, &exclude_patterns, &mut files)?;
            }
            Ok(files)
        })
    }
}

fn walk(
    root: &Path,
    dir: &Path,
    include: &Pattern,
    excludes: &[Pattern],
    files: &mut BTreeMap<String, String>,
) -> Result<(), CollaboratorError> {
    let read_dir = std::fs::read_dir(dir).map_err(|source| CollaboratorError::Walk {
        path: dir.display().to_string(),
        source,
    })?;
    for entry in read_dir {
        let entry = entry.map_err(|source| CollaboratorError::Walk {
            path: dir.display().to_string(),
            source,
        })?;
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(&path);
        let relative_str = relative.to_string_lossy().replace('\\', "/");
        if excludes.iter().any(|pattern| pattern.matches(&relative_str)) {
            continue;
        }
        if path.is_dir() {
            walk(root, &path, include, excludes, files)?;
        } else if include.matches(&relative_str) {
            let content = std::fs::read_to_string(&path).map_err(|source| CollaboratorError::Read {
                path: path.display().to_string(),
                source,
            })?;
            files.insert(relative_str, content);
        }
    }
    Ok(())
}

/// Renders the manifest Discovery consumes in the newline-delimited,
/// `=== <path> ===`-sectioned wire format SPEC_FULL.md §6 specifies.
pub fn render_manifest(files: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (path, content) in files {
        out.push_str(&format!("=== {path} ===\n"));
        out.push_str(content);
        if !content.ends_with('\n') {
            out.push('\n');
        }
    }
    out
}

/// Applies one [`FileChange`] to its prior content, producing the merged
/// result. The default implementation applies `content` directly for
/// `create`/`modify` and treats `diff` as a simple unified-diff patch.
pub trait MergeSkill: Send + Sync {
    fn merge<'a>(
        &'a self,
        original_content: Option<&'a str>,
        change: &'a FileChange,
    ) -> BoxFuture<'a, Result<String, CollaboratorError>>;
}

pub struct DefaultMergeSkill;

impl MergeSkill for DefaultMergeSkill {
    fn merge<'a>(
        &'a self,
        original_content: Option<&'a str>,
        change: &'a FileChange,
    ) -> BoxFuture<'a, Result<String, CollaboratorError>> {
        Box::pin(async move {
            if let Some(content) = &change.content {
                return Ok(content.clone());
            }
            match (&change.diff, original_content) {
                (Some(diff), original) => apply_unified_diff(original.unwrap_or(""), diff)
                    .map_err(|reason| CollaboratorError::MergeFailed {
                        file_path: change.file_path.clone(),
                        reason,
                    }),
                (None, _) => Err(CollaboratorError::MergeFailed {
                    file_path: change.file_path.clone(),
                    reason: "change has neither inline content nor a diff".to_string(),
                }),
            }
        })
    }
}

/// A minimal unified-diff applier: supports pure-addition and
/// pure-replacement hunks against a known original. Anything it cannot
/// confidently apply is reported as a merge failure rather than guessed at.
fn apply_unified_diff(original: &str, diff: &str) -> Result<String, String> {
    let original_lines: Vec<&str> = original.lines().collect();
    let mut result: Vec<String> = Vec::new();
    let mut cursor = 0usize;

    for line in diff.lines() {
        if line.starts_with("@@") || line.starts_with("---") || line.starts_with("+++") {
            continue;
        }
        match line.chars().next() {
            Some(' ') => {
                let text = &line[1..];
                if cursor >= original_lines.len() || original_lines[cursor] != text {
                    return Err(format!("context mismatch at line {cursor}"));
                }
                result.push(text.to_string());
                cursor += 1;
            }
            Some('-') => {
                let text = &line[1..];
                if cursor >= original_lines.len() || original_lines[cursor] != text {
                    return Err(format!("removal mismatch at line {cursor}"));
                }
                cursor += 1;
            }
            Some('+') => {
                result.push(line[1..].to_string());
            }
            _ => {}
        }
    }
    result.extend(original_lines[cursor..].iter().map(|s| s.to_string()));
    Ok(result.join("\n") + "\n")
}

/// Persists content to disk with a backup taken first, creating parent
/// directories and writing atomically.
pub trait AssetWriter: Send + Sync {
    fn write<'a>(
        &'a self,
        path: &'a str,
        content: &'a str,
        create_backup: bool,
    ) -> BoxFuture<'a, Result<Option<String>, CollaboratorError>>;

    fn delete<'a>(&'a self, path: &'a str, create_backup: bool) -> BoxFuture<'a, Result<Option<String>, CollaboratorError>>;
}

pub struct FilesystemAssetWriter {
    project_root: PathBuf,
    backups_root: PathBuf,
}

impl FilesystemAssetWriter {
    pub fn new(project_root: impl Into<PathBuf>, backups_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            backups_root: backups_root.into(),
        }
    }

    fn resolve(&self, relative: &str) -> PathBuf {
        self.project_root.join(relative)
    }
}

impl AssetWriter for FilesystemAssetWriter {
    fn write<'a>(
        &'a self,
        path: &'a str,
        content: &'a str,
        create_backup: bool,
    ) -> BoxFuture<'a, Result<Option<String>, CollaboratorError>> {
        Box::pin(async move {
            let full_path = self.resolve(path);
            let backup_path = if create_backup {
                persistence::create_backup(&full_path, &self.backups_root, chrono::Utc::now())
                    .await?
                    .map(|p| p.display().to_string())
            } else {
                None
            };
            persistence::save_to_file(content.as_bytes(), &full_path).await?;
            Ok(backup_path)
        })
    }

    fn delete<'a>(&'a self, path: &'a str, create_backup: bool) -> BoxFuture<'a, Result<Option<String>, CollaboratorError>> {
        Box::pin(async move {
            let full_path = self.resolve(path);
            let backup_path = if create_backup {
                persistence::create_backup(&full_path, &self.backups_root, chrono::Utc::now())
                    .await?
                    .map(|p| p.display().to_string())
            } else {
                None
            };
            if full_path.exists() {
                tokio::fs::remove_file(&full_path)
                    .await
                    .map_err(|source| CollaboratorError::Read {
                        path: full_path.display().to_string(),
                        source,
                    })?;
            }
            Ok(backup_path)
        })
    }
}

/// Applies a change end-to-end (merge, then write/delete), the sequence the
/// Coder agent drives per [`FileChange`].
pub async fn apply_change(
    merge: &dyn MergeSkill,
    writer: &dyn AssetWriter,
    original_content: Option<&str>,
    change: &FileChange,
) -> Result<Option<String>, CollaboratorError> {
    match change.change_type {
        ChangeType::Delete => writer.delete(&change.file_path, true).await,
        ChangeType::Create | ChangeType::Modify => {
            let merged = merge.merge(original_content, change).await?;
            writer.write(&change.file_path, &merged, true).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn filesystem_scanner_honors_exclusions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "print(1)").unwrap();
        std::fs::create_dir(dir.path().join("vendor")).unwrap();
        std::fs::write(dir.path().join("vendor/b.py"), "print(2)").unwrap();

        let scanner = FilesystemScanner::new(dir.path());
        let files = scanner
            .scan(&["**/*.py".to_string()], &["vendor/**".to_string()])
            .await
            .unwrap();
        assert_eq!(files.len(), 1);
        assert!(files.contains_key("a.py"));
    }

    #[test]
    fn render_manifest_sections_each_file() {
        let mut files = BTreeMap::new();
        files.insert("a.py".to_string(), "print(1)\n".to_string());
        let manifest = render_manifest(&files);
        assert!(manifest.contains("=== a.py ==="));
        assert!(manifest.contains("print(1)"));
    }

    #[tokio::test]
    async fn default_merge_prefers_inline_content() {
        let merge = DefaultMergeSkill;
        let change = FileChange {
            file_path: "a.py".into(),
            change_type: ChangeType::Modify,
            description: None,
            content: Some("new content".into()),
            diff: None,
        };
        let merged = merge.merge(Some("old content"), &change).await.unwrap();
        assert_eq!(merged, "new content");
    }

    #[tokio::test]
    async fn default_merge_errors_without_content_or_diff() {
        let merge = DefaultMergeSkill;
        let change = FileChange {
            file_path: "a.py".into(),
            change_type: ChangeType::Modify,
            description: None,
            content: None,
            diff: None,
        };
        assert!(merge.merge(Some("old"), &change).await.is_err());
    }

    #[test]
    fn unified_diff_applies_simple_replacement() {
        let original = "line one\nline two\nline three\n";
        let diff = " line one\n-line two\n+line two modified\n line three\n";
        let result = apply_unified_diff(original, diff).unwrap();
        assert_eq!(result, "line one\nline two modified\nline three\n");
    }

    #[tokio::test]
    async fn filesystem_asset_writer_backs_up_before_overwrite() {
        let project = tempfile::tempdir().unwrap();
        let backups = tempfile::tempdir().unwrap();
        std::fs::write(project.path().join("a.py"), "old").unwrap();

        let writer = FilesystemAssetWriter::new(project.path(), backups.path());
        let backup_path = writer.write("a.py", "new", true).await.unwrap();
        assert!(backup_path.is_some());
        assert_eq!(std::fs::read_to_string(project.path().join("a.py")).unwrap(), "new");
        assert_eq!(
            std::fs::read_to_string(backup_path.unwrap()).unwrap(),
            "old"
        );
    }

    #[tokio::test]
    async fn filesystem_asset_writer_skips_backup_for_new_file() {
        let project = tempfile::tempdir().unwrap();
        let backups = tempfile::tempdir().unwrap();
        let writer = FilesystemAssetWriter::new(project.path(), backups.path());
        let backup_path = writer.write("new_file.py", "content", true).await.unwrap();
        assert!(backup_path.is_none());
    }
}
