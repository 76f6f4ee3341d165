//! Vetted patch application under path-safety and allow-list gates.
//!
//! All-or-nothing: every target path is validated before any file is
//! touched, pre-existing content is backed up, and the patch is verified
//! with `git apply --check` before the real apply. A failure at any stage
//! leaves the working tree as it was; a successful apply leaves a `.orig`
//! sibling next to every mutated file.

use std::io::Write;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info};

use crate::diff::{self, ChangeKind};
use crate::domain::error::{HealgateError, Result};
use crate::git;
use crate::pathspec::AllowList;

/// Backup suffix appended to the original file name.
const BACKUP_SUFFIX: &str = ".orig";

/// One backed-up file: the original path and its backup sibling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBackup {
    pub original: PathBuf,
    pub backup: PathBuf,
}

/// Result of applying (or dry-running) one patch.
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    /// Repo-relative paths the patch touches, or would touch when `dry_run`.
    pub touched: Vec<String>,
    pub dry_run: bool,
}

/// Reject paths that could resolve outside the repository root.
///
/// Checks are lexical (absolute paths, `..` components) plus a symlink check
/// on the nearest existing ancestor.
pub fn ensure_path_safe(repo_root: &Path, rel: &str) -> Result<()> {
    let candidate = Path::new(rel);
    if candidate.is_absolute() {
        return Err(HealgateError::UnsafePath(rel.to_string()));
    }
    for component in candidate.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => return Err(HealgateError::UnsafePath(rel.to_string())),
        }
    }

    let root = repo_root
        .canonicalize()
        .map_err(|e| HealgateError::UnsafePath(format!("{}: {e}", repo_root.display())))?;
    let joined = root.join(candidate);

    // Nearest existing ancestor must still live under the root once
    // symlinks are resolved.
    let mut probe: &Path = &joined;
    loop {
        match probe.parent() {
            Some(parent) if parent.starts_with(&root) || parent == root => {
                if parent.exists() {
                    let resolved = parent
                        .canonicalize()
                        .map_err(|_| HealgateError::UnsafePath(rel.to_string()))?;
                    if !resolved.starts_with(&root) {
                        return Err(HealgateError::UnsafePath(rel.to_string()));
                    }
                    break;
                }
                probe = parent;
            }
            _ => break,
        }
    }

    Ok(())
}

/// Copy a pre-existing file to its `.orig` sibling. Returns `None` when the
/// file does not exist yet (added files).
pub fn backup_file(path: &Path) -> Result<Option<FileBackup>> {
    if !path.exists() {
        return Ok(None);
    }
    let mut backup = path.as_os_str().to_owned();
    backup.push(BACKUP_SUFFIX);
    let backup = PathBuf::from(backup);
    std::fs::copy(path, &backup)?;
    Ok(Some(FileBackup {
        original: path.to_path_buf(),
        backup,
    }))
}

/// Restore every backup over its original file.
pub fn restore_backups(backups: &[FileBackup]) -> Result<()> {
    for b in backups {
        std::fs::copy(&b.backup, &b.original)?;
    }
    Ok(())
}

/// Best-effort removal of `.orig` files after a restore has consumed them.
fn discard_backups(backups: &[FileBackup]) {
    for b in backups {
        let _ = std::fs::remove_file(&b.backup);
    }
}

/// Repo-relative paths a change mutates (renames touch both sides).
fn touched_paths(change: &diff::FileChange) -> Vec<String> {
    match change.kind {
        ChangeKind::Renamed => {
            let mut paths = Vec::with_capacity(2);
            if let Some(old) = &change.old_path {
                paths.push(old.clone());
            }
            paths.push(change.path.clone());
            paths
        }
        _ => vec![change.path.clone()],
    }
}

/// Validate and apply one unified diff to the repository.
///
/// Every target path must pass the safety check and the allow-list before
/// anything is written. `dry_run` stops after `git apply --check`.
pub fn apply_patch_set(
    repo_dir: &Path,
    allow_list: &AllowList,
    diff_text: &str,
    dry_run: bool,
) -> Result<ApplyOutcome> {
    let files = diff::parse_patch(diff_text)?;
    let changes = diff::file_changes(&files);

    let mut touched: Vec<String> = Vec::new();
    for change in &changes {
        for path in touched_paths(change) {
            if !touched.contains(&path) {
                touched.push(path);
            }
        }
    }

    for path in &touched {
        ensure_path_safe(repo_dir, path)?;
    }
    for path in &touched {
        if !allow_list.permits(path) {
            return Err(HealgateError::OutOfScopePath(path.clone()));
        }
    }

    let mut patch_file = tempfile::NamedTempFile::new()?;
    patch_file.write_all(diff_text.as_bytes())?;
    patch_file.flush()?;

    git::apply_patch(repo_dir, patch_file.path(), true)?;
    if dry_run {
        debug!(count = touched.len(), "dry run validated patch");
        return Ok(ApplyOutcome {
            touched,
            dry_run: true,
        });
    }

    let mut backups = Vec::new();
    for path in &touched {
        if let Some(backup) = backup_file(&repo_dir.join(path))? {
            backups.push(backup);
        }
    }

    if let Err(apply_err) = git::apply_patch(repo_dir, patch_file.path(), false) {
        restore_backups(&backups)?;
        discard_backups(&backups);
        return Err(apply_err);
    }
    info!(count = touched.len(), backups = backups.len(), "patch applied");

    Ok(ApplyOutcome {
        touched,
        dry_run: false,
    })
}
