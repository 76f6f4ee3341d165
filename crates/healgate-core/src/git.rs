//! Git subprocess primitives for branch, commit, and push operations.

use std::path::Path;
use std::process::Command;

use crate::domain::error::{HealgateError, Result};
use crate::redact::{clamp_text, redact_secrets, MAX_EXCERPT_CHARS};

/// Run a git subcommand in `repo_dir`, returning trimmed stdout.
fn run_git(repo_dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .map_err(|e| HealgateError::GitError(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = clamp_text(
            &redact_secrets(String::from_utf8_lossy(&output.stderr).trim()),
            MAX_EXCERPT_CHARS,
        );
        return Err(HealgateError::GitError(format!(
            "git {} failed: {stderr}",
            args.first().copied().unwrap_or("?"),
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Capture the HEAD commit SHA from a git repository.
pub fn capture_head_sha(repo_dir: &Path) -> Result<String> {
    let sha = run_git(repo_dir, &["rev-parse", "HEAD"])?;
    if sha.is_empty() {
        return Err(HealgateError::GitError(
            "git rev-parse HEAD returned empty output".to_string(),
        ));
    }
    Ok(sha)
}

/// Check whether a directory is inside a git work tree.
pub fn is_git_repo(dir: &Path) -> bool {
    Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(dir)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Name of the currently checked-out branch.
pub fn current_branch(repo_dir: &Path) -> Result<String> {
    let name = run_git(repo_dir, &["rev-parse", "--abbrev-ref", "HEAD"])?;
    if name.is_empty() {
        return Err(HealgateError::GitError(
            "git rev-parse --abbrev-ref HEAD returned empty output".to_string(),
        ));
    }
    Ok(name)
}

/// Create a branch and check it out.
pub fn create_branch(repo_dir: &Path, name: &str) -> Result<()> {
    run_git(repo_dir, &["checkout", "-b", name]).map(|_| ())
}

/// Check out an existing branch.
pub fn checkout(repo_dir: &Path, name: &str) -> Result<()> {
    run_git(repo_dir, &["checkout", name]).map(|_| ())
}

/// Delete a local branch, discarding its commits.
pub fn delete_branch(repo_dir: &Path, name: &str) -> Result<()> {
    run_git(repo_dir, &["branch", "-D", name]).map(|_| ())
}

/// Whether a local branch exists.
pub fn branch_exists(repo_dir: &Path, name: &str) -> bool {
    Command::new("git")
        .args(["rev-parse", "--verify", "--quiet", &format!("refs/heads/{name}")])
        .current_dir(repo_dir)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Local branch names.
pub fn list_branches(repo_dir: &Path) -> Result<Vec<String>> {
    let out = run_git(repo_dir, &["branch", "--format", "%(refname:short)"])?;
    Ok(out
        .lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect())
}

/// Stage the given repo-relative paths.
pub fn stage(repo_dir: &Path, paths: &[String]) -> Result<()> {
    let mut args = vec!["add", "--"];
    args.extend(paths.iter().map(String::as_str));
    run_git(repo_dir, &args).map(|_| ())
}

/// Commit staged changes and return the new HEAD SHA.
pub fn commit(repo_dir: &Path, message: &str) -> Result<String> {
    run_git(repo_dir, &["commit", "-m", message])?;
    capture_head_sha(repo_dir)
}

/// Push a branch, setting its upstream.
pub fn push(repo_dir: &Path, remote: &str, branch: &str) -> Result<()> {
    run_git(repo_dir, &["push", "--set-upstream", remote, branch]).map(|_| ())
}

/// Apply a patch file to the working tree with `git apply`.
///
/// `check_only` validates without touching anything. Failures are apply
/// conflicts, not git plumbing errors.
pub fn apply_patch(repo_dir: &Path, patch_path: &Path, check_only: bool) -> Result<()> {
    let mut args: Vec<&str> = vec!["apply", "--whitespace=nowarn"];
    if check_only {
        args.push("--check");
    }
    let patch_arg = patch_path.to_string_lossy();
    args.push(&patch_arg);

    let output = Command::new("git")
        .args(&args)
        .current_dir(repo_dir)
        .output()
        .map_err(|e| HealgateError::GitError(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = clamp_text(
            &redact_secrets(String::from_utf8_lossy(&output.stderr).trim()),
            MAX_EXCERPT_CHARS,
        );
        return Err(HealgateError::ApplyConflict(stderr));
    }
    Ok(())
}
