//! Unified diff parsing and per-file change derivation.
//!
//! Parses multi-file `git diff` output into structured hunks so scoring and
//! application can reason about paths, added lines, and deletions without
//! re-scanning raw text. Mutation itself goes through `git apply`; this
//! module never writes to the working tree.

use serde::{Deserialize, Serialize};

use crate::domain::error::{HealgateError, Result};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One line within a hunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiffLine {
    Context(String),
    Add(String),
    Remove(String),
}

/// One `@@` hunk with its ranges and body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffHunk {
    pub old_start: u32,
    pub old_count: u32,
    pub new_start: u32,
    pub new_count: u32,
    pub lines: Vec<DiffLine>,
}

impl DiffHunk {
    /// Short form like `-10,5 +10,6` for logs.
    pub fn summary(&self) -> String {
        format!(
            "-{},{} +{},{}",
            self.old_start, self.old_count, self.new_start, self.new_count
        )
    }
}

/// Diff for a single file, headers plus hunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    /// Path on the `---` side, `None` for added files.
    pub old_path: Option<String>,
    /// Path on the `+++` side, `None` for deleted files.
    pub new_path: Option<String>,
    /// Set when extended headers declare a rename.
    pub renamed_from: Option<String>,
    pub hunks: Vec<DiffHunk>,
}

impl FileDiff {
    /// (added, removed) line counts for this file.
    pub fn stats(&self) -> (usize, usize) {
        let mut added = 0;
        let mut removed = 0;
        for hunk in &self.hunks {
            for line in &hunk.lines {
                match line {
                    DiffLine::Add(_) => added += 1,
                    DiffLine::Remove(_) => removed += 1,
                    DiffLine::Context(_) => {}
                }
            }
        }
        (added, removed)
    }
}

/// Operation class for one affected file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
}

/// Affected file derived from diff text. Never trusted from candidate
/// metadata; always recomputed by `file_changes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    /// Repo-relative target path (old path for deletions).
    pub path: String,
    pub kind: ChangeKind,
    /// Original path for renames.
    pub old_path: Option<String>,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Strip `a/` / `b/` prefixes and trailing tab metadata from a header path.
fn clean_path(raw: &str) -> Option<String> {
    let raw = raw.split('\t').next().unwrap_or(raw).trim();
    if raw == "/dev/null" {
        return None;
    }
    let stripped = raw
        .strip_prefix("a/")
        .or_else(|| raw.strip_prefix("b/"))
        .unwrap_or(raw);
    Some(stripped.to_string())
}

/// Parse `10,5` or `10` from a hunk range.
fn parse_range(s: &str) -> Result<(u32, u32)> {
    let mut parts = s.splitn(2, ',');
    let start = parts
        .next()
        .and_then(|p| p.parse::<u32>().ok())
        .ok_or_else(|| HealgateError::DiffParse(format!("bad hunk range: {s}")))?;
    let count = match parts.next() {
        Some(c) => c
            .parse::<u32>()
            .map_err(|_| HealgateError::DiffParse(format!("bad hunk count: {s}")))?,
        None => 1,
    };
    Ok((start, count))
}

/// Parse a `@@ -old +new @@` header line.
fn parse_hunk_header(line: &str) -> Result<(u32, u32, u32, u32)> {
    let body = line
        .strip_prefix("@@ ")
        .and_then(|rest| rest.split(" @@").next())
        .ok_or_else(|| HealgateError::DiffParse(format!("bad hunk header: {line}")))?;

    let mut parts = body.split_whitespace();
    let old = parts
        .next()
        .and_then(|p| p.strip_prefix('-'))
        .ok_or_else(|| HealgateError::DiffParse(format!("bad hunk header: {line}")))?;
    let new = parts
        .next()
        .and_then(|p| p.strip_prefix('+'))
        .ok_or_else(|| HealgateError::DiffParse(format!("bad hunk header: {line}")))?;

    let (old_start, old_count) = parse_range(old)?;
    let (new_start, new_count) = parse_range(new)?;
    Ok((old_start, old_count, new_start, new_count))
}

/// Parse multi-file unified diff text into per-file diffs.
///
/// Accepts plain `---`/`+++` diffs as well as full `git diff` output with
/// `diff --git` and extended headers (renames, new/deleted file modes).
pub fn parse_patch(diff: &str) -> Result<Vec<FileDiff>> {
    let mut files: Vec<FileDiff> = Vec::new();
    let mut current: Option<FileDiff> = None;

    let mut lines = diff.lines().peekable();
    while let Some(line) = lines.next() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            if let Some(prev) = current.take() {
                files.push(prev);
            }
            // `a/<old> b/<new>`; refined by later headers when present.
            let (old_raw, new_raw) = rest
                .split_once(" b/")
                .ok_or_else(|| HealgateError::DiffParse(format!("bad diff header: {line}")))?;
            current = Some(FileDiff {
                old_path: clean_path(old_raw),
                new_path: clean_path(&format!("b/{new_raw}")),
                renamed_from: None,
                hunks: Vec::new(),
            });
        } else if let Some(rest) = line.strip_prefix("rename from ") {
            if let Some(file) = current.as_mut() {
                file.renamed_from = Some(rest.trim().to_string());
            }
        } else if let Some(rest) = line.strip_prefix("rename to ") {
            if let Some(file) = current.as_mut() {
                file.new_path = Some(rest.trim().to_string());
            }
        } else if line.starts_with("new file mode") {
            if let Some(file) = current.as_mut() {
                file.old_path = None;
            }
        } else if line.starts_with("deleted file mode") {
            if let Some(file) = current.as_mut() {
                file.new_path = None;
            }
        } else if let Some(rest) = line.strip_prefix("--- ") {
            // Begins a new file in plain diffs; refines the open `diff --git`
            // section (which has no hunks yet) in git diffs.
            let starts_new_file = current.as_ref().map_or(true, |f| !f.hunks.is_empty());
            if starts_new_file {
                if let Some(prev) = current.take() {
                    files.push(prev);
                }
                current = Some(FileDiff {
                    old_path: None,
                    new_path: None,
                    renamed_from: None,
                    hunks: Vec::new(),
                });
            }
            if let Some(file) = current.as_mut() {
                file.old_path = clean_path(rest);
            }
        } else if let Some(rest) = line.strip_prefix("+++ ") {
            if let Some(file) = current.as_mut() {
                file.new_path = clean_path(rest);
            }
        } else if line.starts_with("@@ ") {
            let file = current.as_mut().ok_or_else(|| {
                HealgateError::DiffParse("hunk before any file header".to_string())
            })?;
            let (old_start, old_count, new_start, new_count) = parse_hunk_header(line)?;
            let mut hunk = DiffHunk {
                old_start,
                old_count,
                new_start,
                new_count,
                lines: Vec::new(),
            };

            let mut old_left = old_count;
            let mut new_left = new_count;
            while old_left > 0 || new_left > 0 {
                let Some(&body) = lines.peek() else {
                    return Err(HealgateError::DiffParse(format!(
                        "truncated hunk: {}",
                        hunk.summary()
                    )));
                };
                if body.starts_with('\\') {
                    // "\ No newline at end of file"
                    lines.next();
                    continue;
                }
                let (marker, text) = match body.chars().next() {
                    Some(c @ (' ' | '+' | '-')) => (c, &body[1..]),
                    // Blank context line with the trailing space trimmed.
                    None => (' ', ""),
                    _ => {
                        return Err(HealgateError::DiffParse(format!(
                            "unexpected line in hunk {}: {body}",
                            hunk.summary()
                        )));
                    }
                };
                match marker {
                    ' ' => {
                        if old_left == 0 || new_left == 0 {
                            return Err(HealgateError::DiffParse(format!(
                                "hunk overruns its ranges: {}",
                                hunk.summary()
                            )));
                        }
                        old_left -= 1;
                        new_left -= 1;
                        hunk.lines.push(DiffLine::Context(text.to_string()));
                    }
                    '+' => {
                        if new_left == 0 {
                            return Err(HealgateError::DiffParse(format!(
                                "hunk overruns its ranges: {}",
                                hunk.summary()
                            )));
                        }
                        new_left -= 1;
                        hunk.lines.push(DiffLine::Add(text.to_string()));
                    }
                    '-' => {
                        if old_left == 0 {
                            return Err(HealgateError::DiffParse(format!(
                                "hunk overruns its ranges: {}",
                                hunk.summary()
                            )));
                        }
                        old_left -= 1;
                        hunk.lines.push(DiffLine::Remove(text.to_string()));
                    }
                    _ => unreachable!(),
                }
                lines.next();
            }
            file.hunks.push(hunk);
        }
        // index/mode/similarity/Binary lines carry nothing we need.
    }

    if let Some(prev) = current.take() {
        files.push(prev);
    }
    if files.is_empty() {
        return Err(HealgateError::DiffParse(
            "no file headers found in diff".to_string(),
        ));
    }
    Ok(files)
}

// ---------------------------------------------------------------------------
// Derivation
// ---------------------------------------------------------------------------

/// Derive affected-file records from parsed diffs.
pub fn file_changes(files: &[FileDiff]) -> Vec<FileChange> {
    let mut changes = Vec::with_capacity(files.len());
    for file in files {
        let change = match (&file.old_path, &file.new_path) {
            (None, Some(new)) => FileChange {
                path: new.clone(),
                kind: ChangeKind::Added,
                old_path: None,
            },
            (Some(old), None) => FileChange {
                path: old.clone(),
                kind: ChangeKind::Deleted,
                old_path: None,
            },
            (Some(old), Some(new)) => {
                if file.renamed_from.is_some() || old != new {
                    FileChange {
                        path: new.clone(),
                        kind: ChangeKind::Renamed,
                        old_path: Some(file.renamed_from.clone().unwrap_or_else(|| old.clone())),
                    }
                } else {
                    FileChange {
                        path: new.clone(),
                        kind: ChangeKind::Modified,
                        old_path: None,
                    }
                }
            }
            (None, None) => continue,
        };
        changes.push(change);
    }
    changes
}

/// Every added line across all files, for pattern scanning.
pub fn added_lines(files: &[FileDiff]) -> Vec<&str> {
    let mut out = Vec::new();
    for file in files {
        for hunk in &file.hunks {
            for line in &hunk.lines {
                if let DiffLine::Add(text) = line {
                    out.push(text.as_str());
                }
            }
        }
    }
    out
}

/// (files, added, removed) across all parsed diffs.
pub fn patch_stats(files: &[FileDiff]) -> (usize, usize, usize) {
    let mut added = 0;
    let mut removed = 0;
    for file in files {
        let (a, r) = file.stats();
        added += a;
        removed += r;
    }
    (files.len(), added, removed)
}

/// True when any file is deleted outright.
pub fn has_file_deletion(files: &[FileDiff]) -> bool {
    files
        .iter()
        .any(|f| f.old_path.is_some() && f.new_path.is_none())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_FILE_DIFF: &str = "\
diff --git a/src/app.ts b/src/app.ts
index 1111111..2222222 100644
--- a/src/app.ts
+++ b/src/app.ts
@@ -1,3 +1,4 @@
 import x from 'x';
+import y from 'y';
 const a = 1;
 const b = 2;
diff --git a/src/util.ts b/src/util.ts
index 3333333..4444444 100644
--- a/src/util.ts
+++ b/src/util.ts
@@ -10,2 +10,1 @@
-export const OLD = 1;
-export const DEAD = 2;
+export const NEW = 1;
";

    #[test]
    fn test_parse_two_file_diff() {
        let files = parse_patch(TWO_FILE_DIFF).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].new_path.as_deref(), Some("src/app.ts"));
        assert_eq!(files[0].hunks.len(), 1);
        assert_eq!(files[0].hunks[0].summary(), "-1,3 +1,4");
        assert_eq!(files[1].stats(), (1, 2));
    }

    #[test]
    fn test_parse_plain_diff_without_git_header() {
        let diff = "\
--- a/lib/mod.rs
+++ b/lib/mod.rs
@@ -1,1 +1,2 @@
 fn a() {}
+fn b() {}
";
        let files = parse_patch(diff).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].new_path.as_deref(), Some("lib/mod.rs"));
        assert_eq!(files[0].stats(), (1, 0));
    }

    #[test]
    fn test_parse_concatenated_plain_diffs() {
        let diff = "\
--- a/one.rs
+++ b/one.rs
@@ -1,1 +1,1 @@
-a
+b
--- a/two.rs
+++ b/two.rs
@@ -1,1 +1,1 @@
-c
+d
";
        let files = parse_patch(diff).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].new_path.as_deref(), Some("one.rs"));
        assert_eq!(files[1].new_path.as_deref(), Some("two.rs"));
    }

    #[test]
    fn test_added_and_deleted_files() {
        let diff = "\
diff --git a/new.txt b/new.txt
new file mode 100644
--- /dev/null
+++ b/new.txt
@@ -0,0 +1,1 @@
+hello
diff --git a/old.txt b/old.txt
deleted file mode 100644
--- a/old.txt
+++ /dev/null
@@ -1,1 +0,0 @@
-goodbye
";
        let files = parse_patch(diff).unwrap();
        let changes = file_changes(&files);
        assert_eq!(changes[0].kind, ChangeKind::Added);
        assert_eq!(changes[0].path, "new.txt");
        assert_eq!(changes[1].kind, ChangeKind::Deleted);
        assert_eq!(changes[1].path, "old.txt");
        assert!(has_file_deletion(&files));
    }

    #[test]
    fn test_rename_with_extended_headers() {
        let diff = "\
diff --git a/src/old_name.rs b/src/new_name.rs
similarity index 90%
rename from src/old_name.rs
rename to src/new_name.rs
--- a/src/old_name.rs
+++ b/src/new_name.rs
@@ -1,1 +1,1 @@
-fn old() {}
+fn new() {}
";
        let files = parse_patch(diff).unwrap();
        let changes = file_changes(&files);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Renamed);
        assert_eq!(changes[0].path, "src/new_name.rs");
        assert_eq!(changes[0].old_path.as_deref(), Some("src/old_name.rs"));
    }

    #[test]
    fn test_pure_rename_without_hunks() {
        let diff = "\
diff --git a/docs/a.md b/docs/b.md
similarity index 100%
rename from docs/a.md
rename to docs/b.md
";
        let files = parse_patch(diff).unwrap();
        let changes = file_changes(&files);
        assert_eq!(changes[0].kind, ChangeKind::Renamed);
        assert_eq!(changes[0].path, "docs/b.md");
    }

    #[test]
    fn test_added_lines_collection() {
        let files = parse_patch(TWO_FILE_DIFF).unwrap();
        let added = added_lines(&files);
        assert_eq!(added, vec!["import y from 'y';", "export const NEW = 1;"]);
    }

    #[test]
    fn test_patch_stats() {
        let files = parse_patch(TWO_FILE_DIFF).unwrap();
        assert_eq!(patch_stats(&files), (2, 2, 2));
    }

    #[test]
    fn test_truncated_hunk_is_error() {
        let diff = "\
--- a/x.rs
+++ b/x.rs
@@ -1,3 +1,3 @@
 line
";
        assert!(matches!(
            parse_patch(diff),
            Err(HealgateError::DiffParse(_))
        ));
    }

    #[test]
    fn test_bad_hunk_header_is_error() {
        let diff = "\
--- a/x.rs
+++ b/x.rs
@@ -x,1 +1,1 @@
 line
";
        assert!(parse_patch(diff).is_err());
    }

    #[test]
    fn test_empty_input_is_error() {
        assert!(parse_patch("").is_err());
        assert!(parse_patch("not a diff at all\n").is_err());
    }

    #[test]
    fn test_no_newline_marker_is_skipped() {
        let diff = "\
--- a/x.txt
+++ b/x.txt
@@ -1,1 +1,1 @@
-old
+new
\\ No newline at end of file
";
        let files = parse_patch(diff).unwrap();
        assert_eq!(files[0].stats(), (1, 1));
    }
}
