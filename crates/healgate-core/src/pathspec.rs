//! Glob-style path matching for patch allow-lists.
//!
//! Dialect:
//! - `**` as a full segment matches zero or more path segments
//! - `*` matches any run of non-separator characters
//! - `?` matches exactly one non-separator character
//! - everything else is literal, with separators aligned positionally
//!
//! A pattern without wildcards is therefore an exact path match.

use crate::domain::error::{HealgateError, Result};

/// Match a single path segment against a pattern segment (`*` and `?` only).
fn match_segment(pattern: &str, segment: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let seg: Vec<char> = segment.chars().collect();

    let mut p = 0usize;
    let mut s = 0usize;
    let mut star: Option<usize> = None;
    let mut star_s = 0usize;

    while s < seg.len() {
        if p < pat.len() && (pat[p] == '?' || pat[p] == seg[s]) {
            p += 1;
            s += 1;
        } else if p < pat.len() && pat[p] == '*' {
            star = Some(p);
            star_s = s;
            p += 1;
        } else if let Some(anchor) = star {
            // Backtrack: widen the last `*` by one character.
            p = anchor + 1;
            star_s += 1;
            s = star_s;
        } else {
            return false;
        }
    }

    while p < pat.len() && pat[p] == '*' {
        p += 1;
    }
    p == pat.len()
}

fn match_segments(pattern: &[&str], path: &[&str]) -> bool {
    match pattern.split_first() {
        None => path.is_empty(),
        Some((&"**", rest)) => {
            (0..=path.len()).any(|skip| match_segments(rest, &path[skip..]))
        }
        Some((first, rest)) => match path.split_first() {
            Some((segment, path_rest)) => {
                match_segment(first, segment) && match_segments(rest, path_rest)
            }
            None => false,
        },
    }
}

/// Match a repo-relative path against one glob pattern.
pub fn glob_match(pattern: &str, path: &str) -> bool {
    let pattern_segments: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match_segments(&pattern_segments, &path_segments)
}

/// Ordered set of glob patterns naming the files a patch may touch.
///
/// An empty allow-list is rejected at construction.
#[derive(Debug, Clone)]
pub struct AllowList {
    patterns: Vec<String>,
}

impl AllowList {
    pub fn new(patterns: Vec<String>) -> Result<Self> {
        if patterns.is_empty() {
            return Err(HealgateError::EmptyAllowList);
        }
        Ok(Self { patterns })
    }

    /// Whether any pattern matches the given repo-relative path.
    pub fn permits(&self, path: &str) -> bool {
        self.patterns.iter().any(|p| glob_match(p, path))
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}
