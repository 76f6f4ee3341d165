//! Domain-level error taxonomy for Healgate.

/// Healgate domain errors.
#[derive(Debug, thiserror::Error)]
pub enum HealgateError {
    #[error("allow-list must not be empty")]
    EmptyAllowList,

    #[error("unsafe path: {0}")]
    UnsafePath(String),

    #[error("path outside allow-list: {0}")]
    OutOfScopePath(String),

    #[error("patch conflict: {0}")]
    ApplyConflict(String),

    #[error("malformed diff: {0}")]
    DiffParse(String),

    #[error("malformed review: {0}")]
    MalformedReview(String),

    #[error("no applicable patch: {0}")]
    NoApplicablePatch(String),

    #[error("git error: {0}")]
    GitError(String),

    #[error("ci error: {0}")]
    CiError(String),

    #[error("background task failed: {0}")]
    TaskJoin(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for Healgate domain operations.
pub type Result<T> = std::result::Result<T, HealgateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_healgate_error_display() {
        let err = HealgateError::UnsafePath("../../etc/passwd".to_string());
        assert!(err.to_string().contains("unsafe path"));

        let err = HealgateError::OutOfScopePath("scripts/deploy.sh".to_string());
        assert!(err.to_string().contains("outside allow-list"));

        let err = HealgateError::GitError("fatal: not a git repository".to_string());
        assert!(err.to_string().contains("git error"));
    }

    #[test]
    fn test_digest_mismatch_error() {
        let err = HealgateError::DigestMismatch {
            expected: "abc123".to_string(),
            actual: "def456".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("abc123"));
        assert!(msg.contains("def456"));
    }

    #[test]
    fn test_empty_allow_list_error() {
        let err = HealgateError::EmptyAllowList;
        assert!(err.to_string().contains("must not be empty"));
    }
}
