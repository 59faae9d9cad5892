//! Coordinator Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Driver failures keep the storage
//! error as a child frame beneath [`ErrorKind::Backend`].

use derive_more::{Display, Error};

/// A coordinator error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for coordinator operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// No backend (or no container) is configured; fix the configuration.
    #[display("storage is not configured")]
    NotConfigured,
    /// The root folder can't be moved, copied, deleted or created.
    #[display("operation not permitted on the root folder")]
    RootFolder,
    /// The destination of a copy or rename is already taken; pick another.
    #[display("destination `{path}` already exists on backend `{backend}`")]
    AlreadyExists { path: String, backend: String },
    /// A copy did not show up on every backend. The destination was rolled
    /// back; `committed` blobs copied before this one were kept.
    #[display("copy verification failed for `{from}` -> `{to}` ({committed} earlier blobs kept)")]
    CopyVerification { from: String, to: String, committed: usize },
    #[display("invalid path: {_0}")]
    InvalidPath(#[error(not(source))] String),
    #[display("not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// A driver call failed on the named backend.
    #[display("backend `{_0}` failed")]
    Backend(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::CopyVerification { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_culprit() {
        let err = ErrorKind::AlreadyExists { path: "archive/readme.txt".to_string(), backend: "b".to_string() };
        assert_eq!(err.to_string(), "destination `archive/readme.txt` already exists on backend `b`");
        let err = ErrorKind::CopyVerification { from: "a".to_string(), to: "b".to_string(), committed: 2 };
        assert!(err.to_string().contains("`a` -> `b`"));
        assert!(err.is_retryable());
        assert!(!ErrorKind::RootFolder.is_retryable());
    }
}
