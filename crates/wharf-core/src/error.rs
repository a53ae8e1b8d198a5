//! Error taxonomy for wharf operations.
//!
//! Errors are classified by kind, not by concrete type: a backend worker on
//! the far side of a channel can only report a kind plus a detail string, so
//! the whole engine speaks that shape.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ResourceUrl;

/// Classification of an operation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The URL could not be parsed.
    MalformedUrl,
    /// The resource does not exist.
    NotFound,
    /// A file already exists at the destination.
    FileAlreadyExists,
    /// A directory already exists at the destination.
    DirAlreadyExists,
    /// Read access was denied.
    AccessDenied,
    /// Write access was denied.
    WriteAccessDenied,
    /// The backend does not implement the requested command.
    ///
    /// Triggers a fallback strategy inside the engine; it is not meant to
    /// reach the user.
    UnsupportedAction,
    /// The host could not be reached.
    CouldNotConnect,
    /// The connection to the backend broke mid-exchange.
    ConnectionBroken,
    /// The backend worker died.
    WorkerDied,
    /// A symlink cycle, or source and destination denote the same object.
    CyclicLink,
    /// A redirection loop was detected.
    CyclicRedirection,
    /// The user cancelled the operation.
    UserCancelled,
    /// The destination device is out of space.
    DiskFull,
    /// A protocol or state invariant was violated.
    Internal,
}

impl ErrorKind {
    /// Human-readable label used when formatting errors.
    pub fn label(&self) -> &'static str {
        match self {
            Self::MalformedUrl => "malformed URL",
            Self::NotFound => "not found",
            Self::FileAlreadyExists => "file already exists",
            Self::DirAlreadyExists => "directory already exists",
            Self::AccessDenied => "access denied",
            Self::WriteAccessDenied => "write access denied",
            Self::UnsupportedAction => "action not supported by backend",
            Self::CouldNotConnect => "could not connect to host",
            Self::ConnectionBroken => "connection broken",
            Self::WorkerDied => "backend worker died",
            Self::CyclicLink => "cyclic link",
            Self::CyclicRedirection => "cyclic redirection",
            Self::UserCancelled => "cancelled by user",
            Self::DiskFull => "no space left on device",
            Self::Internal => "internal error",
        }
    }
}

/// An operation failure: a kind plus a human-readable detail, usually the
/// offending path.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{}: {detail}", kind.label())]
pub struct OpError {
    pub kind: ErrorKind,
    pub detail: String,
}

impl OpError {
    /// Create an error of the given kind.
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    /// Not-found error for a URL.
    pub fn not_found(url: &ResourceUrl) -> Self {
        Self::new(ErrorKind::NotFound, url.to_string())
    }

    /// Unsupported-action error for a URL.
    pub fn unsupported(url: &ResourceUrl) -> Self {
        Self::new(ErrorKind::UnsupportedAction, url.to_string())
    }

    /// User-cancelled error.
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::UserCancelled, String::new())
    }

    /// Internal invariant violation.
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, detail)
    }

    /// Map an io::Error to a kind, keeping the URL as detail.
    pub fn io(url: &ResourceUrl, source: &std::io::Error) -> Self {
        use std::io::ErrorKind as Io;
        let kind = match source.kind() {
            Io::NotFound => ErrorKind::NotFound,
            Io::PermissionDenied => ErrorKind::AccessDenied,
            Io::AlreadyExists => ErrorKind::FileAlreadyExists,
            Io::StorageFull => ErrorKind::DiskFull,
            Io::ConnectionReset | Io::BrokenPipe => ErrorKind::ConnectionBroken,
            _ => ErrorKind::Internal,
        };
        Self::new(kind, format!("{url}: {source}"))
    }

    /// True for the conflict kinds an orchestrator resolves via the
    /// interaction service instead of failing.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::FileAlreadyExists | ErrorKind::DirAlreadyExists | ErrorKind::CyclicLink
        )
    }

    /// True when this error signals a missing backend capability.
    pub fn is_unsupported(&self) -> bool {
        self.kind == ErrorKind::UnsupportedAction
    }

    /// True when the user cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::UserCancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_mapping() {
        let url = ResourceUrl::parse("file:///tmp/x").unwrap();
        let err = OpError::io(
            &url,
            &std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.kind, ErrorKind::AccessDenied);
        assert!(err.detail.contains("/tmp/x"));
    }

    #[test]
    fn conflict_classification() {
        assert!(OpError::new(ErrorKind::FileAlreadyExists, "x").is_conflict());
        assert!(OpError::new(ErrorKind::CyclicLink, "x").is_conflict());
        assert!(!OpError::new(ErrorKind::NotFound, "x").is_conflict());
    }
}
