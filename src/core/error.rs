use serde::Serialize;
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Job-level failures. Per-item copy failures are not errors at this level;
/// they are accumulated in the report instead.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("source path not found: {0}")]
    SourceMissing(PathBuf),

    #[error("source path is not readable: {0}")]
    SourceUnreadable(PathBuf),

    #[error("destination is not writable: {path}")]
    DestinationUnwritable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("not enough free space: need {needed} bytes, {available} available")]
    InsufficientSpace { needed: u64, available: u64 },

    #[error("invalid exclude pattern `{pattern}`")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("backup cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Broad classification of a per-item failure, for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotFound,
    PermissionDenied,
    InsufficientSpace,
    Unknown,
}

impl FailureKind {
    pub fn from_io_error(error: &io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::NotFound => Self::NotFound,
            io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            _ => match error.raw_os_error() {
                Some(libc::ENOSPC) | Some(libc::EDQUOT) => Self::InsufficientSpace,
                Some(libc::EACCES) | Some(libc::EPERM) => Self::PermissionDenied,
                _ => Self::Unknown,
            },
        }
    }

    /// Plain-language label for end-of-job summaries.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::NotFound => "not found",
            Self::PermissionDenied => "permission denied",
            Self::InsufficientSpace => "not enough free space",
            Self::Unknown => "could not be copied",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_enospc_as_insufficient_space() {
        let error = io::Error::from_raw_os_error(libc::ENOSPC);
        assert_eq!(
            FailureKind::from_io_error(&error),
            FailureKind::InsufficientSpace
        );
    }

    #[test]
    fn classifies_edquot_as_insufficient_space() {
        let error = io::Error::from_raw_os_error(libc::EDQUOT);
        assert_eq!(
            FailureKind::from_io_error(&error),
            FailureKind::InsufficientSpace
        );
    }

    #[test]
    fn classifies_eacces_as_permission_denied() {
        let error = io::Error::from_raw_os_error(libc::EACCES);
        assert_eq!(
            FailureKind::from_io_error(&error),
            FailureKind::PermissionDenied
        );
    }

    #[test]
    fn classifies_not_found_kind() {
        let error = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert_eq!(FailureKind::from_io_error(&error), FailureKind::NotFound);
    }

    #[test]
    fn unclassified_errors_are_unknown() {
        let error = io::Error::other("something else");
        assert_eq!(FailureKind::from_io_error(&error), FailureKind::Unknown);
    }
}
