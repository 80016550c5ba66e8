use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("note '{key}' not found")]
    NotFound { key: String },
    #[error("invalid note key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },
    #[error("uploaded file is not a valid zip archive: {0}")]
    BadArchive(#[source] zip::result::ZipError),
    #[error("writing archive failed: {0}")]
    ArchiveWrite(#[source] zip::result::ZipError),
    #[error("storage io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Non-fatal problem with a single file or archive entry. Collected next to a
/// partial result instead of aborting the operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeWarning {
    pub subject: String,
    pub reason: String,
}

impl DecodeWarning {
    pub fn new(subject: impl Into<String>, reason: impl fmt::Display) -> Self {
        let warning = Self {
            subject: subject.into(),
            reason: reason.to_string(),
        };
        tracing::warn!(subject = %warning.subject, reason = %warning.reason, "skipping unreadable item");
        warning
    }
}

impl fmt::Display for DecodeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.subject, self.reason)
    }
}
