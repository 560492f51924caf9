// ABOUTME: Error types for the slidefold application
// ABOUTME: Provides structured error handling for each stage of the build pipeline

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FoldError {
    #[error("Path not found: {0}")]
    NotFoundError(PathBuf),

    #[error("Failed to read {path:?}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Template error: {0}")]
    TemplateError(String),

    #[error("Failed to write {path:?}: {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Input validation error: {0}")]
    ValidationError(String),

    #[error("Watch error: {0}")]
    WatchError(String),

    #[error("Server error: {0}")]
    ServerError(String),
}

impl FoldError {
    pub(crate) fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FoldError::ReadError {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FoldError::WriteError {
            path: path.into(),
            source,
        }
    }
}

// Directory walking failures surface as read errors on the offending path
impl From<walkdir::Error> for FoldError {
    fn from(err: walkdir::Error) -> Self {
        let path = err.path().map(|p| p.to_path_buf()).unwrap_or_default();
        FoldError::ReadError {
            path,
            source: err.into(),
        }
    }
}

impl From<notify::Error> for FoldError {
    fn from(err: notify::Error) -> Self {
        FoldError::WatchError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FoldError>;
