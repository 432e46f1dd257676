//! Error handling module for the chunked downloader
//!
//! This module defines the error type shared by the planner, the fetcher and the
//! orchestrator, together with the classification used by the retry policy.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::event::FailureKind;

pub type DoveResult<T> = std::result::Result<T, DoveError>;

/// Represents errors that can occur during the download process
#[derive(Error, Debug)]
pub enum DoveError {
    /// Error occurred during HTTP request/response
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Error occurred while reading the response body
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// Invalid URL provided
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Server returned an error status code
    #[error("Server error: {status} {message}")]
    ServerError { status: u16, message: String },

    /// Server answered a range request with a body of the wrong length
    #[error("Server sent {actual} bytes for a range of {expected} bytes")]
    SizeMismatch { expected: u64, actual: u64 },

    /// Server answered a resumed range request with bytes from another offset
    #[error("Server ignored range starting at {expected_start}: status {status}, content range {content_range:?}")]
    RangeIgnored {
        expected_start: u64,
        status: u16,
        content_range: Option<String>,
    },

    /// Failed to determine the length of the remote resource
    #[error("Failed to determine file size: {0}")]
    FileSizeUnknown(String),

    /// The resource needs more chunks than the two-letter naming scheme can express
    #[error("Resource of {total_size} bytes needs {chunks} chunks, the naming scheme allows {limit}")]
    TooManyChunks {
        total_size: u64,
        chunks: u64,
        limit: u64,
    },

    /// Failed to create, write, rename or delete a file under the storage root
    #[error("Storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to create the storage root or a parent directory
    #[error("Failed to create directory at {path}: {error}")]
    DirectoryCreationFailed { path: PathBuf, error: io::Error },

    /// Insufficient disk space
    #[error("Insufficient disk space: need {needed} bytes, available {available} bytes")]
    InsufficientDiskSpace { needed: u64, available: u64 },

    /// Every attempt to fetch a chunk failed
    #[error("Chunk {chunk_index} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        chunk_index: usize,
        attempts: u32,
        last_status: Option<u16>,
        last_error: String,
    },

    /// Failed to serialize or deserialize a job manifest
    #[error("Failed to {action} job manifest: {message}")]
    ManifestError { action: String, message: String },

    /// No job is registered under the given id
    #[error("Unknown job: {0}")]
    UnknownJob(String),

    /// The orchestrator has been shut down and accepts no new work
    #[error("Orchestrator is shut down")]
    ShutDown,

    /// Other unexpected errors
    #[error("Unexpected error: {0}")]
    Other(String),
}

impl DoveError {
    /// Returns true if the error is transient and the operation might succeed if retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::HttpError(e) => !e.is_builder() && !e.is_redirect(),
            Self::IoError(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
            ),
            Self::ServerError { status, .. } => {
                (500..600).contains(status) || *status == 408 || *status == 429
            }
            Self::SizeMismatch { .. } | Self::RangeIgnored { .. } => true,
            _ => false,
        }
    }

    /// Returns true if the error comes from the local filesystem
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Self::Storage { .. }
                | Self::DirectoryCreationFailed { .. }
                | Self::InsufficientDiskSpace { .. }
        )
    }

    /// HTTP status attached to the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ServerError { status, .. } => Some(*status),
            Self::HttpError(e) => e.status().map(|s| s.as_u16()),
            Self::RangeIgnored { status, .. } => Some(*status),
            Self::RetriesExhausted { last_status, .. } => *last_status,
            _ => None,
        }
    }

    /// Maps the error onto the coarse kind reported in `Failed` events
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            e if e.is_storage() => FailureKind::Storage,
            Self::RetriesExhausted { .. } | Self::HttpError(_) | Self::IoError(_) => {
                FailureKind::Network
            }
            Self::ServerError { .. } | Self::SizeMismatch { .. } | Self::RangeIgnored { .. } => {
                FailureKind::Server
            }
            Self::InvalidUrl(_) | Self::FileSizeUnknown(_) | Self::TooManyChunks { .. } => {
                FailureKind::Planning
            }
            _ => FailureKind::Internal,
        }
    }

    /// Creates a new server error
    pub fn server_error(status: u16, message: impl Into<String>) -> Self {
        Self::ServerError {
            status,
            message: message.into(),
        }
    }

    /// Wraps a filesystem error with the path it happened on
    pub fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// Creates a new manifest error
    pub fn manifest_error(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ManifestError {
            action: action.into(),
            message: message.into(),
        }
    }
}
