//! Error types for platform requests and chunked uploads.

use std::path::PathBuf;

use reqwest::StatusCode;

/// Failure of a single request to the platform.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server responded with status {status}: {body}")]
    Server { status: StatusCode, body: String },

    #[error("unexpected response: {0}")]
    Protocol(String),

    #[error("invalid endpoint URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl ApiError {
    /// The HTTP status returned by the server, if the request got that far.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Transport(e) => e.status(),
            ApiError::Server { status, .. } => Some(*status),
            ApiError::Protocol(_) | ApiError::InvalidUrl(_) => None,
        }
    }
}

/// Failure of a chunked file upload. The in-flight file is abandoned.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("unable to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("chunk size must be at least one byte")]
    InvalidChunkSize,

    #[error("failed to upload part {part_number} of {file_name} at offset {offset}: {source}")]
    Chunk {
        file_name: String,
        part_number: u64,
        offset: u64,
        #[source]
        source: ApiError,
    },

    #[error("upload of {} ended before the last chunk was acknowledged", .0.display())]
    Incomplete(PathBuf),
}

impl UploadError {
    /// The request-level cause, when a chunk request failed.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            UploadError::Chunk { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// A batch stopped at its first failing file. Later files were not sent.
#[derive(Debug, thiserror::Error)]
#[error("failed to upload {file_name} ({index}/{}): {source}", .report.total)]
pub struct BatchError {
    pub file_name: String,
    /// 1-based position of the failing file.
    pub index: usize,
    /// Files completed before the failure.
    pub report: crate::batch::BatchReport,
    #[source]
    pub source: UploadError,
}
