//! Unified error types for stitchcap.
//!
//! Every variant renders with a stable code prefix so callers (and the MCP
//! surface) can match on the failure class without parsing prose.

use rmcp::model::{ErrorCode, ErrorData as McpError};
use tokio_rusqlite::rusqlite;

/// Unified error types for the capture pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters (e.g., an empty selector).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// The persistent asset store could not be opened.
    ///
    /// Callers degrade to memory-only / network-only operation.
    #[error("STORAGE_UNAVAILABLE: {0}")]
    StorageUnavailable(String),

    /// Database operation failed.
    #[error("STORAGE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("STORAGE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// A persisted record could not be decoded.
    #[error("STORAGE_ERROR: corrupt record {key}: {reason}")]
    CorruptRecord { key: String, reason: String },

    /// Invalid URL.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// HTTP error response.
    #[error("HTTP_ERROR: {0}")]
    HttpError(String),

    /// The server could not be reached or the body could not be read.
    #[error("NETWORK_ERROR: {0}")]
    Unreachable(String),

    /// Fetch response too large.
    #[error("FETCH_TOO_LARGE: {0}")]
    FetchTooLarge(String),

    /// A single image or font could not be retrieved, or was the wrong type.
    #[error("RESOURCE_FETCH_FAILED: {url}: {reason}")]
    ResourceFetchFailed { url: String, reason: String },

    /// No nodes were supplied, or the content region could not be located.
    #[error("CAPTURE_ABORTED: {0}")]
    CaptureAborted(String),

    /// Another capture is already in flight on this service.
    #[error("CAPTURE_BUSY: a capture is already in progress")]
    CaptureBusy,

    /// The rasterization service failed on a node.
    #[error("RASTERIZATION_FAILED: {node}: {reason}")]
    RasterizationFailed { node: String, reason: String },

    /// Encoding the composited canvas failed.
    #[error("ENCODE_FAILED: {0}")]
    EncodeFailed(String),
}

impl Error {
    /// Shorthand for [`Error::ResourceFetchFailed`].
    pub fn fetch_failed(url: impl Into<String>, reason: impl ToString) -> Self {
        Error::ResourceFetchFailed { url: url.into(), reason: reason.to_string() }
    }

    /// Shorthand for [`Error::RasterizationFailed`].
    pub fn raster_failed(node: impl Into<String>, reason: impl ToString) -> Self {
        Error::RasterizationFailed { node: node.into(), reason: reason.to_string() }
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<Error> for McpError {
    fn from(err: Error) -> Self {
        let (code, message) = match &err {
            Error::InvalidInput(msg) => (-32602, msg.clone()),
            Error::InvalidUrl(msg) => (-32003, msg.clone()),
            Error::StorageUnavailable(msg) => (-32002, msg.clone()),
            Error::Database(e) => (-32002, e.to_string()),
            Error::MigrationFailed(msg) => (-32002, msg.clone()),
            Error::CorruptRecord { .. } => (-32002, err.to_string()),
            Error::HttpError(msg) => (-32008, msg.clone()),
            Error::Unreachable(msg) => (-32008, msg.clone()),
            Error::FetchTooLarge(msg) => (-32007, msg.clone()),
            Error::ResourceFetchFailed { .. } => (-32008, err.to_string()),
            Error::CaptureAborted(msg) => (-32020, msg.clone()),
            Error::CaptureBusy => (-32021, "A capture is already in progress".to_string()),
            Error::RasterizationFailed { .. } => (-32022, err.to_string()),
            Error::EncodeFailed(msg) => (-32023, msg.clone()),
        };

        McpError { code: ErrorCode(code), message: message.into(), data: None }
    }
}
