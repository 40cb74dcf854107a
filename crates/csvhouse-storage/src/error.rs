//! Storage Error Types
//!
//! This module defines all error types that can occur while ingesting or
//! paging segmented CSV datasets.
//!
//! ## Error Categories
//!
//! Every variant maps onto one of four caller-facing kinds (see [`ErrorKind`]):
//!
//! ### Invalid requests
//! - `InvalidRequest`: bad offset/limit, empty dataset key or channel id
//! - `UnsupportedFileType`: upload name is not `.csv` / `.tsv`
//! - `PayloadTooLarge`: upload body exceeds the configured ceiling
//! - `MissingHeader`: upload body has no header row
//! - `InvalidUpload`: upload body has a row that cannot be decoded
//! - `OffsetOutOfRange`: the in-segment skip ran off the end of the segment
//!
//! ### Not found
//! - `NotFound`: the first segment of a page (or any object) does not exist
//!
//! ### Upstream failures
//! - `ObjectStore`, `Timeout`, `Io`, `Csv`, `Metrics`
//! - `MalformedCsv`: a stored segment cannot be decoded
//!
//! ### Partial ingest failures
//! - `SegmentWriteFailed`: a sequential upload aborted at a known segment
//! - `IngestFailed`: a batch or concurrent upload aborted; segments already
//!   written are left in place
//!
//! ## Usage
//!
//! All storage operations return `Result<T>` which is aliased to
//! `Result<T, Error>`. This allows clean error propagation with `?`.

use thiserror::Error;

use crate::upload::SizeLimitExceeded;

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`], used by callers to pick a response
/// (e.g. an HTTP status code).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRequest,
    NotFound,
    UpstreamFailure,
    PartialIngestFailure,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Unsupported file type: {0} (expected .csv or .tsv)")]
    UnsupportedFileType(String),

    #[error("Upload exceeds maximum size of {limit} bytes")]
    PayloadTooLarge { limit: u64 },

    #[error("Failed to read header")]
    MissingHeader,

    #[error("Failed to read file: {0}")]
    InvalidUpload(String),

    #[error("Malformed CSV: {0}")]
    MalformedCsv(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Offset {offset} exceeds file size (segment {segment})")]
    OffsetOutOfRange { offset: u64, segment: u64 },

    #[error("Failed to upload segment {segment}: {source}")]
    SegmentWriteFailed {
        segment: u64,
        #[source]
        source: Box<Error>,
    },

    #[error("Ingestion failed: {0}")]
    IngestFailed(String),

    #[error("{operation} {key} timed out after {after_ms}ms")]
    Timeout {
        operation: &'static str,
        key: String,
        after_ms: u64,
    },

    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metrics error: {0}")]
    Metrics(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidRequest(_)
            | Error::Config(_)
            | Error::UnsupportedFileType(_)
            | Error::PayloadTooLarge { .. }
            | Error::MissingHeader
            | Error::InvalidUpload(_)
            | Error::OffsetOutOfRange { .. } => ErrorKind::InvalidRequest,
            Error::NotFound(_) | Error::ObjectStore(object_store::Error::NotFound { .. }) => {
                ErrorKind::NotFound
            }
            Error::SegmentWriteFailed { .. } | Error::IngestFailed(_) => {
                ErrorKind::PartialIngestFailure
            }
            Error::MalformedCsv(_)
            | Error::Timeout { .. }
            | Error::ObjectStore(_)
            | Error::Csv(_)
            | Error::Io(_)
            | Error::Metrics(_) => ErrorKind::UpstreamFailure,
        }
    }

    /// Converts a CSV decoding error, surfacing an exhausted upload budget as
    /// [`Error::PayloadTooLarge`] instead of a generic I/O failure.
    pub(crate) fn from_csv(err: csv::Error) -> Self {
        if let csv::ErrorKind::Io(io) = err.kind() {
            if let Some(exceeded) = io
                .get_ref()
                .and_then(|inner| inner.downcast_ref::<SizeLimitExceeded>())
            {
                return Error::PayloadTooLarge {
                    limit: exceeded.limit,
                };
            }
            return Error::Csv(err);
        }
        Error::MalformedCsv(err.to_string())
    }
}
