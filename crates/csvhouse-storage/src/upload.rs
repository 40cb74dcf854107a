//! Upload Entry Point
//!
//! `UploadService` turns an uploaded `.csv` / `.tsv` body into a segmented
//! dataset and describes the result in an [`UploadReceipt`].
//!
//! ## Upload Flow
//!
//! ```text
//! UploadRequest { channel_id, file_name, content_length, config }
//!         ↓
//! validate (before any I/O)
//!   - channel id and file name present, channel id without '/'
//!   - extension .csv or .tsv
//!   - declared length within max_upload_bytes
//!         ↓
//! dataset_key = {prefix}/{channel_id}/{%Y-%m-%d-%H-%M-%S}
//!         ↓
//! parse header (tab-delimited for .tsv)
//!         ↓
//! IngestionPipeline::ingest (mode from config)
//!         ↓
//! UploadReceipt
//! ```
//!
//! Bodies without a declared length are still bounded: the body is read
//! through a counting reader that fails once `max_upload_bytes` is exceeded.
//! Rows that cannot be decoded fail the upload with [`Error::InvalidUpload`].
//! Two uploads on the same channel within the same second share a dataset key.
//!
//! The body is a blocking [`Read`] parsed on the calling task. In-memory and
//! local file bodies are fine; a body that blocks on the network should be
//! buffered first or the upload run under `tokio::task::spawn_blocking`.

use std::error::Error as StdError;
use std::fmt;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{IngestConfig, StoreConfig};
use crate::error::{Error, Result};
use crate::ingest::{IngestionPipeline, RowSource};
use crate::segment::Row;
use crate::store::BlobStore;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// Parameters of one upload.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub channel_id: String,
    pub file_name: String,
    /// Length declared by the caller, if any
    pub content_length: Option<u64>,
    pub config: IngestConfig,
}

impl UploadRequest {
    pub fn new(channel_id: impl Into<String>, file_name: impl Into<String>, config: IngestConfig) -> Self {
        Self {
            channel_id: channel_id.into(),
            file_name: file_name.into(),
            content_length: None,
            config,
        }
    }

    pub fn with_content_length(mut self, length: u64) -> Self {
        self.content_length = Some(length);
        self
    }
}

/// Description of a stored dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    pub dataset_key: String,
    pub id: String,
    pub name: String,
    pub ext: String,
    pub content_type: String,
    pub segment_count: u64,
    pub total_rows: u64,
    /// Bytes read from the upload body
    pub total_size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Csv,
    Tsv,
}

impl FileKind {
    pub fn from_file_name(file_name: &str) -> Result<Self> {
        let ext = Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());
        match ext.as_deref() {
            Some("csv") => Ok(FileKind::Csv),
            Some("tsv") => Ok(FileKind::Tsv),
            _ => Err(Error::UnsupportedFileType(file_name.to_string())),
        }
    }

    pub fn ext(self) -> &'static str {
        match self {
            FileKind::Csv => "csv",
            FileKind::Tsv => "tsv",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            FileKind::Csv => "text/csv",
            FileKind::Tsv => "text/tab-separated-values",
        }
    }

    fn reader_builder(self) -> csv::ReaderBuilder {
        let mut builder = csv::ReaderBuilder::new();
        builder.has_headers(false).flexible(true);
        if self == FileKind::Tsv {
            builder.delimiter(b'\t').quoting(false);
        }
        builder
    }
}

/// Returned (wrapped in an I/O error) once a body exceeds its byte budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeLimitExceeded {
    pub limit: u64,
}

impl fmt::Display for SizeLimitExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "upload exceeds maximum size of {} bytes", self.limit)
    }
}

impl StdError for SizeLimitExceeded {}

/// Counts bytes read and fails past `limit`.
pub struct CountingReader<R> {
    inner: R,
    count: u64,
    limit: u64,
}

impl<R: Read> CountingReader<R> {
    pub fn new(inner: R, limit: u64) -> Self {
        Self {
            inner,
            count: 0,
            limit,
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        if self.count > self.limit {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                SizeLimitExceeded { limit: self.limit },
            ));
        }
        Ok(n)
    }
}

/// Upload rows, with decode failures reported against the caller's file.
struct UploadRows<R: Read> {
    records: csv::Reader<CountingReader<R>>,
}

impl<R: Read> UploadRows<R> {
    fn bytes_read(&self) -> u64 {
        self.records.get_ref().count()
    }
}

impl<R: Read> RowSource for UploadRows<R> {
    fn next_row(&mut self) -> Result<Option<Row>> {
        self.records.next_row().map_err(|e| match e {
            Error::MalformedCsv(reason) => Error::InvalidUpload(reason),
            other => other,
        })
    }
}

pub struct UploadService {
    store: Arc<dyn BlobStore>,
    config: StoreConfig,
}

impl UploadService {
    pub fn new(store: Arc<dyn BlobStore>, config: StoreConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Store `body` as a new dataset, keyed by the current UTC time.
    pub async fn upload<R: Read>(&self, request: UploadRequest, body: R) -> Result<UploadReceipt> {
        self.upload_at(request, body, Utc::now()).await
    }

    /// Store `body` as a new dataset keyed by `now`.
    #[tracing::instrument(
        name = "upload",
        skip(self, request, body, now),
        fields(channel_id = %request.channel_id, file_name = %request.file_name, mode = request.config.mode.as_str())
    )]
    pub async fn upload_at<R: Read>(
        &self,
        request: UploadRequest,
        body: R,
        now: DateTime<Utc>,
    ) -> Result<UploadReceipt> {
        let kind = self.validate(&request)?;
        let pipeline = IngestionPipeline::new(self.store.clone(), request.config.clone())?;

        let timestamp = now.format(TIMESTAMP_FORMAT).to_string();
        let dataset_key = format!("{}/{}/{}", self.config.prefix, request.channel_id, timestamp);

        let mut rows = UploadRows {
            records: kind
                .reader_builder()
                .from_reader(CountingReader::new(body, self.config.max_upload_bytes)),
        };

        let header = rows.next_row()?.ok_or(Error::MissingHeader)?;

        let summary = pipeline.ingest(&dataset_key, header, &mut rows).await?;
        let total_size = rows.bytes_read();

        tracing::info!(
            dataset_key = %dataset_key,
            segments = summary.segment_count,
            rows = summary.total_rows,
            size = total_size,
            "Upload stored"
        );

        Ok(UploadReceipt {
            dataset_key,
            id: format!("csv_{}", timestamp),
            name: request.file_name,
            ext: kind.ext().to_string(),
            content_type: kind.content_type().to_string(),
            segment_count: summary.segment_count,
            total_rows: summary.total_rows,
            total_size,
        })
    }

    fn validate(&self, request: &UploadRequest) -> Result<FileKind> {
        if request.channel_id.trim().is_empty() {
            return Err(Error::InvalidRequest("channel id is required".to_string()));
        }
        if request.channel_id.contains('/') {
            return Err(Error::InvalidRequest(format!(
                "channel id '{}' must not contain '/'",
                request.channel_id
            )));
        }
        if request.file_name.trim().is_empty() {
            return Err(Error::InvalidRequest("file name is required".to_string()));
        }

        let kind = FileKind::from_file_name(&request.file_name)?;

        if let Some(length) = request.content_length {
            if length > self.config.max_upload_bytes {
                return Err(Error::PayloadTooLarge {
                    limit: self.config.max_upload_bytes,
                });
            }
        }

        request.config.validate()?;
        Ok(kind)
    }
}
