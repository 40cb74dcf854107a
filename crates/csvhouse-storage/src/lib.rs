//! csvhouse Storage Layer
//!
//! This crate stores very large CSV datasets in S3-compatible object storage
//! by splitting them into fixed-size row segments, and serves offset-addressed
//! pages against that layout without ever loading a whole dataset.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────┐
//! │   Upload    │  .csv / .tsv body
//! └──────┬──────┘
//!        │ rows
//!        ▼
//! ┌───────────────────┐
//! │ IngestionPipeline │  fine | coarse | batch | stream
//! │ - Cuts segments   │
//! │ - Worker pool     │
//! └────────┬──────────┘
//!          │ header + rows per segment
//!          ▼
//! ┌─────────────────┐
//! │   BlobStore     │  {dataset_key}/segment-{n}.csv
//! │  (S3/local/mem) │
//! └────────┬────────┘
//!          │ segment bytes
//!          ▼
//! ┌─────────────────┐
//! │  ContentCache   │  bounded, size + age eviction
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ SegmentedReader │  LineSkipScanner to the offset,
//! │                 │  stitches across segments
//! └────────┬────────┘
//!          │ PageResult { header, rows, hasMore }
//!          ▼
//! ┌─────────────┐
//! │   Callers   │
//! └─────────────┘
//! ```
//!
//! ## Main Components
//!
//! ### IngestionPipeline
//! Splits a row stream into segments of `segment_size` rows. Every segment
//! repeats the header, so segments can be persisted in any order.
//!
//! ### SegmentedReader
//! Maps a global `(offset, limit)` onto segment `offset / segment_size`,
//! skips to `offset % segment_size` and reads on into following segments as
//! needed.
//!
//! ### ContentCache
//! Keeps fetched segment content in memory under a byte capacity; a periodic
//! sweep drops entries that have not been read recently.
//!
//! ### LineSkipScanner
//! Skips N lines by counting newlines in 4KB blocks, switching to line-by-line
//! reads near the target and rewinding to correct any overshoot.
//!
//! ### Metrics
//! Cache, object store and segment write activity is counted in Prometheus
//! collectors (see [`metrics`]).
//!
//! ## Usage Example
//!
//! ```ignore
//! use csvhouse_storage::{CsvhouseConfig, DatasetManager, ObjectBlobStore, PageRequest, UploadRequest};
//!
//! let config = CsvhouseConfig::from_env()?;
//! let store = Arc::new(ObjectBlobStore::new(object_store, &config.store));
//! let manager = DatasetManager::new(store, config.clone())?;
//!
//! let file = std::fs::File::open("events.csv")?;
//! let receipt = manager
//!     .upload(UploadRequest::new("channel-1", "events.csv", config.ingest.clone()), file)
//!     .await?;
//!
//! let page = manager
//!     .read_page(&PageRequest::new(receipt.dataset_key, 49_995, 10))
//!     .await?;
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod ingest;
pub mod manager;
pub mod metrics;
pub mod reader;
pub mod scanner;
pub mod segment;
pub mod store;
pub mod upload;

pub use cache::{CacheStats, ContentCache};
pub use config::{
    CacheConfig, CsvhouseConfig, IngestConfig, IngestMode, IngestStrategy, ReadConfig, StoreConfig,
};
pub use error::{Error, ErrorKind, Result};
pub use ingest::{IngestSummary, IngestionPipeline, RowIter, RowSource};
pub use manager::DatasetManager;
pub use reader::{PageRequest, PageResult, SegmentedReader};
pub use scanner::{LineSkipScanner, SkipOutcome, SkipSource, Unseekable};
pub use segment::{segment_key, Row, SegmentBatch, SegmentReader, SegmentSink, SegmentStats, SegmentWriter};
pub use store::{BlobStore, ObjectBlobStore};
pub use upload::{FileKind, UploadReceipt, UploadRequest, UploadService};
