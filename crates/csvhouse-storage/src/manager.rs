//! Dataset Manager
//!
//! This module implements the top-level coordinator that wires the write path
//! and the read path over one object store.
//!
//! ## What Does DatasetManager Do?
//!
//! DatasetManager is the main entry point for embedding csvhouse. It:
//! - Owns the shared [`BlobStore`] and [`ContentCache`]
//! - Routes uploads to [`UploadService`] and page reads to [`SegmentedReader`]
//! - Starts and stops the cache's background eviction sweep
//! - Registers the Prometheus collectors in [`crate::metrics`]
//!
//! Uploads must use the segment size the reader is configured with; a
//! dataset written with another size could not be paged through this manager.
//!
//! ## Architecture
//!
//! ```text
//! DatasetManager
//!     │
//!     ├─ UploadService ──► IngestionPipeline ──► SegmentSink ──┐
//!     │                                                         ▼
//!     │                                                    BlobStore
//!     │                                                         ▲
//!     └─ SegmentedReader ──► ContentCache ──────────────────────┘
//! ```
//!
//! ## Thread Safety
//!
//! - DatasetManager is Send + Sync
//! - Can be safely shared via `Arc<DatasetManager>`
//!
//! ## Usage
//!
//! ```ignore
//! use csvhouse_storage::{CsvhouseConfig, DatasetManager, ObjectBlobStore};
//!
//! let config = CsvhouseConfig::from_env()?;
//! let store = Arc::new(ObjectBlobStore::new(object_store, &config.store));
//! let manager = DatasetManager::new(store, config)?;
//! manager.start_eviction_sweep();
//!
//! let receipt = manager.upload(UploadRequest::new("ch1", "data.csv", config.ingest), file).await?;
//! let page = manager.read_page(&PageRequest::new(receipt.dataset_key, 0, 100)).await?;
//! ```

use std::io::Read;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::cache::{CacheStats, ContentCache};
use crate::config::CsvhouseConfig;
use crate::error::{Error, Result};
use crate::metrics;
use crate::reader::{PageRequest, PageResult, SegmentedReader};
use crate::store::BlobStore;
use crate::upload::{UploadReceipt, UploadRequest, UploadService};

pub struct DatasetManager {
    cache: Arc<ContentCache>,
    uploads: UploadService,
    reader: SegmentedReader,
    config: CsvhouseConfig,
    sweep: Mutex<Option<JoinHandle<()>>>,
}

impl DatasetManager {
    pub fn new(store: Arc<dyn BlobStore>, config: CsvhouseConfig) -> Result<Self> {
        config.ingest.validate()?;
        metrics::init();
        let cache = Arc::new(ContentCache::from_config(store.clone(), &config.cache));
        let reader = SegmentedReader::new(cache.clone(), config.read.clone())?;
        let uploads = UploadService::new(store, config.store.clone());

        Ok(Self {
            cache,
            uploads,
            reader,
            config,
            sweep: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &CsvhouseConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ContentCache> {
        &self.cache
    }

    /// Start the periodic cache sweep. Calling it again replaces the
    /// running sweep.
    pub fn start_eviction_sweep(&self) {
        let handle = self
            .cache
            .clone()
            .start_eviction_sweep(self.config.cache.sweep_interval(), self.config.cache.max_age());
        if let Some(previous) = self.sweep.lock().replace(handle) {
            previous.abort();
        }
    }

    pub fn stop_eviction_sweep(&self) {
        if let Some(handle) = self.sweep.lock().take() {
            handle.abort();
        }
    }

    pub async fn upload<R: Read>(&self, request: UploadRequest, body: R) -> Result<UploadReceipt> {
        let read_size = self.config.read.segment_size;
        if request.config.segment_size != read_size {
            return Err(Error::InvalidRequest(format!(
                "segment size {} does not match the read segment size {}",
                request.config.segment_size, read_size
            )));
        }
        self.uploads.upload(request, body).await
    }

    pub async fn read_page(&self, request: &PageRequest) -> Result<PageResult> {
        self.reader.read_page(request).await
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

impl Drop for DatasetManager {
    fn drop(&mut self) {
        self.stop_eviction_sweep();
    }
}
