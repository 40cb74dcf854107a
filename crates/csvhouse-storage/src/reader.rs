//! Segmented Reader - Offset-Addressed Pages over a Dataset
//!
//! `SegmentedReader` answers `(dataset_key, offset, limit)` with a window of
//! rows, stitching across segment boundaries when the window spans them.
//!
//! ## Read Flow
//!
//! ```text
//! offset = 49,995, limit = 10, segment_size = 50,000
//!         ↓
//! segment = 0, in_segment = 49,995
//!         ↓
//! cache.get(segment-0) → skip 49,995 lines → 5 rows
//!         ↓ (segment exhausted)
//! cache.get(segment-1) → 5 rows            (crossed = true)
//!         ↓
//! 10 rows collected → has_more?
//! ```
//!
//! ## has_more
//!
//! - Fewer than `limit` rows collected: `false`
//! - Otherwise one more row in the current segment: `true`
//! - Otherwise the page crossed a segment boundary: `true`, without checking
//!   further
//! - Otherwise the following segment is fetched; `true` if it exists
//!
//! ## Limitations
//!
//! The in-segment skip only looks at the segment the offset maps to. An
//! offset past the end of a short last segment fails with
//! [`Error::OffsetOutOfRange`] rather than being resolved against another
//! segment. `segment_size` must match the size the dataset was written with.

use std::io;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::cache::ContentCache;
use crate::config::ReadConfig;
use crate::error::{Error, Result};
use crate::scanner::LineSkipScanner;
use crate::segment::{segment_key, Row, SegmentReader};

/// One page request. Deserializes from query parameters with `offset` and
/// `limit` optional; a missing limit falls back to the reader's
/// `default_limit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    #[serde(alias = "key")]
    pub dataset_key: String,

    #[serde(default)]
    pub offset: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl PageRequest {
    pub fn new(dataset_key: impl Into<String>, offset: u64, limit: usize) -> Self {
        Self {
            dataset_key: dataset_key.into(),
            offset,
            limit: Some(limit),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult {
    pub header: Row,
    pub rows: Vec<Row>,
    pub has_more: bool,
}

pub struct SegmentedReader {
    cache: Arc<ContentCache>,
    scanner: LineSkipScanner,
    config: ReadConfig,
}

impl SegmentedReader {
    pub fn new(cache: Arc<ContentCache>, config: ReadConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            cache,
            scanner: LineSkipScanner::new(),
            config,
        })
    }

    pub fn with_scanner(mut self, scanner: LineSkipScanner) -> Self {
        self.scanner = scanner;
        self
    }

    pub fn config(&self) -> &ReadConfig {
        &self.config
    }

    pub async fn read_page(&self, request: &PageRequest) -> Result<PageResult> {
        let limit = request.limit.unwrap_or_else(|| self.config.page_limit());
        self.read(&request.dataset_key, request.offset, limit).await
    }

    /// Read up to `limit` rows starting at global row `offset`.
    #[tracing::instrument(skip(self), fields(segment_size = self.config.segment_size))]
    pub async fn read(&self, dataset_key: &str, offset: u64, limit: usize) -> Result<PageResult> {
        self.validate(dataset_key, limit)?;
        let start = Instant::now();

        let segment_size = self.config.segment_size as u64;
        let mut index = offset / segment_size;
        let in_segment = offset % segment_size;

        let content = self.cache.get(&segment_key(dataset_key, index)).await?;
        let (first, _) = SegmentReader::open_at(content, &self.scanner, in_segment).map_err(|e| {
            match e {
                Error::Io(ref err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                    Error::OffsetOutOfRange {
                        offset,
                        segment: index,
                    }
                }
                other => other,
            }
        })?;

        let header = first.header().clone();
        let mut rows = Vec::with_capacity(limit);
        let mut current = Some(first);
        let mut crossed = false;

        while rows.len() < limit {
            let Some(segment) = current.as_mut() else {
                break;
            };
            match segment.next_row()? {
                Some(row) => rows.push(row),
                None => {
                    index += 1;
                    current = self.open_segment(dataset_key, index).await;
                    crossed |= current.is_some();
                }
            }
        }

        let has_more = if rows.len() < limit {
            false
        } else if let Some(segment) = current.as_mut() {
            if segment.next_row()?.is_some() || crossed {
                true
            } else {
                self.open_segment(dataset_key, index + 1).await.is_some()
            }
        } else {
            false
        };

        tracing::debug!(
            rows = rows.len(),
            has_more,
            last_segment = index,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Page read"
        );

        Ok(PageResult {
            header,
            rows,
            has_more,
        })
    }

    fn validate(&self, dataset_key: &str, limit: usize) -> Result<()> {
        if dataset_key.trim().is_empty() {
            return Err(Error::InvalidRequest("dataset key is required".to_string()));
        }
        if limit == 0 {
            return Err(Error::InvalidRequest("limit must be greater than 0".to_string()));
        }
        if limit > self.config.max_limit {
            return Err(Error::InvalidRequest(format!(
                "limit {} exceeds maximum of {}",
                limit, self.config.max_limit
            )));
        }
        Ok(())
    }

    /// Fetch and open a follow-on segment. Any failure means the dataset
    /// ends before it.
    async fn open_segment(&self, dataset_key: &str, index: u64) -> Option<SegmentReader> {
        let key = segment_key(dataset_key, index);
        let content = match self.cache.get(&key).await {
            Ok(content) => content,
            Err(Error::NotFound(_)) => {
                tracing::debug!(key = %key, "No further segment");
                return None;
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to fetch next segment, ending page");
                return None;
            }
        };

        match SegmentReader::open(content) {
            Ok(reader) => Some(reader),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to open next segment, ending page");
                None
            }
        }
    }
}
