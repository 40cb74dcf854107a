//! Ingestion Pipeline - Splitting a Row Stream into Segments
//!
//! `IngestionPipeline` reads rows from a [`RowSource`], cuts them into
//! segments of `segment_size` rows and persists each one through a
//! [`SegmentSink`]. How segments reach the store depends on the mode:
//!
//! ## Strategies
//!
//! ```text
//! fine / coarse  (sequential-eager)
//!   read S rows → put segment-0 → read S rows → put segment-1 → ...
//!
//! batch  (batch-deferred)
//!   read everything → encode all segments → put_many
//!
//! stream  (concurrent)
//!   reader ──► bounded job queue (capacity W) ──► W workers ──► put
//!                                                    │
//!   reader ◄────────── result channel ◄──────────────┘
//! ```
//!
//! In stream mode the reader blocks while the queue is full, so parsing never
//! runs far ahead of uploading. Once the source is exhausted the pipeline
//! knows how many segments it dispatched and waits for exactly that many
//! successes. The first failure ends the wait immediately; the remaining
//! workers are aborted when the pool is dropped.
//!
//! ## Failure Semantics
//!
//! Segments written before a failure are left in place. A failed ingestion
//! must be treated as non-authoritative: the dataset may have gaps.
//!
//! - Sequential failures name the segment: [`Error::SegmentWriteFailed`]
//! - Batch and concurrent failures are aggregate: [`Error::IngestFailed`]

use std::io::Read;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

use crate::config::{IngestConfig, IngestStrategy};
use crate::error::{Error, Result};
use crate::metrics;
use crate::segment::{Row, SegmentBatch, SegmentSink, SegmentStats};
use crate::store::BlobStore;

/// Produces rows until exhausted.
pub trait RowSource {
    fn next_row(&mut self) -> Result<Option<Row>>;
}

impl<R: Read> RowSource for csv::Reader<R> {
    fn next_row(&mut self) -> Result<Option<Row>> {
        let mut record = csv::StringRecord::new();
        match self.read_record(&mut record) {
            Ok(true) => Ok(Some(record.iter().map(String::from).collect())),
            Ok(false) => Ok(None),
            Err(e) => Err(Error::from_csv(e)),
        }
    }
}

/// Adapts an iterator of rows into a [`RowSource`].
pub struct RowIter<I>(pub I);

impl<I: Iterator<Item = Row>> RowSource for RowIter<I> {
    fn next_row(&mut self) -> Result<Option<Row>> {
        Ok(self.0.next())
    }
}

/// Totals for a completed ingestion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub segment_count: u64,
    pub total_rows: u64,
    /// Encoded bytes written across all segments
    pub total_bytes: u64,
}

impl IngestSummary {
    fn record(&mut self, rows: u64, bytes: u64) {
        self.segment_count += 1;
        self.total_rows += rows;
        self.total_bytes += bytes;
    }
}

/// Cuts a row source into numbered segment batches.
struct Batcher<'a, S: ?Sized> {
    source: &'a mut S,
    segment_size: usize,
    next_index: u64,
}

impl<'a, S: RowSource + ?Sized> Batcher<'a, S> {
    fn new(source: &'a mut S, segment_size: usize) -> Self {
        Self {
            source,
            segment_size,
            next_index: 0,
        }
    }

    fn next_batch(&mut self) -> Result<Option<SegmentBatch>> {
        let mut rows = Vec::with_capacity(self.segment_size.min(64 * 1024));
        while rows.len() < self.segment_size {
            match self.source.next_row()? {
                Some(row) => rows.push(row),
                None => break,
            }
        }
        if rows.is_empty() {
            return Ok(None);
        }

        let batch = SegmentBatch::new(self.next_index, rows);
        self.next_index += 1;
        Ok(Some(batch))
    }
}

pub struct IngestionPipeline {
    store: Arc<dyn BlobStore>,
    config: IngestConfig,
}

impl IngestionPipeline {
    pub fn new(store: Arc<dyn BlobStore>, config: IngestConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { store, config })
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Split `source` into segments under `dataset_key` and persist them.
    ///
    /// Rows are read synchronously from `source` on the calling task, so a
    /// source that blocks on I/O stalls that task's worker thread while it
    /// waits.
    pub async fn ingest<S: RowSource + ?Sized>(
        &self,
        dataset_key: &str,
        header: Row,
        source: &mut S,
    ) -> Result<IngestSummary> {
        let start = Instant::now();
        let sink = SegmentSink::new(self.store.clone(), dataset_key, header);
        let batcher = Batcher::new(source, self.config.segment_size);

        let summary = match self.config.mode.strategy() {
            IngestStrategy::SequentialEager => self.ingest_sequential(&sink, batcher).await?,
            IngestStrategy::BatchDeferred => self.ingest_batch(&sink, batcher).await?,
            IngestStrategy::Concurrent => self.ingest_concurrent(&sink, batcher).await?,
        };

        tracing::info!(
            dataset_key = %dataset_key,
            mode = self.config.mode.as_str(),
            segments = summary.segment_count,
            rows = summary.total_rows,
            bytes = summary.total_bytes,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Ingestion completed"
        );

        Ok(summary)
    }

    async fn ingest_sequential<S: RowSource + ?Sized>(
        &self,
        sink: &SegmentSink,
        mut batcher: Batcher<'_, S>,
    ) -> Result<IngestSummary> {
        let mut summary = IngestSummary::default();

        while let Some(batch) = batcher.next_batch()? {
            let stats = sink.persist(&batch).await.map_err(|e| {
                tracing::error!(
                    dataset_key = %sink.dataset_key(),
                    segment = batch.index,
                    error = %e,
                    "Failed to upload segment"
                );
                Error::SegmentWriteFailed {
                    segment: batch.index,
                    source: Box::new(e),
                }
            })?;
            summary.record(stats.rows, stats.bytes);
        }

        Ok(summary)
    }

    async fn ingest_batch<S: RowSource + ?Sized>(
        &self,
        sink: &SegmentSink,
        mut batcher: Batcher<'_, S>,
    ) -> Result<IngestSummary> {
        let mut summary = IngestSummary::default();
        let mut objects = Vec::new();
        let mut sizes = Vec::new();

        while let Some(batch) = batcher.next_batch()? {
            let (key, content) = sink.encode(&batch)?;
            summary.record(batch.row_count(), content.len() as u64);
            sizes.push((batch.row_count(), content.len() as u64));
            objects.push((key, content));
        }

        if objects.is_empty() {
            return Ok(summary);
        }

        tracing::info!(
            dataset_key = %sink.dataset_key(),
            segments = objects.len(),
            bytes = summary.total_bytes,
            "Starting batch upload"
        );

        sink.store().put_many(objects).await.map_err(|e| {
            tracing::error!(
                dataset_key = %sink.dataset_key(),
                error = %e,
                "Batch upload failed"
            );
            Error::IngestFailed(format!("batch upload failed: {}", e))
        })?;

        for (rows, bytes) in sizes {
            metrics::record_segment(rows, bytes);
        }
        Ok(summary)
    }

    async fn ingest_concurrent<S: RowSource + ?Sized>(
        &self,
        sink: &SegmentSink,
        mut batcher: Batcher<'_, S>,
    ) -> Result<IngestSummary> {
        let workers = self.config.effective_workers();

        let (job_tx, job_rx) = mpsc::channel::<SegmentBatch>(workers);
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<Result<SegmentStats>>();

        let mut pool = JoinSet::new();
        for worker in 0..workers {
            let job_rx = Arc::clone(&job_rx);
            let result_tx = result_tx.clone();
            let sink = sink.clone();

            pool.spawn(async move {
                loop {
                    let job = job_rx.lock().await.recv().await;
                    let Some(batch) = job else {
                        break;
                    };

                    tracing::debug!(
                        worker,
                        segment = batch.index,
                        rows = batch.rows.len(),
                        "Worker picked up segment"
                    );

                    let result = sink.persist(&batch).await.map_err(|e| Error::SegmentWriteFailed {
                        segment: batch.index,
                        source: Box::new(e),
                    });
                    if result_tx.send(result).is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        let mut progress = Progress::new(sink.dataset_key());

        while let Some(batch) = batcher.next_batch()? {
            // Wait for queue space, but stop as soon as a worker reports a failure.
            let permit = loop {
                tokio::select! {
                    permit = job_tx.reserve() => {
                        break permit.map_err(|_| {
                            Error::IngestFailed("upload workers stopped unexpectedly".to_string())
                        })?;
                    }
                    Some(result) = result_rx.recv() => progress.observe(result)?,
                }
            };
            progress.dispatched(batch.row_count());
            permit.send(batch);
        }
        drop(job_tx);

        while progress.outstanding() {
            match result_rx.recv().await {
                Some(result) => progress.observe(result)?,
                None => {
                    return Err(Error::IngestFailed(
                        "upload workers stopped before all segments completed".to_string(),
                    ))
                }
            }
        }

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                tracing::warn!(error = %e, "Upload worker did not exit cleanly");
            }
        }

        Ok(progress.summary)
    }
}

/// Folds worker results for the concurrent strategy.
struct Progress<'a> {
    dataset_key: &'a str,
    expected: u64,
    succeeded: u64,
    summary: IngestSummary,
}

impl<'a> Progress<'a> {
    fn new(dataset_key: &'a str) -> Self {
        Self {
            dataset_key,
            expected: 0,
            succeeded: 0,
            summary: IngestSummary::default(),
        }
    }

    fn dispatched(&mut self, rows: u64) {
        self.expected += 1;
        self.summary.segment_count += 1;
        self.summary.total_rows += rows;
    }

    fn outstanding(&self) -> bool {
        self.succeeded < self.expected
    }

    fn observe(&mut self, result: Result<SegmentStats>) -> Result<()> {
        match result {
            Ok(stats) => {
                self.succeeded += 1;
                self.summary.total_bytes += stats.bytes;
                if self.succeeded % 10 == 0 {
                    tracing::info!(
                        dataset_key = %self.dataset_key,
                        completed = self.succeeded,
                        dispatched = self.expected,
                        "Segment upload progress"
                    );
                }
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    dataset_key = %self.dataset_key,
                    error = %e,
                    "Segment upload failed"
                );
                Err(Error::IngestFailed(
                    "one or more segments failed to upload".to_string(),
                ))
            }
        }
    }
}
