//! Segment Writer
//!
//! `SegmentWriter` serializes a header and a batch of rows into standard CSV
//! bytes. `SegmentSink` pairs it with a [`BlobStore`] and a dataset key so the
//! ingestion pipeline can hand it a [`SegmentBatch`] and get it persisted.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;

use super::{segment_key, Row, SegmentBatch};
use crate::error::{Error, Result};
use crate::metrics;
use crate::store::BlobStore;

/// Serializes one segment: header first, then rows.
pub struct SegmentWriter {
    writer: csv::Writer<Vec<u8>>,
    rows: u64,
}

impl SegmentWriter {
    pub fn new(header: &[String]) -> Result<Self> {
        let mut writer = csv::WriterBuilder::new()
            .flexible(true)
            .from_writer(Vec::new());
        writer.write_record(header)?;
        Ok(Self { writer, rows: 0 })
    }

    /// Append a row. Field counts are not checked against the header.
    pub fn append(&mut self, row: &[String]) -> Result<()> {
        self.writer.write_record(row)?;
        self.rows += 1;
        Ok(())
    }

    pub fn row_count(&self) -> u64 {
        self.rows
    }

    pub fn finish(self) -> Result<Bytes> {
        let buf = self
            .writer
            .into_inner()
            .map_err(|e| Error::Io(e.into_error()))?;
        Ok(Bytes::from(buf))
    }

    /// Serialize `header` and `rows` in one call.
    pub fn encode(header: &[String], rows: &[Row]) -> Result<Bytes> {
        let mut writer = Self::new(header)?;
        for row in rows {
            writer.append(row)?;
        }
        writer.finish()
    }
}

/// Outcome of persisting one segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentStats {
    pub segment: u64,
    pub rows: u64,
    pub bytes: u64,
    pub duration: Duration,
}

impl SegmentStats {
    pub fn mb_per_sec(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.bytes as f64 / (1024.0 * 1024.0) / secs
    }
}

/// Encodes and persists the segments of one dataset.
#[derive(Clone)]
pub struct SegmentSink {
    store: Arc<dyn BlobStore>,
    dataset_key: Arc<str>,
    header: Arc<Row>,
}

impl SegmentSink {
    pub fn new(store: Arc<dyn BlobStore>, dataset_key: &str, header: Row) -> Self {
        Self {
            store,
            dataset_key: Arc::from(dataset_key),
            header: Arc::new(header),
        }
    }

    pub fn dataset_key(&self) -> &str {
        &self.dataset_key
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    /// Object key and content for `batch`.
    pub fn encode(&self, batch: &SegmentBatch) -> Result<(String, Bytes)> {
        let content = SegmentWriter::encode(&self.header, &batch.rows)?;
        Ok((segment_key(&self.dataset_key, batch.index), content))
    }

    /// Encode and put `batch`.
    pub async fn persist(&self, batch: &SegmentBatch) -> Result<SegmentStats> {
        let start = Instant::now();
        let (key, content) = self.encode(batch)?;
        let bytes = content.len() as u64;

        self.store.put(&key, content).await?;
        metrics::record_segment(batch.row_count(), bytes);

        let stats = SegmentStats {
            segment: batch.index,
            rows: batch.row_count(),
            bytes,
            duration: start.elapsed(),
        };

        tracing::info!(
            dataset_key = %self.dataset_key,
            segment = stats.segment,
            rows = stats.rows,
            bytes = stats.bytes,
            duration_ms = stats.duration.as_millis() as u64,
            mb_per_sec = stats.mb_per_sec(),
            "Segment persisted"
        );

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ObjectBlobStore;

    fn row(fields: &[&str]) -> Row {
        fields.iter().map(|f| f.to_string()).collect()
    }

    #[test]
    fn test_encode_replicates_header() {
        let content = SegmentWriter::encode(
            &row(&["id", "name"]),
            &[row(&["1", "alice"]), row(&["2", "bob"])],
        )
        .unwrap();
        assert_eq!(&content[..], b"id,name\n1,alice\n2,bob\n");
    }

    #[test]
    fn test_fields_are_quoted_when_needed() {
        let content =
            SegmentWriter::encode(&row(&["note"]), &[row(&["a,b"]), row(&["say \"hi\""])])
                .unwrap();
        assert_eq!(&content[..], b"note\n\"a,b\"\n\"say \"\"hi\"\"\"\n");
    }

    #[test]
    fn test_ragged_rows_pass_through() {
        let mut writer = SegmentWriter::new(&row(&["a", "b"])).unwrap();
        writer.append(&row(&["1"])).unwrap();
        writer.append(&row(&["1", "2", "3"])).unwrap();
        assert_eq!(writer.row_count(), 2);
        assert_eq!(&writer.finish().unwrap()[..], b"a,b\n1\n1,2,3\n");
    }

    #[tokio::test]
    async fn test_sink_persists_under_segment_key() {
        let store = Arc::new(ObjectBlobStore::in_memory());
        let sink = SegmentSink::new(store.clone(), "ds", row(&["id"]));
        let writes_before = metrics::SEGMENT_WRITES_TOTAL.get();
        let rows_before = metrics::SEGMENT_ROWS_TOTAL.get();

        let stats = sink
            .persist(&SegmentBatch::new(3, vec![row(&["7"]), row(&["8"])]))
            .await
            .unwrap();

        assert_eq!(stats.segment, 3);
        assert_eq!(stats.rows, 2);
        assert_eq!(stats.bytes, 7);
        assert_eq!(&store.get("ds/segment-3.csv").await.unwrap()[..], b"id\n7\n8\n");
        assert!(metrics::SEGMENT_WRITES_TOTAL.get() >= writes_before + 1);
        assert!(metrics::SEGMENT_ROWS_TOTAL.get() >= rows_before + 2);
    }
}
