//! Segment Storage Format
//!
//! A dataset is stored as an ordered run of segment objects, each a standalone
//! CSV file that repeats the dataset header.
//!
//! ## Object Layout
//!
//! ```text
//! {dataset_key}/segment-0.csv   header + rows [0, S)
//! {dataset_key}/segment-1.csv   header + rows [S, 2S)
//! ...
//! {dataset_key}/segment-k.csv   header + rows [kS, R)     (may be short)
//! ```
//!
//! `S` is the segment size the dataset was ingested with. Global row `r` lives
//! in segment `r / S` at in-segment position `r % S`.
//!
//! ## Why a Replicated Header?
//!
//! - Every segment parses on its own with any CSV tool
//! - Segments can be persisted in any order
//! - A reader starting mid-dataset never touches segment 0
//!
//! ## Usage
//!
//! ### Writing a Segment
//! ```ignore
//! let mut writer = SegmentWriter::new(&header)?;
//! for row in rows {
//!     writer.append(&row)?;
//! }
//! let content = writer.finish()?;
//! ```
//!
//! ### Reading a Segment
//! ```ignore
//! let (mut reader, _) = SegmentReader::open_at(content, &scanner, 4_995)?;
//! while let Some(row) = reader.next_row()? {
//!     // ...
//! }
//! ```

mod reader;
mod writer;

pub use reader::SegmentReader;
pub use writer::{SegmentSink, SegmentStats, SegmentWriter};

/// A single CSV record: ordered string fields.
pub type Row = Vec<String>;

/// Object key of segment `index` of the dataset stored under `dataset_key`.
pub fn segment_key(dataset_key: &str, index: u64) -> String {
    format!("{}/segment-{}.csv", dataset_key, index)
}

/// Rows destined for one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentBatch {
    pub index: u64,
    pub rows: Vec<Row>,
}

impl SegmentBatch {
    pub fn new(index: u64, rows: Vec<Row>) -> Self {
        Self { index, rows }
    }

    pub fn row_count(&self) -> u64 {
        self.rows.len() as u64
    }
}
