//! Segment Reader
//!
//! Parses a segment's content: the replicated header, then rows in order.
//! [`SegmentReader::open_at`] positions the reader at an in-segment row using
//! the [`LineSkipScanner`] instead of parsing the skipped rows.

use std::io::{BufRead, Cursor};

use bytes::Bytes;

use super::Row;
use crate::error::{Error, Result};
use crate::scanner::{LineSkipScanner, SkipOutcome};

pub struct SegmentReader {
    header: Row,
    records: csv::Reader<Cursor<Bytes>>,
    record: csv::StringRecord,
}

impl SegmentReader {
    /// Open a segment positioned at its first row.
    pub fn open(content: Bytes) -> Result<Self> {
        let mut cursor = Cursor::new(content);
        let header = read_header(&mut cursor)?;
        Ok(Self::from_parts(header, cursor))
    }

    /// Open a segment positioned `skip` rows past its header.
    ///
    /// Fails with an [`std::io::ErrorKind::UnexpectedEof`] I/O error when the
    /// segment holds fewer than `skip` rows.
    pub fn open_at(
        content: Bytes,
        scanner: &LineSkipScanner,
        skip: u64,
    ) -> Result<(Self, SkipOutcome)> {
        let mut cursor = Cursor::new(content);
        let header = read_header(&mut cursor)?;
        let outcome = scanner.skip(&mut cursor, skip)?;
        Ok((Self::from_parts(header, cursor), outcome))
    }

    fn from_parts(header: Row, cursor: Cursor<Bytes>) -> Self {
        let records = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(cursor);
        Self {
            header,
            records,
            record: csv::StringRecord::new(),
        }
    }

    pub fn header(&self) -> &Row {
        &self.header
    }

    pub fn into_header(self) -> Row {
        self.header
    }

    /// Next row, or `None` once the segment is exhausted.
    pub fn next_row(&mut self) -> Result<Option<Row>> {
        match self.records.read_record(&mut self.record) {
            Ok(true) => Ok(Some(self.record.iter().map(String::from).collect())),
            Ok(false) => Ok(None),
            Err(e) => Err(Error::from_csv(e)),
        }
    }
}

/// Consume the first line and parse it as the header row.
fn read_header(cursor: &mut Cursor<Bytes>) -> Result<Row> {
    let mut line = Vec::new();
    if cursor.read_until(b'\n', &mut line)? == 0 {
        return Err(Error::MissingHeader);
    }

    let mut parser = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_slice());
    let mut record = csv::StringRecord::new();
    if !parser.read_record(&mut record).map_err(Error::from_csv)? {
        return Err(Error::MissingHeader);
    }
    Ok(record.iter().map(String::from).collect())
}
