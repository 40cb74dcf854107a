//! Line Skip Scanner
//!
//! Advances a buffered byte stream past N newline-delimited records without
//! paying one read call per record.
//!
//! ## Strategy
//!
//! Near the target the scanner reads one line at a time. While more than
//! `exact_threshold` lines remain it instead consumes a fixed-size block
//! (default 4KB) and counts the newlines in it, finishing any line the block
//! cut in half:
//!
//! ```text
//! skipped + threshold < n ?   ──yes──►  skip_block (many lines per call)
//!          │no
//!          ▼
//!      skip_line (exactly one line)
//! ```
//!
//! A block of very short lines can carry the cursor past the target. When the
//! source can [`rewind`](SkipSource::rewind), the scanner seeks back to the
//! start, skips the header lines again and lands on the target line by line.
//! When it cannot, the overshoot is accepted and reported in
//! [`SkipOutcome::skipped`]; callers on non-seekable sources must tolerate it.
//!
//! Records containing embedded (quoted) newlines are counted as several lines.

use std::io::{self, BufRead, BufReader, Cursor, Read, Seek, SeekFrom};

pub const DEFAULT_BLOCK_SIZE: usize = 4096;
pub const DEFAULT_EXACT_THRESHOLD: u64 = 100;

/// A buffered source the scanner can skip through.
pub trait SkipSource: BufRead {
    /// Move the cursor back to the very start of the source.
    ///
    /// Returns `None` when the source does not support it.
    fn rewind(&mut self) -> Option<io::Result<()>>;
}

impl<T: AsRef<[u8]>> SkipSource for Cursor<T> {
    fn rewind(&mut self) -> Option<io::Result<()>> {
        self.set_position(0);
        Some(Ok(()))
    }
}

impl<R: Read + Seek> SkipSource for BufReader<R> {
    fn rewind(&mut self) -> Option<io::Result<()>> {
        Some(self.seek(SeekFrom::Start(0)).map(|_| ()))
    }
}

/// Wraps a buffered reader that must be treated as forward-only.
pub struct Unseekable<R>(pub R);

impl<R: Read> Read for Unseekable<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl<R: BufRead> BufRead for Unseekable<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.0.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.0.consume(amt)
    }
}

impl<R: BufRead> SkipSource for Unseekable<R> {
    fn rewind(&mut self) -> Option<io::Result<()>> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkipOutcome {
    /// Lines actually skipped. Exceeds the request only after an uncorrected
    /// overshoot on a forward-only source.
    pub skipped: u64,
    /// Whether an overshoot was corrected by rewinding.
    pub corrected: bool,
}

#[derive(Debug, Clone)]
pub struct LineSkipScanner {
    block_size: usize,
    exact_threshold: u64,
    header_lines: u64,
}

impl Default for LineSkipScanner {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            exact_threshold: DEFAULT_EXACT_THRESHOLD,
            header_lines: 1,
        }
    }
}

impl LineSkipScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    pub fn with_exact_threshold(mut self, threshold: u64) -> Self {
        self.exact_threshold = threshold;
        self
    }

    /// Lines preceding the data that a rewind must skip again (default: 1).
    pub fn with_header_lines(mut self, header_lines: u64) -> Self {
        self.header_lines = header_lines;
        self
    }

    /// Skip `n` lines from the current position, which must sit just past
    /// the header lines.
    ///
    /// Fails with [`io::ErrorKind::UnexpectedEof`] when fewer than `n` lines
    /// remain.
    pub fn skip<S: SkipSource + ?Sized>(&self, source: &mut S, n: u64) -> io::Result<SkipOutcome> {
        let mut skipped = 0u64;

        while skipped < n {
            if !skip_line(source)? {
                return Err(eof(skipped, n));
            }
            skipped += 1;

            if skipped + self.exact_threshold < n {
                skipped += self.skip_block(source)?;
            }
        }

        if skipped == n {
            return Ok(SkipOutcome {
                skipped,
                corrected: false,
            });
        }

        match source.rewind() {
            Some(rewound) => {
                rewound?;
                tracing::trace!(target_lines = n, overshoot = skipped - n, "Rewinding after overshoot");
                for line in 0..self.header_lines + n {
                    if !skip_line(source)? {
                        return Err(eof(line.saturating_sub(self.header_lines), n));
                    }
                }
                Ok(SkipOutcome {
                    skipped: n,
                    corrected: true,
                })
            }
            None => {
                tracing::debug!(
                    target_lines = n,
                    skipped,
                    "Overshoot on forward-only source accepted"
                );
                Ok(SkipOutcome {
                    skipped,
                    corrected: false,
                })
            }
        }
    }

    /// Consume up to `block_size` bytes, finishing a line cut by the block
    /// boundary. Returns the number of lines consumed.
    fn skip_block<S: BufRead + ?Sized>(&self, source: &mut S) -> io::Result<u64> {
        let mut remaining = self.block_size;
        let mut lines = 0u64;
        let mut last = None;

        while remaining > 0 {
            let (take, newlines, tail) = {
                let buf = match source.fill_buf() {
                    Ok(buf) => buf,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                };
                if buf.is_empty() {
                    break;
                }
                let take = buf.len().min(remaining);
                let chunk = &buf[..take];
                let newlines = chunk.iter().filter(|&&b| b == b'\n').count() as u64;
                (take, newlines, chunk.last().copied())
            };
            source.consume(take);
            remaining -= take;
            lines += newlines;
            last = tail;
        }

        if matches!(last, Some(b) if b != b'\n') {
            skip_line(source)?;
            lines += 1;
        }
        Ok(lines)
    }
}

/// Consume through the next '\n'. Returns false at end of stream; an
/// unterminated final line still counts.
fn skip_line<S: BufRead + ?Sized>(source: &mut S) -> io::Result<bool> {
    let mut read_any = false;
    loop {
        let (used, done) = {
            let buf = match source.fill_buf() {
                Ok(buf) => buf,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if buf.is_empty() {
                return Ok(read_any);
            }
            match buf.iter().position(|&b| b == b'\n') {
                Some(i) => (i + 1, true),
                None => (buf.len(), false),
            }
        };
        source.consume(used);
        read_any = true;
        if done {
            return Ok(true);
        }
    }
}

fn eof(skipped: u64, wanted: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("stream ended after {} of {} lines", skipped, wanted),
    )
}
