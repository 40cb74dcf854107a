//! Shared helpers for the storage integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use csvhouse_storage::{BlobStore, Error, ObjectBlobStore, Result, Row, RowIter};

/// In-memory [`BlobStore`] that fails puts for chosen keys, optionally delays
/// the others, and counts every call.
pub struct FaultyStore {
    inner: ObjectBlobStore,
    failing: HashSet<String>,
    put_delay: Option<Duration>,
    gets: AtomicU64,
    puts_started: AtomicU64,
    puts_completed: AtomicU64,
    in_flight: AtomicU64,
    max_in_flight: AtomicU64,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self {
            inner: ObjectBlobStore::in_memory(),
            failing: HashSet::new(),
            put_delay: None,
            gets: AtomicU64::new(0),
            puts_started: AtomicU64::new(0),
            puts_completed: AtomicU64::new(0),
            in_flight: AtomicU64::new(0),
            max_in_flight: AtomicU64::new(0),
        }
    }

    /// Fail every put whose key ends with `suffix` (e.g. "segment-2.csv").
    pub fn failing(mut self, suffix: &str) -> Self {
        self.failing.insert(suffix.to_string());
        self
    }

    /// Delay every put that is not set to fail.
    pub fn with_put_delay(mut self, delay: Duration) -> Self {
        self.put_delay = Some(delay);
        self
    }

    pub fn gets(&self) -> u64 {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn puts_started(&self) -> u64 {
        self.puts_started.load(Ordering::SeqCst)
    }

    pub fn puts_completed(&self) -> u64 {
        self.puts_completed.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> u64 {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn should_fail(&self, key: &str) -> bool {
        self.failing.iter().any(|suffix| key.ends_with(suffix.as_str()))
    }
}

struct InFlight<'a>(&'a AtomicU64);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl BlobStore for FaultyStore {
    async fn get(&self, key: &str) -> Result<Bytes> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        self.puts_started.fetch_add(1, Ordering::SeqCst);
        if self.should_fail(key) {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("injected failure for {}", key),
            )));
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if let Some(delay) = self.put_delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.put(key, data).await?;
        self.puts_completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn header() -> Row {
    vec!["id".to_string(), "name".to_string()]
}

/// Rows `["0", "name-0"]`, `["1", "name-1"]`, ...
pub fn numbered_rows(n: usize) -> RowIter<impl Iterator<Item = Row>> {
    RowIter((0..n).map(|i| vec![i.to_string(), format!("name-{}", i)]))
}

pub fn shared(store: FaultyStore) -> Arc<FaultyStore> {
    Arc::new(store)
}
