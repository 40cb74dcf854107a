//! Blob Store - The Object Store Collaborator
//!
//! Everything the core needs from the object store is "get bytes by key" and
//! "put bytes by key". [`BlobStore`] names exactly that surface so the cache,
//! the segment writer and the tests can swap the backing store freely.
//!
//! [`ObjectBlobStore`] adapts any `object_store::ObjectStore` (S3, local
//! filesystem, in-memory) and adds the hardening the core relies on:
//!
//! - Every call is bounded by a timeout and fails with [`Error::Timeout`]
//! - `NotFound` from the backend is surfaced as [`Error::NotFound`]
//! - Puts are retried with exponential backoff (100ms, 200ms, 400ms, ...),
//!   capped at 10s between attempts
//! - Requests, latency and errors are counted in [`crate::metrics`]
//!
//! ## Usage
//!
//! ```ignore
//! let store = ObjectBlobStore::new(Arc::new(AmazonS3Builder::from_env().build()?), &config);
//! store.put("csv_upload/ch/2024-01-01-00-00-00/segment-0.csv", bytes).await?;
//! let content = store.get("csv_upload/ch/2024-01-01-00-00-00/segment-0.csv").await?;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use object_store::{memory::InMemory, path::Path, ObjectStore, PutPayload};

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::metrics;

const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Get and put opaque byte blobs by '/'-delimited key.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Bytes>;

    async fn put(&self, key: &str, data: Bytes) -> Result<()>;

    /// Persist several objects. Stops at the first failure; objects written
    /// before it are left in place.
    async fn put_many(&self, objects: Vec<(String, Bytes)>) -> Result<()> {
        let total = objects.len();
        for (i, (key, data)) in objects.into_iter().enumerate() {
            self.put(&key, data).await?;
            tracing::debug!(key = %key, done = i + 1, total, "Batch put progress");
        }
        Ok(())
    }
}

/// [`BlobStore`] backed by an `object_store` implementation.
pub struct ObjectBlobStore {
    inner: Arc<dyn ObjectStore>,
    timeout: Duration,
    upload_retries: u32,
}

impl ObjectBlobStore {
    pub fn new(inner: Arc<dyn ObjectStore>, config: &StoreConfig) -> Self {
        Self {
            inner,
            timeout: config.timeout(),
            upload_retries: config.upload_retries,
        }
    }

    /// In-memory store with default settings, for tests and local tooling.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()), &StoreConfig::default())
    }

    pub fn inner(&self) -> &Arc<dyn ObjectStore> {
        &self.inner
    }

    async fn bounded<T, F>(&self, operation: &'static str, key: &str, fut: F) -> Result<T>
    where
        F: Future<Output = object_store::Result<T>>,
    {
        metrics::STORE_REQUESTS_TOTAL
            .with_label_values(&[operation])
            .inc();
        let start = Instant::now();

        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => {
                metrics::STORE_LATENCY
                    .with_label_values(&[operation])
                    .observe(start.elapsed().as_secs_f64());
                Ok(value)
            }
            Ok(Err(object_store::Error::NotFound { .. })) => Err(Error::NotFound(key.to_string())),
            Ok(Err(e)) => Err(Error::ObjectStore(e)),
            Err(_) => Err(Error::Timeout {
                operation,
                key: key.to_string(),
                after_ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}

#[async_trait]
impl BlobStore for ObjectBlobStore {
    async fn get(&self, key: &str) -> Result<Bytes> {
        let path = Path::from(key);
        let result = self
            .bounded("GET", key, async {
                let result = self.inner.get(&path).await?;
                result.bytes().await
            })
            .await;

        if let Err(e) = &result {
            let error_type = match e {
                Error::NotFound(_) => "not_found",
                Error::Timeout { .. } => "timeout",
                _ => "failed",
            };
            metrics::STORE_ERRORS_TOTAL
                .with_label_values(&["GET", error_type])
                .inc();
        }
        result
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let path = Path::from(key);
        let attempts = self.upload_retries.max(1);
        let mut attempt = 0;

        loop {
            let payload = PutPayload::from(data.clone());
            let err = match self.bounded("PUT", key, self.inner.put(&path, payload)).await {
                Ok(_) => return Ok(()),
                Err(e) => e,
            };

            attempt += 1;
            if attempt >= attempts {
                metrics::STORE_ERRORS_TOTAL
                    .with_label_values(&["PUT", "failed"])
                    .inc();
                tracing::error!(
                    key = %key,
                    attempts,
                    error = %err,
                    "Object upload failed after all retries"
                );
                return Err(err);
            }

            metrics::STORE_ERRORS_TOTAL
                .with_label_values(&["PUT", "retry"])
                .inc();

            let backoff = retry_backoff(attempt);
            tracing::warn!(
                key = %key,
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                error = %err,
                "Object upload failed, retrying"
            );
            tokio::time::sleep(backoff).await;
        }
    }
}

/// Delay before retry number `attempt` (1-based): 100ms doubling per
/// attempt, never more than [`MAX_BACKOFF`].
fn retry_backoff(attempt: u32) -> Duration {
    2_u64
        .checked_pow(attempt.saturating_sub(1))
        .and_then(|factor| factor.checked_mul(100))
        .map(Duration::from_millis)
        .map_or(MAX_BACKOFF, |backoff| backoff.min(MAX_BACKOFF))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;
    use std::sync::atomic::{AtomicU32, Ordering};

    use futures::stream::BoxStream;
    use object_store::{
        GetOptions, GetResult, ListResult, MultipartUpload, ObjectMeta, PutMultipartOpts,
        PutOptions, PutResult,
    };

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = ObjectBlobStore::in_memory();
        let err = store.get("nothing/here.csv").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(ref k) if k == "nothing/here.csv"));
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let store = ObjectBlobStore::in_memory();
        store
            .put("a/segment-0.csv", Bytes::from_static(b"id\n1\n"))
            .await
            .unwrap();
        assert_eq!(
            store.get("a/segment-0.csv").await.unwrap(),
            Bytes::from_static(b"id\n1\n")
        );
    }

    #[tokio::test]
    async fn test_put_many_writes_all() {
        let store = ObjectBlobStore::in_memory();
        store
            .put_many(vec![
                ("d/segment-0.csv".to_string(), Bytes::from_static(b"h\n1\n")),
                ("d/segment-1.csv".to_string(), Bytes::from_static(b"h\n2\n")),
            ])
            .await
            .unwrap();
        assert!(store.get("d/segment-1.csv").await.is_ok());
    }

    /// Object store that fails the first `failures` puts.
    #[derive(Debug)]
    struct FlakyStore {
        inner: InMemory,
        failures: AtomicU32,
    }

    impl fmt::Display for FlakyStore {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "FlakyStore")
        }
    }

    #[async_trait]
    impl ObjectStore for FlakyStore {
        async fn put_opts(
            &self,
            location: &Path,
            payload: PutPayload,
            opts: PutOptions,
        ) -> object_store::Result<PutResult> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(object_store::Error::Generic {
                    store: "flaky",
                    source: "injected failure".into(),
                });
            }
            self.inner.put_opts(location, payload, opts).await
        }

        async fn put_multipart_opts(
            &self,
            location: &Path,
            opts: PutMultipartOpts,
        ) -> object_store::Result<Box<dyn MultipartUpload>> {
            self.inner.put_multipart_opts(location, opts).await
        }

        async fn get_opts(
            &self,
            location: &Path,
            options: GetOptions,
        ) -> object_store::Result<GetResult> {
            self.inner.get_opts(location, options).await
        }

        async fn delete(&self, location: &Path) -> object_store::Result<()> {
            self.inner.delete(location).await
        }

        fn list(&self, prefix: Option<&Path>) -> BoxStream<'_, object_store::Result<ObjectMeta>> {
            self.inner.list(prefix)
        }

        async fn list_with_delimiter(
            &self,
            prefix: Option<&Path>,
        ) -> object_store::Result<ListResult> {
            self.inner.list_with_delimiter(prefix).await
        }

        async fn copy(&self, from: &Path, to: &Path) -> object_store::Result<()> {
            self.inner.copy(from, to).await
        }

        async fn copy_if_not_exists(&self, from: &Path, to: &Path) -> object_store::Result<()> {
            self.inner.copy_if_not_exists(from, to).await
        }
    }

    fn flaky(failures: u32, retries: u32) -> ObjectBlobStore {
        let config = StoreConfig {
            upload_retries: retries,
            ..Default::default()
        };
        ObjectBlobStore::new(
            Arc::new(FlakyStore {
                inner: InMemory::new(),
                failures: AtomicU32::new(failures),
            }),
            &config,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_retries_transient_failures() {
        let store = flaky(2, 3);
        store.put("k", Bytes::from_static(b"x")).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Bytes::from_static(b"x"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_gives_up_after_retries() {
        let store = flaky(5, 3);
        let err = store.put("k", Bytes::from_static(b"x")).await.unwrap_err();
        assert!(matches!(err, Error::ObjectStore(_)));
    }
    #[test]
    fn test_retry_backoff_doubles_and_caps() {
        assert_eq!(retry_backoff(1), Duration::from_millis(100));
        assert_eq!(retry_backoff(2), Duration::from_millis(200));
        assert_eq!(retry_backoff(4), Duration::from_millis(800));
        assert_eq!(retry_backoff(10), MAX_BACKOFF);
        assert_eq!(retry_backoff(65), MAX_BACKOFF);
        assert_eq!(retry_backoff(u32::MAX), MAX_BACKOFF);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_metrics_count_retries_and_misses() {
        let retries = metrics::STORE_ERRORS_TOTAL.with_label_values(&["PUT", "retry"]);
        let failed = metrics::STORE_ERRORS_TOTAL.with_label_values(&["PUT", "failed"]);
        let not_found = metrics::STORE_ERRORS_TOTAL.with_label_values(&["GET", "not_found"]);
        let puts = metrics::STORE_REQUESTS_TOTAL.with_label_values(&["PUT"]);
        let (retries_before, failed_before, not_found_before, puts_before) =
            (retries.get(), failed.get(), not_found.get(), puts.get());

        let store = flaky(5, 2);
        store.put("k", Bytes::from_static(b"x")).await.unwrap_err();
        store.get("missing").await.unwrap_err();

        assert!(retries.get() >= retries_before + 1);
        assert!(failed.get() >= failed_before + 1);
        assert!(not_found.get() >= not_found_before + 1);
        assert!(puts.get() >= puts_before + 2);
    }
}
