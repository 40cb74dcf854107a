//! Prometheus Metrics
//!
//! Process-wide collectors for the cache, the object store adapter and the
//! segment write path. They are registered on [`REGISTRY`] by [`init`] and
//! exposed in the text exposition format by [`render`].
//!
//! ## Collectors
//!
//! ### Cache
//! - `csvhouse_cache_hits_total`, `csvhouse_cache_misses_total`
//! - `csvhouse_cache_size_bytes`: bytes currently cached (summed over caches)
//! - `csvhouse_cache_evictions_total{reason}`: `size` | `age`
//!
//! ### Object store
//! - `csvhouse_store_requests_total{operation}`: `GET` | `PUT`
//! - `csvhouse_store_errors_total{operation, error_type}`: `not_found`,
//!   `timeout`, `retry`, `failed`
//! - `csvhouse_store_latency_seconds{operation}`
//!
//! ### Segments
//! - `csvhouse_segment_writes_total`, `csvhouse_segment_rows_total`,
//!   `csvhouse_segment_bytes_total`

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Once;

use crate::error::{Error, Result};

static INIT: Once = Once::new();

lazy_static! {
    /// Registry holding every csvhouse collector
    pub static ref REGISTRY: Registry = Registry::new();

    // ============================================================================
    // Cache Metrics
    // ============================================================================

    pub static ref CACHE_HITS_TOTAL: IntCounter = IntCounter::new(
        "csvhouse_cache_hits_total",
        "Total content cache hits"
    ).expect("metric can be created");

    pub static ref CACHE_MISSES_TOTAL: IntCounter = IntCounter::new(
        "csvhouse_cache_misses_total",
        "Total content cache misses"
    ).expect("metric can be created");

    /// Cache size in bytes
    pub static ref CACHE_SIZE_BYTES: IntGauge = IntGauge::new(
        "csvhouse_cache_size_bytes",
        "Current content cache size in bytes"
    ).expect("metric can be created");

    pub static ref CACHE_EVICTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("csvhouse_cache_evictions_total", "Total cache entries evicted"),
        &["reason"] // size, age
    ).expect("metric can be created");

    // ============================================================================
    // Object Store Metrics
    // ============================================================================

    pub static ref STORE_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("csvhouse_store_requests_total", "Total object store requests"),
        &["operation"] // GET, PUT
    ).expect("metric can be created");

    pub static ref STORE_ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("csvhouse_store_errors_total", "Total object store errors"),
        &["operation", "error_type"]
    ).expect("metric can be created");

    /// Object store request latency
    pub static ref STORE_LATENCY: HistogramVec = HistogramVec::new(
        HistogramOpts::new("csvhouse_store_latency_seconds", "Object store request latency in seconds")
            .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["operation"]
    ).expect("metric can be created");

    // ============================================================================
    // Segment Metrics
    // ============================================================================

    pub static ref SEGMENT_WRITES_TOTAL: IntCounter = IntCounter::new(
        "csvhouse_segment_writes_total",
        "Total segments written"
    ).expect("metric can be created");

    pub static ref SEGMENT_ROWS_TOTAL: IntCounter = IntCounter::new(
        "csvhouse_segment_rows_total",
        "Total rows written in segments"
    ).expect("metric can be created");

    pub static ref SEGMENT_BYTES_TOTAL: IntCounter = IntCounter::new(
        "csvhouse_segment_bytes_total",
        "Total encoded segment bytes written"
    ).expect("metric can be created");
}

/// Register every collector. Safe to call more than once.
pub fn init() {
    INIT.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(CACHE_HITS_TOTAL.clone()),
            Box::new(CACHE_MISSES_TOTAL.clone()),
            Box::new(CACHE_SIZE_BYTES.clone()),
            Box::new(CACHE_EVICTIONS_TOTAL.clone()),
            Box::new(STORE_REQUESTS_TOTAL.clone()),
            Box::new(STORE_ERRORS_TOTAL.clone()),
            Box::new(STORE_LATENCY.clone()),
            Box::new(SEGMENT_WRITES_TOTAL.clone()),
            Box::new(SEGMENT_ROWS_TOTAL.clone()),
            Box::new(SEGMENT_BYTES_TOTAL.clone()),
        ];
        for collector in collectors {
            if let Err(e) = REGISTRY.register(collector) {
                tracing::warn!(error = %e, "Failed to register metric");
            }
        }
    });
}

/// Registered metrics in the Prometheus text format.
pub fn render() -> Result<String> {
    init();
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&REGISTRY.gather(), &mut buffer)
        .map_err(|e| Error::Metrics(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| Error::Metrics(e.to_string()))
}

/// Unregistered counter for per-instance views such as
/// [`CacheStats`](crate::CacheStats).
pub(crate) fn local_counter(name: &str, help: &str) -> IntCounter {
    IntCounter::new(name, help).expect("metric can be created")
}

/// Count one finished segment write.
pub(crate) fn record_segment(rows: u64, bytes: u64) {
    SEGMENT_WRITES_TOTAL.inc();
    SEGMENT_ROWS_TOTAL.inc_by(rows);
    SEGMENT_BYTES_TOTAL.inc_by(bytes);
}
