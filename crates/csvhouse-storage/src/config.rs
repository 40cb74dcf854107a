//! Storage Configuration
//!
//! This module defines configuration for the write path, the read path, the
//! content cache and the object store adapter.
//!
//! ## IngestConfig
//!
//! Controls how an upload is split into segments and persisted:
//!
//! - **segment_size**: Rows per segment, header excluded (default: 50,000)
//! - **mode**: `fine` | `coarse` | `batch` | `stream` (default: `fine`)
//! - **workers**: Upload workers for `stream` mode (default: 4)
//!
//! ## ReadConfig
//!
//! - **segment_size**: Must equal the segment size the dataset was ingested with
//! - **max_limit**: Page size ceiling; larger requests are rejected (default: 1,000)
//! - **default_limit**: Page size when a request names none (default: 100)
//!
//! ## CacheConfig
//!
//! - **capacity_bytes**: Hard bound on cached content (default: 1GB)
//! - **max_age_secs**: Entries idle longer than this are swept (default: 10 min)
//! - **sweep_interval_secs**: How often the sweep runs (default: 60s)
//!
//! ## StoreConfig
//!
//! - **prefix**: Key prefix for every dataset (default: `csv_upload`)
//! - **max_upload_bytes**: Upload body ceiling (default: 100MB)
//! - **timeout_ms**: Bound on every object store call (default: 30s)
//! - **upload_retries**: Put attempts with exponential backoff (default: 3)
//!
//! ## Usage
//!
//! ```ignore
//! use csvhouse_storage::{CsvhouseConfig, IngestConfig};
//!
//! // From CSVHOUSE_* environment variables
//! let config = CsvhouseConfig::from_env()?;
//!
//! // Concurrent upload with 8 workers
//! let ingest = IngestConfig::stream(8);
//! ```

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_SEGMENT_SIZE: usize = 50_000;
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_MAX_LIMIT: usize = 1_000;
pub const DEFAULT_PAGE_LIMIT: usize = 100;
pub const MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;

/// Upload mode as named by callers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestMode {
    /// Persist each segment as soon as it fills.
    #[default]
    Fine,
    /// Same strategy as `Fine`, intended for larger segments.
    Coarse,
    /// Buffer every segment, then persist them together.
    Batch,
    /// Persist segments concurrently through a worker pool.
    Stream,
}

/// How the ingestion pipeline drives segment persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStrategy {
    SequentialEager,
    BatchDeferred,
    Concurrent,
}

impl IngestMode {
    pub fn strategy(self) -> IngestStrategy {
        match self {
            IngestMode::Fine | IngestMode::Coarse => IngestStrategy::SequentialEager,
            IngestMode::Batch => IngestStrategy::BatchDeferred,
            IngestMode::Stream => IngestStrategy::Concurrent,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IngestMode::Fine => "fine",
            IngestMode::Coarse => "coarse",
            IngestMode::Batch => "batch",
            IngestMode::Stream => "stream",
        }
    }
}

impl FromStr for IngestMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fine" => Ok(IngestMode::Fine),
            "coarse" => Ok(IngestMode::Coarse),
            "batch" => Ok(IngestMode::Batch),
            "stream" => Ok(IngestMode::Stream),
            other => Err(Error::InvalidRequest(format!(
                "unknown upload mode '{}' (expected fine, coarse, batch or stream)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Rows per segment, header excluded (default: 50,000)
    #[serde(default = "default_segment_size")]
    pub segment_size: usize,

    #[serde(default)]
    pub mode: IngestMode,

    /// Worker count for `stream` mode; 0 means the default of 4
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            segment_size: default_segment_size(),
            mode: IngestMode::Fine,
            workers: default_workers(),
        }
    }
}

impl IngestConfig {
    /// 1,000 rows per segment, each persisted as soon as it fills.
    pub fn fine_grained() -> Self {
        Self {
            segment_size: 1_000,
            mode: IngestMode::Fine,
            ..Default::default()
        }
    }

    /// 10,000 rows per segment, each persisted as soon as it fills.
    pub fn coarse_grained() -> Self {
        Self {
            segment_size: 10_000,
            mode: IngestMode::Coarse,
            ..Default::default()
        }
    }

    /// 1,000 rows per segment, persisted together once the body is consumed.
    pub fn batch() -> Self {
        Self {
            segment_size: 1_000,
            mode: IngestMode::Batch,
            ..Default::default()
        }
    }

    /// 1,000 rows per segment, persisted by `workers` concurrent uploaders.
    pub fn stream(workers: usize) -> Self {
        Self {
            segment_size: 1_000,
            mode: IngestMode::Stream,
            workers,
        }
    }

    pub fn with_segment_size(mut self, segment_size: usize) -> Self {
        self.segment_size = segment_size;
        self
    }

    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            DEFAULT_WORKERS
        } else {
            self.workers
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.segment_size == 0 {
            return Err(Error::InvalidRequest(
                "segment size must be at least 1 row".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadConfig {
    /// Rows per segment the datasets were ingested with (default: 50,000)
    #[serde(default = "default_segment_size")]
    pub segment_size: usize,

    /// Largest page a caller may request (default: 1,000)
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,

    /// Page size when the caller does not name one (default: 100)
    #[serde(default = "default_page_limit")]
    pub default_limit: usize,
}

impl Default for ReadConfig {
    fn default() -> Self {
        Self {
            segment_size: default_segment_size(),
            max_limit: default_max_limit(),
            default_limit: default_page_limit(),
        }
    }
}

impl ReadConfig {
    pub fn with_segment_size(mut self, segment_size: usize) -> Self {
        self.segment_size = segment_size;
        self
    }

    /// Page size for requests that name none, capped at `max_limit`.
    pub fn page_limit(&self) -> usize {
        self.default_limit.min(self.max_limit)
    }

    pub fn validate(&self) -> Result<()> {
        if self.segment_size == 0 {
            return Err(Error::Config("read segment size must be non-zero".into()));
        }
        if self.max_limit == 0 {
            return Err(Error::Config("max page limit must be non-zero".into()));
        }
        if self.default_limit == 0 {
            return Err(Error::Config("default page limit must be non-zero".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum bytes of segment content held in memory (default: 1GB)
    #[serde(default = "default_cache_capacity")]
    pub capacity_bytes: u64,

    /// Idle age after which the sweep drops an entry (default: 10 minutes)
    #[serde(default = "default_cache_max_age_secs")]
    pub max_age_secs: u64,

    /// Interval of the background sweep (default: 60 seconds)
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: default_cache_capacity(),
            max_age_secs: default_cache_max_age_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl CacheConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Key prefix under which datasets are created (default: "csv_upload")
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Largest accepted upload body in bytes (default: 100MB)
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,

    /// Timeout applied to every object store call (default: 30s)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Put attempts with exponential backoff (default: 3)
    #[serde(default = "default_retries")]
    pub upload_retries: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            max_upload_bytes: default_max_upload_bytes(),
            timeout_ms: default_timeout_ms(),
            upload_retries: default_retries(),
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Top-level configuration for a [`DatasetManager`](crate::DatasetManager).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CsvhouseConfig {
    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub read: ReadConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub store: StoreConfig,
}

impl CsvhouseConfig {
    /// Build configuration from `CSVHOUSE_*` environment variables, falling
    /// back to defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    ///
    /// `CSVHOUSE_SEGMENT_SIZE` sets both the ingest and the read segment size,
    /// since a reader must use the size the dataset was written with.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(size) = parse_var::<usize, _>(&lookup, "CSVHOUSE_SEGMENT_SIZE")? {
            config.ingest.segment_size = size;
            config.read.segment_size = size;
        }
        if let Some(mode) = lookup("CSVHOUSE_UPLOAD_MODE") {
            config.ingest.mode = mode.parse()?;
        }
        if let Some(workers) = parse_var(&lookup, "CSVHOUSE_WORKERS")? {
            config.ingest.workers = workers;
        }
        if let Some(limit) = parse_var(&lookup, "CSVHOUSE_MAX_LIMIT")? {
            config.read.max_limit = limit;
        }
        if let Some(limit) = parse_var(&lookup, "CSVHOUSE_DEFAULT_LIMIT")? {
            config.read.default_limit = limit;
        }
        if let Some(capacity) = parse_var(&lookup, "CSVHOUSE_CACHE_SIZE")? {
            config.cache.capacity_bytes = capacity;
        }
        if let Some(age) = parse_var(&lookup, "CSVHOUSE_CACHE_MAX_AGE_SECS")? {
            config.cache.max_age_secs = age;
        }
        if let Some(interval) = parse_var(&lookup, "CSVHOUSE_CACHE_SWEEP_SECS")? {
            config.cache.sweep_interval_secs = interval;
        }
        if let Some(timeout) = parse_var(&lookup, "CSVHOUSE_TIMEOUT_MS")? {
            config.store.timeout_ms = timeout;
        }
        if let Some(retries) = parse_var(&lookup, "CSVHOUSE_UPLOAD_RETRIES")? {
            config.store.upload_retries = retries;
        }
        if let Some(prefix) = lookup("CSVHOUSE_PREFIX") {
            config.store.prefix = prefix.trim_matches('/').to_string();
        }

        config.ingest.validate()?;
        config.read.validate()?;
        Ok(config)
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::Config(format!("{} has invalid value '{}'", name, raw))),
    }
}

fn default_segment_size() -> usize {
    DEFAULT_SEGMENT_SIZE
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_max_limit() -> usize {
    DEFAULT_MAX_LIMIT
}

fn default_page_limit() -> usize {
    DEFAULT_PAGE_LIMIT
}

fn default_cache_capacity() -> u64 {
    1024 * 1024 * 1024 // 1GB
}

fn default_cache_max_age_secs() -> u64 {
    10 * 60
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_prefix() -> String {
    "csv_upload".to_string()
}

fn default_max_upload_bytes() -> u64 {
    MAX_UPLOAD_BYTES
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_retries() -> u32 {
    3
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = CsvhouseConfig::default();
        assert_eq!(config.ingest.segment_size, 50_000);
        assert_eq!(config.ingest.mode, IngestMode::Fine);
        assert_eq!(config.ingest.workers, 4);
        assert_eq!(config.read.max_limit, 1_000);
        assert_eq!(config.read.default_limit, 100);
        assert_eq!(config.store.max_upload_bytes, 100 * 1024 * 1024);
        assert_eq!(config.store.prefix, "csv_upload");
    }

    #[test]
    fn test_mode_strategies() {
        assert_eq!(IngestMode::Fine.strategy(), IngestStrategy::SequentialEager);
        assert_eq!(IngestMode::Coarse.strategy(), IngestStrategy::SequentialEager);
        assert_eq!(IngestMode::Batch.strategy(), IngestStrategy::BatchDeferred);
        assert_eq!(IngestMode::Stream.strategy(), IngestStrategy::Concurrent);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("STREAM".parse::<IngestMode>().unwrap(), IngestMode::Stream);
        assert!("bulk".parse::<IngestMode>().is_err());
    }

    #[test]
    fn test_presets() {
        assert_eq!(IngestConfig::fine_grained().segment_size, 1_000);
        assert_eq!(IngestConfig::coarse_grained().segment_size, 10_000);
        assert_eq!(IngestConfig::batch().mode, IngestMode::Batch);
        assert_eq!(IngestConfig::stream(0).effective_workers(), 4);
        assert_eq!(IngestConfig::stream(8).effective_workers(), 8);
    }

    #[test]
    fn test_zero_segment_size_rejected() {
        let config = IngestConfig::default().with_segment_size(0);
        assert!(matches!(config.validate(), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = CsvhouseConfig::from_lookup(lookup(&[
            ("CSVHOUSE_SEGMENT_SIZE", "2000"),
            ("CSVHOUSE_UPLOAD_MODE", "batch"),
            ("CSVHOUSE_CACHE_SIZE", "4096"),
            ("CSVHOUSE_PREFIX", "/uploads/"),
        ]))
        .unwrap();
        assert_eq!(config.ingest.segment_size, 2000);
        assert_eq!(config.read.segment_size, 2000);
        assert_eq!(config.ingest.mode, IngestMode::Batch);
        assert_eq!(config.cache.capacity_bytes, 4096);
        assert_eq!(config.store.prefix, "uploads");
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = CsvhouseConfig::from_lookup(lookup(&[("CSVHOUSE_WORKERS", "many")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_default_limit_from_lookup() {
        let err = CsvhouseConfig::from_lookup(lookup(&[("CSVHOUSE_DEFAULT_LIMIT", "0")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let config = CsvhouseConfig::from_lookup(lookup(&[("CSVHOUSE_DEFAULT_LIMIT", "25")])).unwrap();
        assert_eq!(config.read.default_limit, 25);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: IngestConfig = serde_json::from_str(r#"{"mode":"stream","workers":2}"#).unwrap();
        assert_eq!(config.segment_size, 50_000);
        assert_eq!(config.mode, IngestMode::Stream);
        assert_eq!(config.workers, 2);
    }
}
