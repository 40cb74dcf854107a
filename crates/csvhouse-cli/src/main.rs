//! csvhouse CLI (csvctl)
//!
//! Command-line tool for uploading CSV/TSV files as segmented datasets and
//! paging through them.
//!
//! ## Quick Start
//!
//! ```bash
//! # Local filesystem backend
//! export USE_LOCAL_STORAGE=1
//! export LOCAL_STORAGE_PATH=./data/storage
//!
//! # Upload a file with 4 concurrent workers
//! csvctl upload channel-1 ./events.csv --mode stream --workers 4
//!
//! # Read a page
//! csvctl read csv_upload/channel-1/2024-01-02-03-04-05 --offset 49995 --limit 10
//!
//! # Page through the whole dataset
//! csvctl scan csv_upload/channel-1/2024-01-02-03-04-05 --limit 1000
//! ```
//!
//! ## Configuration
//!
//! ### Object Store
//! - `USE_LOCAL_STORAGE`: Use local filesystem instead of S3 (any value)
//! - `LOCAL_STORAGE_PATH`: Path for local storage (default: ./data/storage)
//! - `CSVHOUSE_BUCKET`: S3 bucket (default: csvhouse); credentials from `AWS_*`
//!
//! ### Storage Settings
//! - `CSVHOUSE_SEGMENT_SIZE`, `CSVHOUSE_UPLOAD_MODE`, `CSVHOUSE_WORKERS`
//! - `CSVHOUSE_MAX_LIMIT`, `CSVHOUSE_DEFAULT_LIMIT`
//! - `CSVHOUSE_CACHE_SIZE`, `CSVHOUSE_TIMEOUT_MS`, `CSVHOUSE_PREFIX`
//!
//! ### Metrics
//! - `--metrics`: print Prometheus metrics to stderr when the command finishes
//!
//! ### Logging
//! - `RUST_LOG`: Log filter (default: info)

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use object_store::ObjectStore;

use csvhouse_storage::{
    metrics, CsvhouseConfig, DatasetManager, ErrorKind, IngestMode, ObjectBlobStore, PageRequest,
    UploadRequest,
};

#[derive(Parser)]
#[command(name = "csvctl")]
#[command(about = "csvhouse command-line tool", long_about = None)]
struct Cli {
    /// S3 bucket holding the datasets
    #[arg(long, env = "CSVHOUSE_BUCKET", default_value = "csvhouse")]
    bucket: String,

    /// Use the local filesystem instead of S3
    #[arg(long, env = "USE_LOCAL_STORAGE")]
    local: Option<String>,

    /// Root directory for local storage
    #[arg(long, env = "LOCAL_STORAGE_PATH", default_value = "./data/storage")]
    local_path: PathBuf,

    /// Print Prometheus metrics to stderr on exit
    #[arg(long)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a .csv or .tsv file as a new dataset
    Upload {
        /// Channel the dataset belongs to
        channel: String,

        /// File to upload
        file: PathBuf,

        /// fine | coarse | batch | stream
        #[arg(long)]
        mode: Option<IngestMode>,

        /// Rows per segment
        #[arg(long)]
        segment_size: Option<usize>,

        /// Upload workers (stream mode)
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Read one page of a dataset
    Read {
        dataset_key: String,

        #[arg(long, default_value_t = 0)]
        offset: u64,

        /// Rows to return (default: CSVHOUSE_DEFAULT_LIMIT, or 100)
        #[arg(long)]
        limit: Option<usize>,

        /// Rows per segment the dataset was uploaded with
        #[arg(long)]
        segment_size: Option<usize>,
    },

    /// Page through a whole dataset and count its rows
    Scan {
        dataset_key: String,

        #[arg(long, default_value_t = 1000)]
        limit: usize,

        /// Rows per segment the dataset was uploaded with
        #[arg(long)]
        segment_size: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = CsvhouseConfig::from_env().context("Invalid CSVHOUSE_* configuration")?;

    let object_store = build_object_store(&cli)?;
    let store = Arc::new(ObjectBlobStore::new(object_store, &config.store));
    let print_metrics = cli.metrics;

    match cli.command {
        Commands::Upload {
            channel,
            file,
            mode,
            segment_size,
            workers,
        } => {
            if let Some(mode) = mode {
                config.ingest.mode = mode;
            }
            if let Some(workers) = workers {
                config.ingest.workers = workers;
            }
            apply_segment_size(&mut config, segment_size);

            let file_name = file
                .file_name()
                .and_then(|name| name.to_str())
                .with_context(|| format!("Invalid file name: {}", file.display()))?
                .to_string();
            let body = File::open(&file).with_context(|| format!("Failed to open {}", file.display()))?;
            let length = body.metadata()?.len();

            let request = UploadRequest::new(channel, file_name, config.ingest.clone())
                .with_content_length(length);
            let manager = DatasetManager::new(store, config)?;
            let receipt = manager
                .upload(request, BufReader::new(body))
                .await
                .context("Upload failed")?;

            println!("{}", serde_json::to_string_pretty(&receipt)?);
        }

        Commands::Read {
            dataset_key,
            offset,
            limit,
            segment_size,
        } => {
            apply_segment_size(&mut config, segment_size);
            let manager = DatasetManager::new(store, config)?;

            let request = PageRequest {
                dataset_key,
                offset,
                limit,
            };
            let page = manager.read_page(&request).await.context("Read failed")?;

            println!("{}", serde_json::to_string_pretty(&page)?);
        }

        Commands::Scan {
            dataset_key,
            limit,
            segment_size,
        } => {
            apply_segment_size(&mut config, segment_size);
            let manager = DatasetManager::new(store, config)?;

            let mut offset = 0u64;
            let mut pages = 0u64;
            loop {
                let page = match manager
                    .read_page(&PageRequest::new(dataset_key.clone(), offset, limit))
                    .await
                {
                    Ok(page) => page,
                    // A page that ends exactly on the last segment boundary reports
                    // more rows; the next segment simply does not exist.
                    Err(e) if offset > 0 && e.kind() == ErrorKind::NotFound => break,
                    Err(e) => return Err(e).context(format!("Scan failed at offset {}", offset)),
                };
                pages += 1;
                offset += page.rows.len() as u64;
                if !page.has_more {
                    break;
                }
            }

            let stats = manager.cache_stats();
            tracing::info!(
                pages,
                cache_hits = stats.hits,
                cache_misses = stats.misses,
                "Scan completed"
            );
            println!(
                "{}",
                serde_json::json!({
                    "datasetKey": dataset_key,
                    "rows": offset,
                    "pages": pages,
                })
            );
        }
    }

    if print_metrics {
        eprint!("{}", metrics::render()?);
    }

    Ok(())
}

fn apply_segment_size(config: &mut CsvhouseConfig, segment_size: Option<usize>) {
    if let Some(size) = segment_size {
        config.ingest.segment_size = size;
        config.read.segment_size = size;
    }
}

fn build_object_store(cli: &Cli) -> Result<Arc<dyn ObjectStore>> {
    if cli.local.is_some() {
        std::fs::create_dir_all(&cli.local_path).with_context(|| {
            format!("Failed to create local storage at {}", cli.local_path.display())
        })?;
        tracing::info!(path = %cli.local_path.display(), "Using local storage");
        return Ok(Arc::new(
            object_store::local::LocalFileSystem::new_with_prefix(&cli.local_path)?,
        ));
    }

    if cli.bucket.is_empty() {
        bail!("CSVHOUSE_BUCKET must be set when not using local storage");
    }
    tracing::info!(bucket = %cli.bucket, "Using S3 storage");
    let s3 = object_store::aws::AmazonS3Builder::from_env()
        .with_bucket_name(&cli.bucket)
        .build()?;
    Ok(Arc::new(s3))
}
