//! Upload entry point tests: validation, dataset keys, TSV input and the
//! local filesystem backend.

mod common;

use std::io::{self, Read};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use object_store::local::LocalFileSystem;

use csvhouse_storage::{
    BlobStore, ContentCache, Error, ErrorKind, IngestConfig, ObjectBlobStore, ReadConfig,
    SegmentedReader, StoreConfig, UploadRequest, UploadService,
};

use common::FaultyStore;

fn service(store: Arc<dyn BlobStore>) -> UploadService {
    UploadService::new(store, StoreConfig::default())
}

#[tokio::test]
async fn test_receipt_describes_dataset() {
    let store = Arc::new(FaultyStore::new());
    let uploads = service(store.clone());
    let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
    let body = "id,name\n1,a\n2,b\n3,c\n";

    let receipt = uploads
        .upload_at(
            UploadRequest::new("ch1", "people.csv", IngestConfig::fine_grained().with_segment_size(2)),
            body.as_bytes(),
            now,
        )
        .await
        .unwrap();

    assert_eq!(receipt.dataset_key, "csv_upload/ch1/2024-01-02-03-04-05");
    assert_eq!(receipt.id, "csv_2024-01-02-03-04-05");
    assert_eq!(receipt.name, "people.csv");
    assert_eq!(receipt.ext, "csv");
    assert_eq!(receipt.content_type, "text/csv");
    assert_eq!(receipt.segment_count, 2);
    assert_eq!(receipt.total_rows, 3);
    assert_eq!(receipt.total_size, body.len() as u64);

    let json = serde_json::to_value(&receipt).unwrap();
    assert_eq!(json["datasetKey"], "csv_upload/ch1/2024-01-02-03-04-05");
    assert_eq!(json["segmentCount"], 2);

    let segment = store
        .get("csv_upload/ch1/2024-01-02-03-04-05/segment-1.csv")
        .await
        .unwrap();
    assert_eq!(&segment[..], b"id,name\n3,c\n");
}

#[tokio::test]
async fn test_tsv_is_stored_as_csv() {
    let store = Arc::new(FaultyStore::new());
    let uploads = service(store.clone());
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

    let receipt = uploads
        .upload_at(
            UploadRequest::new("ch1", "report.TSV", IngestConfig::default()),
            "id\tnote\n1\thello, world\n2\tsay \"hi\"\n".as_bytes(),
            now,
        )
        .await
        .unwrap();

    assert_eq!(receipt.ext, "tsv");
    assert_eq!(receipt.content_type, "text/tab-separated-values");

    let segment = store
        .get(&format!("{}/segment-0.csv", receipt.dataset_key))
        .await
        .unwrap();
    assert_eq!(
        &segment[..],
        b"id,note\n1,\"hello, world\"\n2,\"say \"\"hi\"\"\"\n"
    );
}

#[tokio::test]
async fn test_unsupported_extension_rejected_before_io() {
    let store = Arc::new(FaultyStore::new());
    let uploads = service(store.clone());

    let err = uploads
        .upload(
            UploadRequest::new("ch1", "data.xlsx", IngestConfig::default()),
            "id\n1\n".as_bytes(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::UnsupportedFileType(_)));
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    assert_eq!(store.puts_started(), 0);
}

#[tokio::test]
async fn test_channel_id_validated() {
    let uploads = service(Arc::new(FaultyStore::new()));

    for channel in ["", "a/b"] {
        let err = uploads
            .upload(
                UploadRequest::new(channel, "data.csv", IngestConfig::default()),
                "id\n1\n".as_bytes(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)), "channel {:?}", channel);
    }
}

#[tokio::test]
async fn test_declared_length_over_limit_rejected() {
    let store = Arc::new(FaultyStore::new());
    let uploads = service(store.clone());

    let request = UploadRequest::new("ch1", "big.csv", IngestConfig::default())
        .with_content_length(100 * 1024 * 1024 + 1);
    let err = uploads.upload(request, "id\n1\n".as_bytes()).await.unwrap_err();

    assert!(matches!(err, Error::PayloadTooLarge { limit } if limit == 100 * 1024 * 1024));
    assert_eq!(store.puts_started(), 0);
}

#[tokio::test]
async fn test_undeclared_body_over_limit_rejected() {
    let store = Arc::new(FaultyStore::new());
    let config = StoreConfig {
        max_upload_bytes: 64,
        ..Default::default()
    };
    let uploads = UploadService::new(store.clone(), config);

    let mut body = String::from("id,name\n");
    for i in 0..100 {
        body.push_str(&format!("{},name-{}\n", i, i));
    }

    let err = uploads
        .upload(UploadRequest::new("ch1", "big.csv", IngestConfig::default()), body.as_bytes())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::PayloadTooLarge { limit: 64 }));
}

#[tokio::test]
async fn test_empty_body_has_no_header() {
    let uploads = service(Arc::new(FaultyStore::new()));
    let err = uploads
        .upload(UploadRequest::new("ch1", "empty.csv", IngestConfig::default()), "".as_bytes())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MissingHeader));
}

#[tokio::test]
async fn test_undecodable_row_is_a_client_error() {
    let store = Arc::new(FaultyStore::new());
    let uploads = service(store.clone());

    for config in [IngestConfig::default(), IngestConfig::stream(2).with_segment_size(1)] {
        let err = uploads
            .upload(
                UploadRequest::new("ch1", "a.csv", config),
                &b"id,name\n1,ok\n2,\xff\xfe\n"[..],
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidUpload(_)), "got {:?}", err);
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }
}

#[tokio::test]
async fn test_undecodable_header_is_a_client_error() {
    let uploads = service(Arc::new(FaultyStore::new()));
    let err = uploads
        .upload(
            UploadRequest::new("ch1", "a.csv", IngestConfig::default()),
            &b"\xff\xfe,name\n1,ok\n"[..],
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidUpload(_)), "got {:?}", err);
}

/// Body whose every read fails, like a dropped connection.
struct BrokenBody;

impl Read for BrokenBody {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset"))
    }
}

#[tokio::test]
async fn test_body_read_failure_is_not_reported_as_missing_header() {
    let uploads = service(Arc::new(FaultyStore::new()));
    let err = uploads
        .upload(UploadRequest::new("ch1", "a.csv", IngestConfig::default()), BrokenBody)
        .await
        .unwrap_err();

    assert!(!matches!(err, Error::MissingHeader), "got {:?}", err);
    assert_eq!(err.kind(), ErrorKind::UpstreamFailure);
}

#[tokio::test]
async fn test_ragged_rows_pass_through() {
    let store = Arc::new(FaultyStore::new());
    let uploads = service(store.clone());

    let receipt = uploads
        .upload(
            UploadRequest::new("ch1", "ragged.csv", IngestConfig::default()),
            "a,b\n1\n1,2,3\n".as_bytes(),
        )
        .await
        .unwrap();

    let segment = store
        .get(&format!("{}/segment-0.csv", receipt.dataset_key))
        .await
        .unwrap();
    assert_eq!(&segment[..], b"a,b\n1\n1,2,3\n");
}

#[tokio::test]
async fn test_local_filesystem_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let local = LocalFileSystem::new_with_prefix(dir.path()).unwrap();
    let store: Arc<dyn BlobStore> = Arc::new(ObjectBlobStore::new(Arc::new(local), &StoreConfig::default()));

    let uploads = service(store.clone());
    let mut body = String::from("id,name\n");
    for i in 0..250 {
        body.push_str(&format!("{},name-{}\n", i, i));
    }

    let receipt = uploads
        .upload(
            UploadRequest::new("ch1", "people.csv", IngestConfig::stream(2).with_segment_size(100)),
            body.as_bytes(),
        )
        .await
        .unwrap();
    assert_eq!(receipt.segment_count, 3);

    let on_disk = dir
        .path()
        .join(&receipt.dataset_key)
        .join("segment-2.csv");
    assert!(on_disk.exists());

    let cache = Arc::new(ContentCache::new(store, 1024 * 1024));
    let reader = SegmentedReader::new(cache, ReadConfig::default().with_segment_size(100)).unwrap();
    let page = reader.read(&receipt.dataset_key, 195, 10).await.unwrap();
    assert_eq!(page.rows.first().unwrap()[0], "195");
    assert_eq!(page.rows.last().unwrap()[0], "204");
    assert!(page.has_more);
}
