//! End-to-end: capture directory → coordinator → flow store → query engine
//!
//! The nfdump process is replaced by a canned `FlowExtractor`, so these
//! tests run without any external tool.

use async_trait::async_trait;
use nfledger::ingest::{ExtractionError, FlowExtractor, IngestionCoordinator};
use nfledger::query::{AggregateRequest, Direction, FlowQueryEngine, SearchRequest};
use nfledger::store::{ConnectionRanges, FlowStore};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::{NamedTempFile, TempDir};

/// Serves fixed nfdump text per capture file name
struct FixtureExtractor {
    outputs: HashMap<String, String>,
}

#[async_trait]
impl FlowExtractor for FixtureExtractor {
    async fn extract(&self, path: &Path) -> Result<Vec<String>, ExtractionError> {
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        Ok(self
            .outputs
            .get(&name)
            .map(|text| text.lines().map(str::to_string).collect())
            .unwrap_or_default())
    }
}

const CAPTURE_1000: &str = "\
2024-03-01 10:00:01.123,10.0.0.5,93.184.216.34,51000,443,TCP,10,1000
2024-03-01 10:02:30.000,10.0.0.5,93.184.216.34,51000,443,TCP,5,500
2024-03-01 10:03:00.000,10.0.0.5,93.184.216.34,51000
2024-03-01 10:04:59.999,93.184.216.34,10.0.0.5,443,51000,TCP,20,3000
2024-03-01 10:04:00.000,10.0.0.5,10.0.0.9,5353,5353,UDP,1,101
Summary: total flows: 5, total bytes: 4601
";

const CAPTURE_1100: &str = "\
2024-03-01 11:01:00.000,10.0.0.5,8.8.8.8,53000,53,UDP,1,80
2024-03-01 11:02:00.000,10.0.0.5,8.8.8.8,53000,53,UDP,1,80
";

struct Harness {
    _db: NamedTempFile,
    capture_dir: TempDir,
    store: FlowStore,
    coordinator: IngestionCoordinator,
    engine: FlowQueryEngine,
}

fn schema_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("sql")
}

fn harness() -> Harness {
    let db = NamedTempFile::new().unwrap();
    let store = FlowStore::open(db.path(), Duration::from_secs(5)).unwrap();
    store.migrate(schema_dir()).unwrap();

    let capture_dir = TempDir::new().unwrap();
    let day_dir = capture_dir.path().join("2024-03-01");
    fs::create_dir_all(&day_dir).unwrap();
    fs::write(day_dir.join("nfcapd.202403011000"), b"").unwrap();
    fs::write(day_dir.join("nfcapd.202403011100"), b"").unwrap();
    fs::write(capture_dir.path().join("notes.txt"), b"").unwrap();

    let extractor = Arc::new(FixtureExtractor {
        outputs: HashMap::from([
            ("nfcapd.202403011000".to_string(), CAPTURE_1000.to_string()),
            ("nfcapd.202403011100".to_string(), CAPTURE_1100.to_string()),
        ]),
    });

    let coordinator =
        IngestionCoordinator::new(store.clone(), extractor, capture_dir.path(), "nfcapd.");
    let ranges = Arc::new(ConnectionRanges::new(store.clone()));
    let engine = FlowQueryEngine::new(store.clone(), ranges, 25);

    Harness {
        _db: db,
        capture_dir,
        store,
        coordinator,
        engine,
    }
}

#[tokio::test]
async fn test_ingest_then_query() {
    let h = harness();

    let summary = h.coordinator.run_pass().await;
    assert_eq!(summary.files_seen, 2);
    assert_eq!(summary.ingested, 2);
    assert_eq!(summary.failed, 0);
    // 10:00 file: out-bucket, in-bucket, internal udp; 11:00 file: one bucket
    assert_eq!(summary.rows_written, 4);

    let request = SearchRequest {
        ip: Some("10.0.0.5".into()),
        ..Default::default()
    };
    let result = h.engine.search(&request).unwrap();
    assert_eq!(result.total_records, 4);
    assert_eq!(result.total_traffic, 1500 + 3000 + 101 + 160);

    let outgoing = result
        .flows
        .iter()
        .find(|f| f.dst_ip == "93.184.216.34")
        .unwrap();
    assert_eq!(outgoing.direction, Direction::Outgoing);
    assert_eq!(outgoing.bytes, 1500);
    assert_eq!(outgoing.packets, 15);
    assert_eq!(outgoing.timestamp.to_rfc3339(), "2024-03-01T10:00:00+00:00");

    let incoming = result
        .flows
        .iter()
        .find(|f| f.src_ip == "93.184.216.34")
        .unwrap();
    assert_eq!(incoming.direction, Direction::Incoming);
    assert_eq!(incoming.bytes_in, 3000);

    // Newest first
    assert_eq!(result.flows[0].dst_ip, "8.8.8.8");
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let h = harness();

    h.coordinator.run_pass().await;
    let first = h
        .engine
        .search(&SearchRequest {
            ip: Some("10.0.0.0/8".into()),
            ..Default::default()
        })
        .unwrap();

    let second_pass = h.coordinator.run_pass().await;
    assert_eq!(second_pass.ingested, 0);
    assert_eq!(second_pass.already_processed, 2);
    assert!(h.store.is_file_processed("nfcapd.202403011000").unwrap());

    let second = h
        .engine
        .search(&SearchRequest {
            ip: Some("10.0.0.0/8".into()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(first.total_records, second.total_records);
    assert_eq!(first.total_traffic, second.total_traffic);
}

#[tokio::test]
async fn test_new_file_picked_up_on_next_pass() {
    let h = harness();
    h.coordinator.run_pass().await;

    fs::write(h.capture_dir.path().join("nfcapd.202403011200"), b"").unwrap();
    let summary = h.coordinator.run_pass().await;

    assert_eq!(summary.ingested, 1);
    assert_eq!(summary.already_processed, 2);
    assert!(h.store.is_file_processed("nfcapd.202403011200").unwrap());
}

#[tokio::test]
async fn test_hourly_aggregate_after_ingest() {
    let h = harness();
    h.coordinator.run_pass().await;

    let all = h
        .engine
        .aggregate(&AggregateRequest {
            start_time: Some("2024-03-01T00:00:00Z".into()),
            end_time: Some("2024-03-01T23:59:59Z".into()),
            granularity: Some("hour".into()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].total_bytes, 1500 + 3000 + 101);
    assert_eq!(all[1].total_bytes, 160);

    let internal = h
        .engine
        .aggregate_by_address(&AggregateRequest {
            ip: Some("10.0.0.0".into()),
            mask: Some("24".into()),
            start_time: Some("2024-03-01T10:00:00Z".into()),
            end_time: Some("2024-03-01T10:59:59Z".into()),
            granularity: Some("hour".into()),
        })
        .unwrap();
    assert_eq!(internal.len(), 1);
    // 1500 out, 3000 in, 101 internal split 50/50
    assert_eq!(internal[0].bytes_out, 1500 + 50);
    assert_eq!(internal[0].bytes_in, 3000 + 50);
    assert_eq!(internal[0].total_bytes, 4601);
}
