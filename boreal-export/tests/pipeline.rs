//! End-to-end pipeline coverage over in-memory backends.

use std::sync::Arc;
use std::time::Duration;

use object_store::memory::InMemory;
use tokio_util::sync::CancellationToken;

use boreal_alert::{AlertRecord, AlertV7, AlertV9, DiaSource};
use boreal_archive::Archive;
use boreal_codec::{extract_frame, read_header, Codec, SYNC_MARKER_LEN};
use boreal_export::Exporter;
use boreal_index::{AlertQuery, ConeConstraint, MemoryIndex, ResultChunkRow};
use boreal_ingest::{AlertEnvelope, ConsumerEvent, InMemoryConsumer, Ingestor, IngestorConfig};

const V9_SCHEMA: &str = r#"{"type": "record", "namespace": "lsst.v9_0", "name": "alert"}"#;
const V7_SCHEMA: &str = r#"{"type": "record", "namespace": "lsst.v7_1", "name": "alert"}"#;

fn dia_source(id: i64, ra: f64, dec: f64) -> DiaSource {
    DiaSource {
        dia_source_id: id,
        dia_object_id: None,
        ss_object_id: None,
        midpoint_mjd_tai: 60000.0 + id as f64,
        ra,
        dec,
        psf_flux: None,
        psf_flux_err: None,
        snr: None,
        band: None,
    }
}

fn v9(id: i64, ra: f64, dec: f64) -> AlertRecord {
    AlertRecord::V9_0(AlertV9 {
        alert_id: id,
        dia_source: dia_source(id, ra, dec),
        dia_object: None,
        ss_source: None,
        mpcorb: None,
    })
}

fn v7(id: i64, ra: f64, dec: f64) -> AlertRecord {
    AlertRecord::V7_1(AlertV7 {
        alert_id: id,
        dia_source: dia_source(id, ra, dec),
        dia_object: None,
    })
}

fn archive() -> Arc<Archive> {
    Arc::new(Archive::new(
        Arc::new(InMemory::new()),
        Arc::new(MemoryIndex::new()),
        Codec::Zstd,
    ))
}

/// Decode every record's alertId out of a chunk container.
async fn chunk_alert_ids(archive: &Archive, chunk: &ResultChunkRow) -> Vec<i64> {
    let bytes = archive
        .fetch_range(&chunk.uri, 0, chunk.size as u64)
        .await
        .expect("fetch chunk");
    let (header, mut pos) = read_header(&bytes).expect("header");
    let mut ids = Vec::new();
    while pos < bytes.len() {
        let frame = &bytes[pos..];
        let payload = extract_frame(frame, header.codec).expect("payload");
        let value: serde_json::Value = serde_json::from_slice(&payload).expect("json");
        ids.push(value["alertId"].as_i64().expect("alertId"));
        let len = u32::from_le_bytes(frame[4..8].try_into().unwrap()) as usize;
        pos += 4 + 4 + len + SYNC_MARKER_LEN;
    }
    ids
}

async fn seed_two_schemas(archive: &Archive) {
    archive.ensure_schema(1, V9_SCHEMA).await.expect("schema");
    archive.ensure_schema(2, V7_SCHEMA).await.expect("schema");
    let first: Vec<AlertRecord> = (1..=3).map(|id| v9(id, 120.0, 0.0)).collect();
    archive
        .ingest_chunk(1, "alerts/000/1-3", &first, None)
        .await
        .expect("ingest");
    let second: Vec<AlertRecord> = (4..=5).map(|id| v7(id, 120.0, 0.0)).collect();
    archive
        .ingest_chunk(2, "alerts/000/4-5", &second, None)
        .await
        .expect("ingest");
}

#[tokio::test]
async fn export_chunks_split_on_size_and_schema_boundaries() {
    let archive = archive();
    seed_two_schemas(&archive).await;
    let exporter = Exporter::new(archive.clone());

    let group = exporter
        .run_export("job-1", 2, &AlertQuery::default())
        .await
        .expect("export");
    assert_eq!(group.error, Some(false));
    assert!(group.resolved_at.is_some());

    let mut chunks = Vec::new();
    while let Some(chunk) = exporter.claim("job-1").await.expect("claim") {
        chunks.push(chunk);
    }
    assert_eq!(chunks.len(), 3);
    assert_eq!(
        chunks.iter().map(|c| c.count).collect::<Vec<_>>(),
        vec![2, 1, 2]
    );
    assert_eq!(
        chunks.iter().map(|c| c.schema_id).collect::<Vec<_>>(),
        vec![1, 1, 2]
    );

    let mut ids = Vec::new();
    for chunk in &chunks {
        ids.push(chunk_alert_ids(&archive, chunk).await);
    }
    assert_eq!(ids, vec![vec![1, 2], vec![3], vec![4, 5]]);
}

#[tokio::test]
async fn claim_release_delete_lifecycle() {
    let archive = archive();
    seed_two_schemas(&archive).await;
    let exporter = Exporter::new(archive.clone());
    exporter
        .run_export("job-2", 2, &AlertQuery::default())
        .await
        .expect("export");

    let first = exporter.claim("job-2").await.expect("claim").expect("some");
    let second = exporter.claim("job-2").await.expect("claim").expect("some");
    assert_ne!(first.id, second.id);

    exporter.release(&first).await.expect("release");
    let again = exporter.claim("job-2").await.expect("claim").expect("some");
    assert_eq!(again.id, first.id);

    exporter.delete_chunk(&first).await.expect("delete");
    assert!(
        archive.fetch_range(&first.uri, 0, 1).await.is_err(),
        "chunk object must be gone"
    );

    exporter.delete_group("job-2").await.expect("delete group");
    assert!(archive
        .index()
        .get_group("job-2")
        .await
        .expect("get")
        .is_none());
    assert!(archive.fetch_range(&second.uri, 0, 1).await.is_err());
}

#[tokio::test]
async fn failed_exports_resolve_their_group() {
    let archive = archive();
    archive.ensure_schema(1, V9_SCHEMA).await.expect("schema");
    archive
        .ingest_chunk(1, "alerts/000/1-1", &[v9(1, 10.0, 10.0)], None)
        .await
        .expect("ingest");
    // the backing blob disappears under the export
    archive.delete_blob("alerts/000/1-1").await.expect("delete");

    let exporter = Exporter::new(archive.clone());
    let group = exporter
        .run_export("job-3", 2, &AlertQuery::default())
        .await
        .expect("run_export itself must not fail");
    assert_eq!(group.error, Some(true));
    assert!(group.msg.is_some());
    assert!(group.resolved_at.is_some());
    assert!(exporter.claim("job-3").await.expect("claim").is_none());
}

#[tokio::test]
async fn unknown_projection_columns_are_rejected_up_front() {
    let archive = archive();
    let exporter = Exporter::new(archive.clone());

    let query = AlertQuery {
        include_columns: vec!["diaSource.ra".to_string(), "bogusColumn".to_string()],
        ..Default::default()
    };
    let err = exporter
        .run_export("job-bad", 2, &query)
        .await
        .expect_err("must fail");
    assert!(err.to_string().contains("bogusColumn"));
    // rejected before any bookkeeping
    assert!(archive
        .index()
        .get_group("job-bad")
        .await
        .expect("get")
        .is_none());

    // a v9-only column is a valid projection
    let query = AlertQuery {
        include_columns: vec!["mpcorb.mpcDesignation".to_string()],
        ..Default::default()
    };
    exporter
        .run_export("job-ok", 2, &query)
        .await
        .expect("export");
}

#[tokio::test]
async fn cone_exports_only_matching_alerts() {
    let archive = archive();
    archive.ensure_schema(1, V9_SCHEMA).await.expect("schema");
    let near: Vec<AlertRecord> = (1..=2).map(|id| v9(id, 120.0, 0.0)).collect();
    let far: Vec<AlertRecord> = (3..=4).map(|id| v9(id, 200.0, -40.0)).collect();
    archive
        .ingest_chunk(1, "alerts/000/1-2", &near, None)
        .await
        .expect("ingest");
    archive
        .ingest_chunk(1, "alerts/000/3-4", &far, None)
        .await
        .expect("ingest");

    let exporter = Exporter::new(archive.clone());
    let query = AlertQuery {
        cone: Some(ConeConstraint {
            ra: 120.0,
            dec: 0.0,
            radius: 1.0,
        }),
        ..Default::default()
    };
    exporter
        .run_export("job-4", Exporter::default_chunk_size(), &query)
        .await
        .expect("export");

    let chunk = exporter.claim("job-4").await.expect("claim").expect("some");
    assert_eq!(chunk_alert_ids(&archive, &chunk).await, vec![1, 2]);
    assert!(exporter.claim("job-4").await.expect("claim").is_none());
}

#[tokio::test]
async fn streamed_alerts_reach_the_export_surface() {
    let archive = archive();
    let events = vec![
        ConsumerEvent::Deliver(envelope(0, 10, 1)),
        ConsumerEvent::Deliver(envelope(1, 11, 2)),
    ];
    let consumer = Arc::new(InMemoryConsumer::new(events));
    let config = IngestorConfig {
        flush_threshold: 1,
        idle_timeout: Duration::from_secs(3600),
        poll_timeout: Duration::from_millis(5),
    };
    let ingestor = Ingestor::new(archive.clone(), consumer.clone(), config);
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(ingestor.run(shutdown.clone()));
    while !consumer.exhausted() {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown.cancel();
    handle.await.expect("join").expect("run");

    let exporter = Exporter::new(archive.clone());
    exporter
        .run_export("job-5", 10, &AlertQuery::default())
        .await
        .expect("export");
    let chunk = exporter.claim("job-5").await.expect("claim").expect("some");
    assert_eq!(chunk_alert_ids(&archive, &chunk).await, vec![1, 2]);
}

fn envelope(partition: i32, offset: i64, alert_id: i64) -> AlertEnvelope {
    AlertEnvelope {
        topic: "alerts".to_string(),
        partition,
        offset,
        schema_id: 1,
        schema: V9_SCHEMA.to_string(),
        record: v9(alert_id, 33.0, 5.0),
    }
}
