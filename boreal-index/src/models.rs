//! Row types persisted by the archive index.

use chrono::{DateTime, Utc};

/// Registered packet schema. Immutable once inserted.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct SchemaRow {
    pub id: i32,
    pub content: String,
}

/// One stored block container.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct BlobRow {
    pub id: i64,
    pub schema_id: i32,
    pub uri: String,
    pub count: i32,
    pub size: i64,
    pub refcount: i32,
}

/// Blob fields known before the index assigns an id.
#[derive(Debug, Clone, PartialEq)]
pub struct BlobInsert {
    pub schema_id: i32,
    pub uri: String,
    pub count: i32,
    pub size: i64,
}

/// Pointer row for one alert, relative to the blob being committed.
///
/// `blob_start`/`blob_end` address exactly one decodable frame within the
/// blob; the blob id is assigned inside the commit transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertPointer {
    pub id: i64,
    pub object_id: Option<i64>,
    pub moving_object_id: Option<i64>,
    pub timestamp: f64,
    pub ra: f64,
    pub dec: f64,
    pub cell_id: i64,
    pub blob_start: i64,
    pub blob_end: i64,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct AlertRow {
    pub id: i64,
    pub object_id: Option<i64>,
    pub moving_object_id: Option<i64>,
    pub timestamp: f64,
    pub ra: f64,
    pub dec: f64,
    pub cell_id: i64,
    pub blob_id: i64,
    pub blob_start: i64,
    pub blob_end: i64,
}

/// Per-object aggregate. Upserts replace the row only when the incoming
/// `detection_count` is null or strictly greater than the stored one, so a
/// late-arriving chunk never regresses the aggregate.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ObjectRow {
    pub id: i64,
    pub ra: f64,
    pub dec: f64,
    pub cell_id: i64,
    pub first_seen: Option<f64>,
    pub last_seen: Option<f64>,
    pub detection_count: Option<i32>,
}

/// Moving-object identity. First write wins.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct MovingObjectRow {
    pub id: i64,
    pub designation: Option<String>,
}

/// Everything one ingested chunk commits in a single transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkInsert {
    pub blob: BlobInsert,
    pub alerts: Vec<AlertPointer>,
    pub objects: Vec<ObjectRow>,
    pub moving_objects: Vec<MovingObjectRow>,
}

/// A resolved pointer: enough to ranged-GET and decode one frame.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct FrameRef {
    pub alert_id: i64,
    pub schema_id: i32,
    pub uri: String,
    pub blob_start: i64,
    pub blob_end: i64,
    pub ra: f64,
    pub dec: f64,
}

/// An export job. Pending until `resolved_at` is set; `error` records the
/// terminal outcome.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ResultGroupRow {
    pub id: i64,
    pub name: String,
    pub chunk_size: i32,
    pub error: Option<bool>,
    pub msg: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// One exported chunk. Null `issued_at` means unclaimed.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ResultChunkRow {
    pub id: i64,
    pub schema_id: i32,
    pub group_id: i64,
    pub uri: String,
    pub count: i32,
    pub size: i64,
    pub issued_at: Option<DateTime<Utc>>,
}
