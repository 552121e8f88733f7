//! Dual-write coordinator for the alert archive.
//!
//! An ingested chunk is written twice: the packed block container goes to
//! the object store first, then every pointer and aggregate row commits to
//! the relational index in one transaction. When the index commit fails the
//! stored blob is deleted again before the error propagates, so the two
//! stores never disagree about which chunks exist. Reads go the other way:
//! pointer, ranged GET, frame extraction.

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use object_store::path::Path;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions};

use boreal_alert::{AlertRecord, SchemaVersion};
use boreal_codec::{extract_frame, pack, read_header, Codec};
use boreal_index::{
    AlertPointer, BlobInsert, ChunkInsert, IndexStore, MovingObjectRow, ObjectRow,
};
use boreal_spatial::{cell_id, STORAGE_NSIDE};

pub mod error;
pub mod schemas;
pub mod store;

pub use error::{ArchiveError, ArchiveResult};
pub use schemas::SchemaCache;
pub use store::default_blob_store;

/// Invoked after a chunk is durably committed to both stores.
pub type OnCommitted = Box<dyn FnOnce() + Send>;

/// Multi-key object deletes go out in batches of at most this many keys.
const DELETE_BATCH: usize = 1000;

/// Enough bytes for a container header with either supported codec name.
/// A header that does not fit here was written by a codec this build does
/// not know, and the blob is treated as unreadable.
const HEADER_PREFIX_LEN: u64 = 29;

pub struct Archive {
    store: Arc<dyn ObjectStore>,
    index: Arc<dyn IndexStore>,
    schemas: SchemaCache,
    codec: Codec,
}

impl Archive {
    pub fn new(store: Arc<dyn ObjectStore>, index: Arc<dyn IndexStore>, codec: Codec) -> Self {
        Self {
            store,
            index,
            schemas: SchemaCache::default(),
            codec,
        }
    }

    pub fn index(&self) -> &Arc<dyn IndexStore> {
        &self.index
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Register a schema: insert-if-absent in the index, cache the parsed
    /// generation forever.
    pub async fn ensure_schema(&self, id: i32, content: &str) -> ArchiveResult<SchemaVersion> {
        if let Some(version) = self.schemas.get(id) {
            return Ok(version);
        }
        let version = SchemaVersion::from_schema_document(content)?;
        self.index.insert_schema(id, content).await?;
        self.schemas.insert(id, version);
        Ok(version)
    }

    /// The generation registered for `id`, or `None` when unregistered.
    pub async fn resolve_schema(&self, id: i32) -> ArchiveResult<Option<SchemaVersion>> {
        if let Some(version) = self.schemas.get(id) {
            return Ok(Some(version));
        }
        let Some(row) = self.index.get_schema(id).await? else {
            return Ok(None);
        };
        let version = SchemaVersion::from_schema_document(&row.content)?;
        self.schemas.insert(id, version);
        Ok(Some(version))
    }

    /// Pack `alerts` into one block container, store it under `key`, then
    /// commit every pointer and aggregate row in one index transaction.
    ///
    /// The PUT happens first; an index failure deletes the blob again and
    /// surfaces as [`ArchiveError::Compensated`]. `on_committed` runs only
    /// after both writes are durable. Replaying the same chunk key is
    /// idempotent.
    pub async fn ingest_chunk(
        &self,
        schema_id: i32,
        key: &str,
        alerts: &[AlertRecord],
        on_committed: Option<OnCommitted>,
    ) -> ArchiveResult<i64> {
        if self.resolve_schema(schema_id).await?.is_none() {
            return Err(ArchiveError::MissingSchema(schema_id));
        }

        let packed = pack(schema_id, alerts, self.codec)?;
        let size = packed.bytes.len() as i64;
        let uri = self
            .put_blob(key, packed.bytes.clone(), schema_id, alerts.len())
            .await?;

        let chunk = chunk_insert(schema_id, &uri, alerts, &packed.ranges, size);
        let blob_id = match self.index.commit_chunk(&chunk).await {
            Ok(id) => id,
            Err(err) => {
                tracing::warn!(uri = %uri, error = %err, "index commit failed, deleting blob");
                if let Err(delete_err) = self.delete_blob(&uri).await {
                    tracing::error!(uri = %uri, error = %delete_err, "compensating delete failed, blob orphaned");
                }
                return Err(ArchiveError::Compensated {
                    uri,
                    source: Box::new(err.into()),
                });
            }
        };

        tracing::debug!(uri = %uri, blob_id, count = alerts.len(), "chunk committed");
        if let Some(callback) = on_committed {
            callback();
        }
        Ok(blob_id)
    }

    /// Fetch one alert by id.
    ///
    /// A missing pointer, an unregistered schema, or a container written by
    /// an unknown codec all resolve to `Ok(None)`; only infrastructure
    /// failures surface as errors.
    pub async fn lookup(&self, alert_id: i64) -> ArchiveResult<Option<AlertRecord>> {
        let Some(pointer) = self.index.get_pointer(alert_id).await? else {
            return Ok(None);
        };
        let Some(version) = self.resolve_schema(pointer.schema_id).await? else {
            tracing::warn!(
                alert_id,
                schema_id = pointer.schema_id,
                "pointer references an unregistered schema"
            );
            return Ok(None);
        };

        let header_bytes = match self.fetch_range(&pointer.uri, 0, HEADER_PREFIX_LEN).await {
            Ok(bytes) => bytes,
            Err(ArchiveError::ObjectStore(object_store::Error::NotFound { .. })) => {
                return Ok(None)
            }
            Err(err) => return Err(err),
        };
        let header = match read_header(&header_bytes) {
            Ok((header, _)) => header,
            Err(err) => {
                tracing::warn!(uri = %pointer.uri, error = %err, "unreadable container header");
                return Ok(None);
            }
        };

        let frame = match self
            .fetch_range(&pointer.uri, pointer.blob_start as u64, pointer.blob_end as u64)
            .await
        {
            Ok(bytes) => bytes,
            Err(ArchiveError::ObjectStore(object_store::Error::NotFound { .. })) => {
                return Ok(None)
            }
            Err(err) => return Err(err),
        };
        let payload = extract_frame(&frame, header.codec)?;
        Ok(Some(AlertRecord::decode(version, &payload)?))
    }

    /// Store `bytes` under `key` with the integrity checksum and block
    /// metadata attached, returning the blob uri.
    pub async fn put_blob(
        &self,
        key: &str,
        bytes: Bytes,
        schema_id: i32,
        count: usize,
    ) -> ArchiveResult<String> {
        let checksum = hmac_sha256::Hash::hash(&bytes);
        let checksum_hex: String = checksum.iter().map(|b| format!("{b:02x}")).collect();

        let mut attributes = Attributes::new();
        attributes.insert(
            Attribute::Metadata("schema-id".into()),
            schema_id.to_string().into(),
        );
        attributes.insert(
            Attribute::Metadata("record-count".into()),
            count.to_string().into(),
        );
        attributes.insert(
            Attribute::Metadata("checksum-sha256".into()),
            checksum_hex.into(),
        );

        let opts = PutOptions {
            attributes,
            ..Default::default()
        };
        self.store
            .put_opts(&Path::from(key), bytes.into(), opts)
            .await?;
        Ok(key.to_string())
    }

    pub async fn delete_blob(&self, uri: &str) -> ArchiveResult<()> {
        self.store.delete(&Path::from(uri)).await?;
        Ok(())
    }

    /// Ranged GET of `[start, end)` from a stored blob.
    pub async fn fetch_range(&self, uri: &str, start: u64, end: u64) -> ArchiveResult<Bytes> {
        let bytes = self.store.get_range(&Path::from(uri), start..end).await?;
        Ok(bytes)
    }

    /// Delete many blobs, batched; already-gone keys are ignored.
    pub async fn delete_batch(&self, uris: &[String]) -> ArchiveResult<()> {
        for batch in uris.chunks(DELETE_BATCH) {
            let locations: Vec<object_store::Result<Path>> = batch
                .iter()
                .map(|uri| Ok(Path::from(uri.as_str())))
                .collect();
            let mut results = self
                .store
                .delete_stream(futures::stream::iter(locations).boxed());
            while let Some(result) = results.next().await {
                match result {
                    Ok(_) | Err(object_store::Error::NotFound { .. }) => {}
                    Err(err) => return Err(err.into()),
                }
            }
        }
        Ok(())
    }
}

fn chunk_insert(
    schema_id: i32,
    uri: &str,
    alerts: &[AlertRecord],
    ranges: &[(u64, u64)],
    size: i64,
) -> ChunkInsert {
    let mut pointers = Vec::with_capacity(alerts.len());
    let mut objects = Vec::new();
    let mut moving_objects = Vec::new();

    for (record, &(start, end)) in alerts.iter().zip(ranges) {
        let source = record.dia_source();
        let moving = record.moving_object();
        pointers.push(AlertPointer {
            id: record.alert_id(),
            object_id: source.object_id(),
            moving_object_id: moving.as_ref().map(|m| m.id),
            timestamp: source.midpoint_mjd_tai,
            ra: source.ra,
            dec: source.dec,
            cell_id: cell_id(source.ra, source.dec, STORAGE_NSIDE),
            blob_start: start as i64,
            blob_end: end as i64,
        });
        if let Some(object) = record.dia_object() {
            objects.push(ObjectRow {
                id: object.dia_object_id,
                ra: object.ra,
                dec: object.dec,
                cell_id: cell_id(object.ra, object.dec, STORAGE_NSIDE),
                first_seen: object.first_dia_source_mjd_tai,
                last_seen: object.last_dia_source_mjd_tai,
                detection_count: object.n_dia_sources,
            });
        }
        if let Some(moving) = moving {
            moving_objects.push(MovingObjectRow {
                id: moving.id,
                designation: moving.designation,
            });
        }
    }

    ChunkInsert {
        blob: BlobInsert {
            schema_id,
            uri: uri.to_string(),
            count: alerts.len() as i32,
            size,
        },
        alerts: pointers,
        objects,
        moving_objects,
    }
}
