//! In-memory index backend for tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;

use crate::error::{IndexError, IndexResult};
use crate::models::{
    AlertRow, BlobRow, ChunkInsert, FrameRef, MovingObjectRow, ObjectRow, ResultChunkRow,
    ResultGroupRow, SchemaRow,
};
use crate::query::{CompiledConditions, Order};
use crate::store::IndexStore;

#[derive(Default)]
struct Inner {
    schemas: BTreeMap<i32, String>,
    blobs: BTreeMap<i64, BlobRow>,
    blob_ids_by_uri: HashMap<String, i64>,
    alerts: BTreeMap<i64, AlertRow>,
    objects: BTreeMap<i64, ObjectRow>,
    moving_objects: BTreeMap<i64, MovingObjectRow>,
    groups: BTreeMap<i64, ResultGroupRow>,
    chunks: BTreeMap<i64, ResultChunkRow>,
    next_blob_id: i64,
    next_group_id: i64,
    next_chunk_id: i64,
}

/// Same semantics as the Postgres backend, one mutex instead of a pool.
#[derive(Default, Clone)]
pub struct MemoryIndex {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blob_count(&self) -> usize {
        self.inner.lock().blobs.len()
    }
}

#[async_trait]
impl IndexStore for MemoryIndex {
    async fn insert_schema(&self, id: i32, content: &str) -> IndexResult<()> {
        self.inner
            .lock()
            .schemas
            .entry(id)
            .or_insert_with(|| content.to_string());
        Ok(())
    }

    async fn get_schema(&self, id: i32) -> IndexResult<Option<SchemaRow>> {
        Ok(self.inner.lock().schemas.get(&id).map(|content| SchemaRow {
            id,
            content: content.clone(),
        }))
    }

    async fn commit_chunk(&self, chunk: &ChunkInsert) -> IndexResult<i64> {
        let mut inner = self.inner.lock();

        let blob_id = match inner.blob_ids_by_uri.get(&chunk.blob.uri) {
            Some(&id) => id,
            None => {
                inner.next_blob_id += 1;
                let id = inner.next_blob_id;
                inner.blob_ids_by_uri.insert(chunk.blob.uri.clone(), id);
                id
            }
        };
        inner.blobs.insert(
            blob_id,
            BlobRow {
                id: blob_id,
                schema_id: chunk.blob.schema_id,
                uri: chunk.blob.uri.clone(),
                count: chunk.blob.count,
                size: chunk.blob.size,
                refcount: 0,
            },
        );

        for object in &chunk.objects {
            match inner.objects.get(&object.id) {
                Some(stored)
                    if object.detection_count.is_some()
                        && stored.detection_count.is_some()
                        && object.detection_count <= stored.detection_count => {}
                _ => {
                    inner.objects.insert(object.id, object.clone());
                }
            }
        }

        for moving in &chunk.moving_objects {
            inner
                .moving_objects
                .entry(moving.id)
                .or_insert_with(|| moving.clone());
        }

        for pointer in &chunk.alerts {
            inner.alerts.insert(
                pointer.id,
                AlertRow {
                    id: pointer.id,
                    object_id: pointer.object_id,
                    moving_object_id: pointer.moving_object_id,
                    timestamp: pointer.timestamp,
                    ra: pointer.ra,
                    dec: pointer.dec,
                    cell_id: pointer.cell_id,
                    blob_id,
                    blob_start: pointer.blob_start,
                    blob_end: pointer.blob_end,
                },
            );
        }

        Ok(blob_id)
    }

    async fn get_pointer(&self, alert_id: i64) -> IndexResult<Option<FrameRef>> {
        let inner = self.inner.lock();
        Ok(inner.alerts.get(&alert_id).map(|alert| {
            let blob = &inner.blobs[&alert.blob_id];
            FrameRef {
                alert_id: alert.id,
                schema_id: blob.schema_id,
                uri: blob.uri.clone(),
                blob_start: alert.blob_start,
                blob_end: alert.blob_end,
                ra: alert.ra,
                dec: alert.dec,
            }
        }))
    }

    async fn get_object(&self, id: i64) -> IndexResult<Option<ObjectRow>> {
        Ok(self.inner.lock().objects.get(&id).cloned())
    }

    async fn get_moving_object(&self, id: i64) -> IndexResult<Option<MovingObjectRow>> {
        Ok(self.inner.lock().moving_objects.get(&id).cloned())
    }

    fn scan_frames(
        &self,
        conditions: CompiledConditions,
    ) -> BoxStream<'static, IndexResult<FrameRef>> {
        let inner = self.inner.lock();
        let mut matched: Vec<FrameRef> = inner
            .alerts
            .values()
            .filter(|alert| conditions.matches(alert))
            .map(|alert| {
                let blob = &inner.blobs[&alert.blob_id];
                FrameRef {
                    alert_id: alert.id,
                    schema_id: blob.schema_id,
                    uri: blob.uri.clone(),
                    blob_start: alert.blob_start,
                    blob_end: alert.blob_end,
                    ra: alert.ra,
                    dec: alert.dec,
                }
            })
            .collect();
        if conditions.order == Order::Desc {
            matched.reverse();
        }
        let frames: Vec<FrameRef> = matched
            .into_iter()
            .skip(conditions.offset as usize)
            .take(conditions.limit.unwrap_or(u64::MAX) as usize)
            .collect();
        stream::iter(frames.into_iter().map(Ok)).boxed()
    }

    async fn create_group(&self, name: &str, chunk_size: i32) -> IndexResult<ResultGroupRow> {
        let mut inner = self.inner.lock();
        if inner.groups.values().any(|group| group.name == name) {
            return Err(IndexError::DuplicateGroup(name.to_string()));
        }
        inner.next_group_id += 1;
        let row = ResultGroupRow {
            id: inner.next_group_id,
            name: name.to_string(),
            chunk_size,
            error: None,
            msg: None,
            created_at: Utc::now(),
            resolved_at: None,
        };
        inner.groups.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_group(&self, name: &str) -> IndexResult<Option<ResultGroupRow>> {
        Ok(self
            .inner
            .lock()
            .groups
            .values()
            .find(|group| group.name == name)
            .cloned())
    }

    async fn insert_result_chunk(
        &self,
        group_id: i64,
        schema_id: i32,
        uri: &str,
        count: i32,
        size: i64,
    ) -> IndexResult<i64> {
        let mut inner = self.inner.lock();
        inner.next_chunk_id += 1;
        let id = inner.next_chunk_id;
        inner.chunks.insert(
            id,
            ResultChunkRow {
                id,
                schema_id,
                group_id,
                uri: uri.to_string(),
                count,
                size,
                issued_at: None,
            },
        );
        Ok(id)
    }

    async fn resolve_group(&self, group_id: i64, error: Option<&str>) -> IndexResult<()> {
        let mut inner = self.inner.lock();
        if let Some(group) = inner.groups.get_mut(&group_id) {
            group.error = Some(error.is_some());
            group.msg = error.map(str::to_string);
            group.resolved_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn claim_chunk(&self, group_id: i64) -> IndexResult<Option<ResultChunkRow>> {
        let mut inner = self.inner.lock();
        let next = inner
            .chunks
            .values_mut()
            .find(|chunk| chunk.group_id == group_id && chunk.issued_at.is_none());
        Ok(next.map(|chunk| {
            chunk.issued_at = Some(Utc::now());
            chunk.clone()
        }))
    }

    async fn release_chunk(&self, chunk_id: i64) -> IndexResult<()> {
        if let Some(chunk) = self.inner.lock().chunks.get_mut(&chunk_id) {
            chunk.issued_at = None;
        }
        Ok(())
    }

    async fn delete_chunk_row(&self, chunk_id: i64) -> IndexResult<()> {
        self.inner.lock().chunks.remove(&chunk_id);
        Ok(())
    }

    async fn group_chunk_uris(&self, group_id: i64) -> IndexResult<Vec<String>> {
        Ok(self
            .inner
            .lock()
            .chunks
            .values()
            .filter(|chunk| chunk.group_id == group_id)
            .map(|chunk| chunk.uri.clone())
            .collect())
    }

    async fn delete_group_rows(&self, group_id: i64) -> IndexResult<()> {
        let mut inner = self.inner.lock();
        inner.groups.remove(&group_id);
        inner.chunks.retain(|_, chunk| chunk.group_id != group_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AlertPointer, BlobInsert};
    use crate::query::AlertQuery;
    use futures::TryStreamExt;

    fn pointer(id: i64, timestamp: f64) -> AlertPointer {
        AlertPointer {
            id,
            object_id: Some(id * 10),
            moving_object_id: None,
            timestamp,
            ra: 10.0,
            dec: -5.0,
            cell_id: 77,
            blob_start: 32,
            blob_end: 64,
        }
    }

    fn chunk(uri: &str, alerts: Vec<AlertPointer>) -> ChunkInsert {
        ChunkInsert {
            blob: BlobInsert {
                schema_id: 1,
                uri: uri.to_string(),
                count: alerts.len() as i32,
                size: 4096,
            },
            alerts,
            objects: vec![],
            moving_objects: vec![],
        }
    }

    #[tokio::test]
    async fn replaying_a_chunk_is_idempotent() {
        let index = MemoryIndex::new();
        index.insert_schema(1, "{}").await.expect("schema");
        let insert = chunk("topic/000/1-2", vec![pointer(1, 60000.0), pointer(2, 60000.1)]);

        let first = index.commit_chunk(&insert).await.expect("first commit");
        let second = index.commit_chunk(&insert).await.expect("replay");

        assert_eq!(first, second, "replay must resolve to the same blob");
        assert_eq!(index.blob_count(), 1);
        let before = index.get_pointer(1).await.expect("get").expect("pointer");
        let after = index.get_pointer(1).await.expect("get").expect("pointer");
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn aggregate_upsert_never_regresses_the_detection_count() {
        let index = MemoryIndex::new();
        index.insert_schema(1, "{}").await.expect("schema");
        let object = |count: Option<i32>, ra: f64| ObjectRow {
            id: 5,
            ra,
            dec: 0.0,
            cell_id: 1,
            first_seen: Some(59000.0),
            last_seen: Some(60000.0),
            detection_count: count,
        };

        let mut insert = chunk("topic/000/1-1", vec![pointer(1, 60000.0)]);
        insert.objects = vec![object(Some(5), 1.0)];
        index.commit_chunk(&insert).await.expect("commit");

        // stale chunk with a lower count must not win
        insert.objects = vec![object(Some(3), 2.0)];
        index.commit_chunk(&insert).await.expect("commit");
        let stored = index.get_object(5).await.expect("get").expect("object");
        assert_eq!(stored.detection_count, Some(5));
        assert_eq!(stored.ra, 1.0);

        insert.objects = vec![object(Some(8), 3.0)];
        index.commit_chunk(&insert).await.expect("commit");
        let stored = index.get_object(5).await.expect("get").expect("object");
        assert_eq!(stored.detection_count, Some(8));
        assert_eq!(stored.ra, 3.0);

        // a null incoming count always replaces
        insert.objects = vec![object(None, 4.0)];
        index.commit_chunk(&insert).await.expect("commit");
        let stored = index.get_object(5).await.expect("get").expect("object");
        assert_eq!(stored.detection_count, None);
    }

    #[tokio::test]
    async fn moving_object_first_write_wins() {
        let index = MemoryIndex::new();
        index.insert_schema(1, "{}").await.expect("schema");
        let mut insert = chunk("topic/000/1-1", vec![pointer(1, 60000.0)]);
        insert.moving_objects = vec![MovingObjectRow {
            id: 9,
            designation: Some("2024 AB1".into()),
        }];
        index.commit_chunk(&insert).await.expect("commit");

        insert.moving_objects = vec![MovingObjectRow {
            id: 9,
            designation: Some("renamed".into()),
        }];
        index.commit_chunk(&insert).await.expect("commit");

        let stored = index.get_moving_object(9).await.expect("get").expect("row");
        assert_eq!(stored.designation.as_deref(), Some("2024 AB1"));
    }

    #[tokio::test]
    async fn scan_respects_order_offset_and_limit() {
        let index = MemoryIndex::new();
        index.insert_schema(1, "{}").await.expect("schema");
        let alerts = (1..=5).map(|id| pointer(id, 60000.0 + id as f64)).collect();
        index
            .commit_chunk(&chunk("topic/000/1-5", alerts))
            .await
            .expect("commit");

        let mut query = AlertQuery {
            offset: 1,
            limit: Some(2),
            ..Default::default()
        };
        let ids: Vec<i64> = index
            .scan_frames(query.compile())
            .map_ok(|frame| frame.alert_id)
            .try_collect()
            .await
            .expect("scan");
        assert_eq!(ids, vec![2, 3]);

        query.order = Order::Desc;
        let ids: Vec<i64> = index
            .scan_frames(query.compile())
            .map_ok(|frame| frame.alert_id)
            .try_collect()
            .await
            .expect("scan");
        assert_eq!(ids, vec![4, 3]);
    }

    #[tokio::test]
    async fn claimed_chunks_are_exclusive_until_released() {
        let index = MemoryIndex::new();
        index.insert_schema(1, "{}").await.expect("schema");
        let group = index.create_group("job-1", 100).await.expect("group");
        let first = index
            .insert_result_chunk(group.id, 1, "group/job-1/0.block", 10, 100)
            .await
            .expect("chunk");
        index
            .insert_result_chunk(group.id, 1, "group/job-1/1.block", 10, 100)
            .await
            .expect("chunk");

        let a = index.claim_chunk(group.id).await.expect("claim").expect("some");
        let b = index.claim_chunk(group.id).await.expect("claim").expect("some");
        assert_ne!(a.id, b.id);
        assert!(index.claim_chunk(group.id).await.expect("claim").is_none());

        index.release_chunk(first).await.expect("release");
        let again = index.claim_chunk(group.id).await.expect("claim").expect("some");
        assert_eq!(again.id, first);

        index.delete_chunk_row(first).await.expect("delete");
        assert!(index.claim_chunk(group.id).await.expect("claim").is_none());
    }

    #[tokio::test]
    async fn concurrent_claimants_never_share_a_chunk() {
        let index = MemoryIndex::new();
        index.insert_schema(1, "{}").await.expect("schema");
        let group = index.create_group("job-1", 100).await.expect("group");
        index
            .insert_result_chunk(group.id, 1, "group/job-1/0.block", 10, 100)
            .await
            .expect("chunk");

        let left = {
            let index = index.clone();
            tokio::spawn(async move { index.claim_chunk(group.id).await })
        };
        let right = {
            let index = index.clone();
            tokio::spawn(async move { index.claim_chunk(group.id).await })
        };
        let a = left.await.expect("join").expect("claim");
        let b = right.await.expect("join").expect("claim");
        assert!(
            a.is_some() ^ b.is_some(),
            "exactly one claimant may receive the chunk"
        );
    }

    #[tokio::test]
    async fn duplicate_group_names_are_rejected() {
        let index = MemoryIndex::new();
        index.create_group("job-1", 100).await.expect("group");
        let err = index.create_group("job-1", 100).await.expect_err("dup");
        assert!(matches!(err, IndexError::DuplicateGroup(_)));
    }
}
