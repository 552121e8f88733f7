use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::IndexResult;
use crate::models::{
    ChunkInsert, FrameRef, MovingObjectRow, ObjectRow, ResultChunkRow, ResultGroupRow, SchemaRow,
};
use crate::query::CompiledConditions;

/// The relational side of the archive.
///
/// Two implementations ship: [`crate::postgres::PgIndexStore`] for
/// production and [`crate::memory::MemoryIndex`] for tests. Both evaluate
/// the same query semantics.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Insert-if-absent; registered schemas are immutable.
    async fn insert_schema(&self, id: i32, content: &str) -> IndexResult<()>;

    async fn get_schema(&self, id: i32) -> IndexResult<Option<SchemaRow>>;

    /// Commit everything one ingested chunk produced in a single
    /// transaction and return the blob id. Replaying the same chunk is
    /// idempotent: the blob upserts on its uri and pointer rows overwrite.
    async fn commit_chunk(&self, chunk: &ChunkInsert) -> IndexResult<i64>;

    /// Resolve one alert id to its frame pointer.
    async fn get_pointer(&self, alert_id: i64) -> IndexResult<Option<FrameRef>>;

    async fn get_object(&self, id: i64) -> IndexResult<Option<ObjectRow>>;

    async fn get_moving_object(&self, id: i64) -> IndexResult<Option<MovingObjectRow>>;

    /// Stream the frame pointers matching `conditions` in id order, exact
    /// cone filter, offset and limit applied.
    fn scan_frames(&self, conditions: CompiledConditions)
        -> BoxStream<'static, IndexResult<FrameRef>>;

    async fn create_group(&self, name: &str, chunk_size: i32) -> IndexResult<ResultGroupRow>;

    async fn get_group(&self, name: &str) -> IndexResult<Option<ResultGroupRow>>;

    async fn insert_result_chunk(
        &self,
        group_id: i64,
        schema_id: i32,
        uri: &str,
        count: i32,
        size: i64,
    ) -> IndexResult<i64>;

    /// Move the group to its terminal state: failed with a message, or
    /// succeeded. Sets the resolution timestamp either way.
    async fn resolve_group(&self, group_id: i64, error: Option<&str>) -> IndexResult<()>;

    /// Claim the next unissued chunk of a group, if any. Concurrent callers
    /// never receive the same chunk.
    async fn claim_chunk(&self, group_id: i64) -> IndexResult<Option<ResultChunkRow>>;

    /// Return a claimed chunk to the unissued pool.
    async fn release_chunk(&self, chunk_id: i64) -> IndexResult<()>;

    async fn delete_chunk_row(&self, chunk_id: i64) -> IndexResult<()>;

    async fn group_chunk_uris(&self, group_id: i64) -> IndexResult<Vec<String>>;

    /// Delete the group row; chunk rows cascade.
    async fn delete_group_rows(&self, group_id: i64) -> IndexResult<()>;
}
