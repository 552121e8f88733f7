//! Result export pipeline.
//!
//! An export job streams the frame pointers matching a query in id order,
//! re-reads each frame with a ranged GET, and splices the raw frames into
//! schema-homogeneous chunk containers of at most `chunk_size` records,
//! without re-encoding any payload. Finished chunks become claimable rows;
//! consumers lease them one at a time with `claim`, and either `release`
//! them back or `delete` them once drained. The job's outcome is recorded
//! on its result group, so a failed export never looks half-finished.

use std::sync::Arc;

use futures::TryStreamExt;

use boreal_alert::{validate_projection, AlertError, SchemaVersion};
use boreal_archive::{Archive, ArchiveError};
use boreal_codec::{splice, strip_sync};
use boreal_index::{AlertQuery, IndexError, ResultChunkRow, ResultGroupRow};

pub mod error;

pub use error::{ExportError, ExportResult};

pub struct Exporter {
    archive: Arc<Archive>,
}

/// A projection must name columns some supported packet generation has;
/// the check rejects before any group bookkeeping happens.
fn check_projection(query: &AlertQuery) -> Result<(), AlertError> {
    let mut last_err = None;
    for version in SchemaVersion::ALL {
        match validate_projection(version, &query.include_columns, &query.exclude_columns) {
            Ok(()) => return Ok(()),
            Err(err) => last_err = Some(err),
        }
    }
    match last_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

impl Exporter {
    pub fn new(archive: Arc<Archive>) -> Self {
        Self { archive }
    }

    /// The configured records-per-chunk, for jobs that do not choose their
    /// own.
    pub fn default_chunk_size() -> i32 {
        boreal_config::CONFIG.export_chunk_size as i32
    }

    /// Run an export job to completion and return the resolved group.
    ///
    /// Any failure while populating is contained: the group resolves as
    /// terminal-failed with the error message, and the error does not
    /// propagate. Only bookkeeping failures (creating or resolving the
    /// group itself) surface as `Err`.
    pub async fn run_export(
        &self,
        name: &str,
        chunk_size: i32,
        query: &AlertQuery,
    ) -> ExportResult<ResultGroupRow> {
        check_projection(query)?;
        let index = self.archive.index();
        let group = index.create_group(name, chunk_size).await?;

        match self.populate(&group, query).await {
            Ok(chunks) => {
                index.resolve_group(group.id, None).await?;
                tracing::info!(group = name, chunks, "export complete");
            }
            Err(err) => {
                let msg = err.to_string();
                tracing::warn!(group = name, error = %msg, "export failed");
                index.resolve_group(group.id, Some(&msg)).await?;
            }
        }

        index
            .get_group(name)
            .await?
            .ok_or_else(|| IndexError::GroupNotFound(name.to_string()).into())
    }

    async fn populate(&self, group: &ResultGroupRow, query: &AlertQuery) -> ExportResult<u64> {
        let mut frames = self.archive.index().scan_frames(query.compile());
        let mut batch: Vec<Vec<u8>> = Vec::new();
        let mut batch_schema: Option<i32> = None;
        let mut seq: u64 = 0;

        while let Some(frame) = frames.try_next().await? {
            if let Some(schema) = batch_schema {
                if !batch.is_empty() && schema != frame.schema_id {
                    self.flush(group, schema, &mut batch, &mut seq).await?;
                }
            }

            let bytes = self
                .archive
                .fetch_range(&frame.uri, frame.blob_start as u64, frame.blob_end as u64)
                .await?;
            batch.push(strip_sync(&bytes)?.to_vec());
            batch_schema = Some(frame.schema_id);

            if batch.len() >= group.chunk_size as usize {
                self.flush(group, frame.schema_id, &mut batch, &mut seq).await?;
            }
        }

        if let Some(schema) = batch_schema {
            if !batch.is_empty() {
                self.flush(group, schema, &mut batch, &mut seq).await?;
            }
        }
        Ok(seq)
    }

    /// Splice the batched frames into one chunk container, store it, and
    /// insert the chunk row. A row-insert failure deletes the stored chunk
    /// again before propagating.
    async fn flush(
        &self,
        group: &ResultGroupRow,
        schema_id: i32,
        batch: &mut Vec<Vec<u8>>,
        seq: &mut u64,
    ) -> ExportResult<()> {
        let frames = std::mem::take(batch);
        let count = frames.len();
        let spliced = splice(schema_id, &frames, self.archive.codec())?;
        let size = spliced.len() as i64;
        let key = format!("group/{}/{:020}.block", group.name, *seq);
        let uri = self.archive.put_blob(&key, spliced, schema_id, count).await?;

        match self
            .archive
            .index()
            .insert_result_chunk(group.id, schema_id, &uri, count as i32, size)
            .await
        {
            Ok(_) => {
                tracing::debug!(group = %group.name, uri, count, "chunk stored");
                *seq += 1;
                Ok(())
            }
            Err(err) => {
                tracing::warn!(group = %group.name, uri, error = %err, "chunk row insert failed, deleting chunk");
                if let Err(delete_err) = self.archive.delete_blob(&uri).await {
                    tracing::error!(uri, error = %delete_err, "compensating delete failed, chunk orphaned");
                }
                Err(ArchiveError::Compensated {
                    uri,
                    source: Box::new(err.into()),
                }
                .into())
            }
        }
    }

    /// Lease the next undelivered chunk of a group, if any.
    pub async fn claim(&self, group_name: &str) -> ExportResult<Option<ResultChunkRow>> {
        let index = self.archive.index();
        let group = index
            .get_group(group_name)
            .await?
            .ok_or_else(|| IndexError::GroupNotFound(group_name.to_string()))?;
        Ok(index.claim_chunk(group.id).await?)
    }

    /// Return a claimed chunk to the pool.
    pub async fn release(&self, chunk: &ResultChunkRow) -> ExportResult<()> {
        self.archive.index().release_chunk(chunk.id).await?;
        Ok(())
    }

    /// Drop a drained chunk: object first, then the row.
    pub async fn delete_chunk(&self, chunk: &ResultChunkRow) -> ExportResult<()> {
        self.archive.delete_blob(&chunk.uri).await?;
        self.archive.index().delete_chunk_row(chunk.id).await?;
        Ok(())
    }

    /// Drop a whole group: batched object deletes, then the cascade row
    /// delete.
    pub async fn delete_group(&self, group_name: &str) -> ExportResult<()> {
        let index = self.archive.index();
        let group = index
            .get_group(group_name)
            .await?
            .ok_or_else(|| IndexError::GroupNotFound(group_name.to_string()))?;
        let uris = index.group_chunk_uris(group.id).await?;
        self.archive.delete_batch(&uris).await?;
        index.delete_group_rows(group.id).await?;
        tracing::info!(group = group_name, chunks = uris.len(), "group deleted");
        Ok(())
    }
}
