//! PostgreSQL index backend.

use std::str::FromStr;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::stream::BoxStream;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Pool, Postgres, QueryBuilder};

use crate::error::{IndexError, IndexResult};
use crate::models::{
    ChunkInsert, FrameRef, MovingObjectRow, ObjectRow, ResultChunkRow, ResultGroupRow, SchemaRow,
};
use crate::query::{CompiledConditions, Order};
use crate::store::IndexStore;

const SCHEMA: &str = include_str!("schema.sql");

const SCAN_PAGE_SIZE: i64 = 1000;

fn schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

pub struct PgIndexStore {
    pool: Pool<Postgres>,
}

impl PgIndexStore {
    /// Connect and apply the embedded schema. The statement timeout, when
    /// configured, bounds every statement on every pooled connection; a
    /// cancelled scan surfaces as [`IndexError::Timeout`].
    pub async fn connect(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> IndexResult<Self> {
        let mut opts = PgConnectOptions::from_str(url)?;
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{timeout_ms}ms"))]);
        }
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Connect using the process configuration.
    pub async fn connect_from_env() -> IndexResult<Self> {
        let config = &*boreal_config::CONFIG;
        Self::connect(
            &config.database_url,
            config.database_max_connections,
            config.statement_timeout_ms,
        )
        .await
    }

    async fn migrate(&self) -> IndexResult<()> {
        // Postgres rejects multiple statements in one prepared statement,
        // so the schema is applied piecewise.
        let statements = schema_statements(SCHEMA);
        let count = statements.len();
        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::info!(statements = count, "index schema applied");
        Ok(())
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

fn page_query(
    conditions: &CompiledConditions,
    cursor: Option<i64>,
) -> QueryBuilder<'static, Postgres> {
    let mut qb: QueryBuilder<'static, Postgres> = QueryBuilder::new(
        "SELECT a.id AS alert_id, b.schema_id, b.uri, a.blob_start, a.blob_end, a.ra, a.\"dec\" \
         FROM alerts a JOIN blobs b ON b.id = a.blob_id WHERE TRUE",
    );
    if let Some(object_id) = conditions.object_id {
        qb.push(" AND a.object_id = ");
        qb.push_bind(object_id);
    }
    if let Some(ranges) = &conditions.cell_ranges {
        qb.push(" AND (FALSE");
        for &(lo, hi) in ranges {
            qb.push(" OR (a.cell_id >= ");
            qb.push_bind(lo);
            qb.push(" AND a.cell_id < ");
            qb.push_bind(hi);
            qb.push(")");
        }
        qb.push(")");
    }
    if let Some(time) = conditions.time {
        if let Some(since) = time.since {
            qb.push(" AND a.timestamp >= ");
            qb.push_bind(since);
        }
        if let Some(before) = time.before {
            qb.push(" AND a.timestamp < ");
            qb.push_bind(before);
        }
    }
    if let Some(cursor) = cursor {
        match conditions.order {
            Order::Asc => {
                qb.push(" AND a.id > ");
                qb.push_bind(cursor);
            }
            Order::Desc => {
                qb.push(" AND a.id < ");
                qb.push_bind(cursor);
            }
        }
    }
    match conditions.order {
        Order::Asc => qb.push(" ORDER BY a.id"),
        Order::Desc => qb.push(" ORDER BY a.id DESC"),
    };
    qb.push(" LIMIT ");
    qb.push_bind(SCAN_PAGE_SIZE);
    qb
}

#[async_trait]
impl IndexStore for PgIndexStore {
    async fn insert_schema(&self, id: i32, content: &str) -> IndexResult<()> {
        sqlx::query("INSERT INTO schemas (id, content) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING")
            .bind(id)
            .bind(content)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_schema(&self, id: i32) -> IndexResult<Option<SchemaRow>> {
        let row = sqlx::query_as::<_, SchemaRow>("SELECT * FROM schemas WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn commit_chunk(&self, chunk: &ChunkInsert) -> IndexResult<i64> {
        let mut tx = self.pool.begin().await?;

        // Replays upsert on the uri, so the same chunk key always resolves
        // to one blob row.
        let blob_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO blobs (schema_id, uri, count, size)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (uri) DO UPDATE
            SET count = EXCLUDED.count, size = EXCLUDED.size
            RETURNING id
            "#,
        )
        .bind(chunk.blob.schema_id)
        .bind(&chunk.blob.uri)
        .bind(chunk.blob.count)
        .bind(chunk.blob.size)
        .fetch_one(&mut *tx)
        .await?;

        for object in &chunk.objects {
            sqlx::query(
                r#"
                INSERT INTO objects (id, ra, "dec", cell_id, first_seen, last_seen, detection_count)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (id) DO UPDATE
                SET ra = EXCLUDED.ra, "dec" = EXCLUDED."dec", cell_id = EXCLUDED.cell_id,
                    first_seen = EXCLUDED.first_seen, last_seen = EXCLUDED.last_seen,
                    detection_count = EXCLUDED.detection_count
                WHERE EXCLUDED.detection_count IS NULL
                   OR objects.detection_count IS NULL
                   OR EXCLUDED.detection_count > objects.detection_count
                "#,
            )
            .bind(object.id)
            .bind(object.ra)
            .bind(object.dec)
            .bind(object.cell_id)
            .bind(object.first_seen)
            .bind(object.last_seen)
            .bind(object.detection_count)
            .execute(&mut *tx)
            .await?;
        }

        for moving in &chunk.moving_objects {
            sqlx::query(
                "INSERT INTO moving_objects (id, designation) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING",
            )
            .bind(moving.id)
            .bind(&moving.designation)
            .execute(&mut *tx)
            .await?;
        }

        for alert in &chunk.alerts {
            sqlx::query(
                r#"
                INSERT INTO alerts
                    (id, object_id, moving_object_id, timestamp, ra, "dec", cell_id,
                     blob_id, blob_start, blob_end)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (id) DO UPDATE
                SET object_id = EXCLUDED.object_id,
                    moving_object_id = EXCLUDED.moving_object_id,
                    timestamp = EXCLUDED.timestamp,
                    ra = EXCLUDED.ra, "dec" = EXCLUDED."dec", cell_id = EXCLUDED.cell_id,
                    blob_id = EXCLUDED.blob_id,
                    blob_start = EXCLUDED.blob_start, blob_end = EXCLUDED.blob_end
                "#,
            )
            .bind(alert.id)
            .bind(alert.object_id)
            .bind(alert.moving_object_id)
            .bind(alert.timestamp)
            .bind(alert.ra)
            .bind(alert.dec)
            .bind(alert.cell_id)
            .bind(blob_id)
            .bind(alert.blob_start)
            .bind(alert.blob_end)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(blob_id)
    }

    async fn get_pointer(&self, alert_id: i64) -> IndexResult<Option<FrameRef>> {
        let row = sqlx::query_as::<_, FrameRef>(
            r#"
            SELECT a.id AS alert_id, b.schema_id, b.uri, a.blob_start, a.blob_end, a.ra, a."dec"
            FROM alerts a JOIN blobs b ON b.id = a.blob_id
            WHERE a.id = $1
            "#,
        )
        .bind(alert_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_object(&self, id: i64) -> IndexResult<Option<ObjectRow>> {
        let row = sqlx::query_as::<_, ObjectRow>("SELECT * FROM objects WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_moving_object(&self, id: i64) -> IndexResult<Option<MovingObjectRow>> {
        let row = sqlx::query_as::<_, MovingObjectRow>("SELECT * FROM moving_objects WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    fn scan_frames(
        &self,
        conditions: CompiledConditions,
    ) -> BoxStream<'static, IndexResult<FrameRef>> {
        let pool = self.pool.clone();
        Box::pin(try_stream! {
            // Keyset pagination keeps each statement bounded and lets a
            // statement-timeout cancellation surface per page.
            let mut cursor: Option<i64> = None;
            let mut skipped: u64 = 0;
            let mut yielded: u64 = 0;
            'pages: loop {
                let mut page = page_query(&conditions, cursor);
                let rows: Vec<FrameRef> = page.build_query_as().fetch_all(&pool).await?;
                let exhausted = (rows.len() as i64) < SCAN_PAGE_SIZE;
                for row in rows {
                    cursor = Some(row.alert_id);
                    if !conditions.cone_matches(row.ra, row.dec) {
                        continue;
                    }
                    if skipped < conditions.offset {
                        skipped += 1;
                        continue;
                    }
                    yield row;
                    yielded += 1;
                    if conditions.limit.is_some_and(|limit| yielded >= limit) {
                        break 'pages;
                    }
                }
                if exhausted {
                    break;
                }
            }
        })
    }

    async fn create_group(&self, name: &str, chunk_size: i32) -> IndexResult<ResultGroupRow> {
        let result = sqlx::query_as::<_, ResultGroupRow>(
            "INSERT INTO result_groups (name, chunk_size) VALUES ($1, $2) RETURNING *",
        )
        .bind(name)
        .bind(chunk_size)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => Ok(row),
            Err(sqlx::Error::Database(db)) if db.code().as_deref() == Some("23505") => {
                Err(IndexError::DuplicateGroup(name.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn get_group(&self, name: &str) -> IndexResult<Option<ResultGroupRow>> {
        let row = sqlx::query_as::<_, ResultGroupRow>("SELECT * FROM result_groups WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn insert_result_chunk(
        &self,
        group_id: i64,
        schema_id: i32,
        uri: &str,
        count: i32,
        size: i64,
    ) -> IndexResult<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO result_chunks (schema_id, group_id, uri, count, size)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(schema_id)
        .bind(group_id)
        .bind(uri)
        .bind(count)
        .bind(size)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn resolve_group(&self, group_id: i64, error: Option<&str>) -> IndexResult<()> {
        sqlx::query(
            r#"
            UPDATE result_groups
            SET error = $2, msg = $3, resolved_at = now()
            WHERE id = $1
            "#,
        )
        .bind(group_id)
        .bind(error.is_some())
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn claim_chunk(&self, group_id: i64) -> IndexResult<Option<ResultChunkRow>> {
        // SKIP LOCKED keeps concurrent claimants from blocking on, or
        // receiving, the same row.
        let row = sqlx::query_as::<_, ResultChunkRow>(
            r#"
            WITH next_chunk AS (
                SELECT id FROM result_chunks
                WHERE group_id = $1 AND issued_at IS NULL
                ORDER BY id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE result_chunks SET issued_at = now()
            WHERE id IN (SELECT id FROM next_chunk)
            RETURNING *
            "#,
        )
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn release_chunk(&self, chunk_id: i64) -> IndexResult<()> {
        sqlx::query("UPDATE result_chunks SET issued_at = NULL WHERE id = $1")
            .bind(chunk_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_chunk_row(&self, chunk_id: i64) -> IndexResult<()> {
        sqlx::query("DELETE FROM result_chunks WHERE id = $1")
            .bind(chunk_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn group_chunk_uris(&self, group_id: i64) -> IndexResult<Vec<String>> {
        let uris = sqlx::query_scalar::<_, String>(
            "SELECT uri FROM result_chunks WHERE group_id = $1 ORDER BY id",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(uris)
    }

    async fn delete_group_rows(&self, group_id: i64) -> IndexResult<()> {
        sqlx::query("DELETE FROM result_groups WHERE id = $1")
            .bind(group_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
