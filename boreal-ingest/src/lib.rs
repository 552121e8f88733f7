//! Stream ingestor.
//!
//! One poll loop, one buffer per assigned partition. A buffer flushes as a
//! single archive chunk when it reaches the size threshold, when the
//! partition's schema changes, or when it sits idle past the inactivity
//! timeout. Offsets commit only in the archive's post-commit callback, so
//! delivery is at-least-once and replays are absorbed by the idempotent
//! chunk commit.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use boreal_alert::AlertRecord;
use boreal_archive::Archive;

pub mod consumer;
pub mod error;
pub mod memory;

pub use consumer::{AlertConsumer, AlertEnvelope, BrokerError, TopicPartition};
pub use error::{IngestError, IngestResult};
pub use memory::{ConsumerEvent, InMemoryConsumer};

#[derive(Debug, Clone)]
pub struct IngestorConfig {
    /// Records per partition buffer before a flush.
    pub flush_threshold: usize,
    /// Idle time after which the sweep flushes a buffer.
    pub idle_timeout: Duration,
    /// Upper bound for one broker poll.
    pub poll_timeout: Duration,
}

impl IngestorConfig {
    pub fn from_env() -> Self {
        let config = &*boreal_config::CONFIG;
        Self {
            flush_threshold: config.flush_threshold,
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
            poll_timeout: Duration::from_secs(config.poll_timeout_secs),
        }
    }
}

impl Default for IngestorConfig {
    fn default() -> Self {
        Self {
            flush_threshold: 1000,
            idle_timeout: Duration::from_secs(300),
            poll_timeout: Duration::from_secs(5),
        }
    }
}

struct PartitionBuffer {
    schema_id: i32,
    schema: String,
    records: Vec<AlertRecord>,
    first_offset: i64,
    last_offset: i64,
    last_activity: Instant,
}

impl PartitionBuffer {
    fn open(envelope: &AlertEnvelope) -> Self {
        Self {
            schema_id: envelope.schema_id,
            schema: envelope.schema.clone(),
            records: Vec::new(),
            first_offset: envelope.offset,
            last_offset: envelope.offset,
            last_activity: Instant::now(),
        }
    }

    fn push(&mut self, record: AlertRecord, offset: i64) {
        self.records.push(record);
        self.last_offset = offset;
        self.last_activity = Instant::now();
    }
}

pub struct Ingestor<C: AlertConsumer + 'static> {
    archive: Arc<Archive>,
    consumer: Arc<C>,
    config: IngestorConfig,
    buffers: HashMap<TopicPartition, PartitionBuffer>,
    /// Filled by the post-commit callback when an offset commit fails.
    commit_failure: Arc<Mutex<Option<BrokerError>>>,
}

impl<C: AlertConsumer + 'static> Ingestor<C> {
    pub fn new(archive: Arc<Archive>, consumer: Arc<C>, config: IngestorConfig) -> Self {
        Self {
            archive,
            consumer,
            config,
            buffers: HashMap::new(),
            commit_failure: Arc::new(Mutex::new(None)),
        }
    }

    /// Run until cancelled or a fatal error.
    ///
    /// Cancellation stops polling without flushing: buffered records were
    /// never offset-committed and are redelivered to whoever picks the
    /// partitions up next.
    pub async fn run(mut self, shutdown: CancellationToken) -> IngestResult<()> {
        loop {
            let consumer = self.consumer.clone();
            let polled = tokio::select! {
                _ = shutdown.cancelled() => break,
                polled = consumer.poll(self.config.poll_timeout) => polled?,
            };

            for tp in self.consumer.take_revoked() {
                if let Some(buffer) = self.buffers.remove(&tp) {
                    tracing::info!(
                        partition = %tp,
                        discarded = buffer.records.len(),
                        "partition revoked, buffer discarded"
                    );
                }
            }

            if let Some(envelope) = polled {
                self.accept(envelope).await?;
            }
            self.sweep_idle().await?;
        }

        let unflushed: usize = self.buffers.values().map(|b| b.records.len()).sum();
        if unflushed > 0 {
            tracing::info!(unflushed, "shutting down with unflushed records");
        }
        self.consumer.close();
        Ok(())
    }

    async fn accept(&mut self, envelope: AlertEnvelope) -> IngestResult<()> {
        let tp = envelope.partition_key();

        // A schema change closes the buffer; the new message opens a fresh
        // one so every stored chunk is schema-homogeneous.
        let schema_changed = self
            .buffers
            .get(&tp)
            .is_some_and(|buffer| buffer.schema_id != envelope.schema_id);
        if schema_changed {
            if let Some(buffer) = self.buffers.remove(&tp) {
                self.flush(&tp, buffer).await?;
            }
        }

        let buffer = self
            .buffers
            .entry(tp.clone())
            .or_insert_with(|| PartitionBuffer::open(&envelope));
        buffer.push(envelope.record, envelope.offset);

        if buffer.records.len() >= self.config.flush_threshold {
            if let Some(buffer) = self.buffers.remove(&tp) {
                self.flush(&tp, buffer).await?;
            }
        }
        Ok(())
    }

    async fn sweep_idle(&mut self) -> IngestResult<()> {
        let now = Instant::now();
        let idle: Vec<TopicPartition> = self
            .buffers
            .iter()
            .filter(|(_, buffer)| now.duration_since(buffer.last_activity) >= self.config.idle_timeout)
            .map(|(tp, _)| tp.clone())
            .collect();
        for tp in idle {
            if let Some(buffer) = self.buffers.remove(&tp) {
                tracing::debug!(partition = %tp, "flushing idle buffer");
                self.flush(&tp, buffer).await?;
            }
        }
        Ok(())
    }

    async fn flush(&self, tp: &TopicPartition, buffer: PartitionBuffer) -> IngestResult<()> {
        let key = format!(
            "{}/{:03}/{:020}-{:020}",
            tp.topic, tp.partition, buffer.first_offset, buffer.last_offset
        );
        self.archive
            .ensure_schema(buffer.schema_id, &buffer.schema)
            .await?;

        let consumer = self.consumer.clone();
        let commit_tp = tp.clone();
        let commit_failure = self.commit_failure.clone();
        let next_offset = buffer.last_offset + 1;
        let count = buffer.records.len();
        self.archive
            .ingest_chunk(
                buffer.schema_id,
                &key,
                &buffer.records,
                Some(Box::new(move || {
                    if let Err(err) = consumer.commit(&commit_tp, next_offset) {
                        tracing::error!(partition = %commit_tp, error = %err, "offset commit failed");
                        *commit_failure.lock() = Some(err);
                    }
                })),
            )
            .await?;

        // The callback ran on this task, so a failed commit is visible
        // right here. It is fatal: the restart resumes from the last
        // committed offsets and the idempotent chunk commit absorbs the
        // replay.
        if let Some(err) = self.commit_failure.lock().take() {
            return Err(err.into());
        }

        tracing::info!(partition = %tp, count, key, "flushed partition buffer");
        Ok(())
    }
}
