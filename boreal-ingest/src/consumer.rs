//! Broker consumer seam.
//!
//! The archive never talks wire protocol: a deployed consumer wraps the
//! broker client and its schema-registry deserializer and hands over fully
//! decoded envelopes. Offset tracking stays on the broker side of the seam.

use std::time::Duration;

use async_trait::async_trait;

use boreal_alert::AlertRecord;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl std::fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.topic, self.partition)
    }
}

/// One decoded message with its provenance.
#[derive(Debug, Clone)]
pub struct AlertEnvelope {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub schema_id: i32,
    /// The registered schema document the record was decoded under.
    pub schema: String,
    pub record: AlertRecord,
}

impl AlertEnvelope {
    pub fn partition_key(&self) -> TopicPartition {
        TopicPartition {
            topic: self.topic.clone(),
            partition: self.partition,
        }
    }
}

/// Broker failures are fatal to the ingest loop; the process restarts and
/// resumes from the last committed offsets.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker transport failure: {0}")]
    Transport(String),
    #[error("undecodable message at {tp}@{offset}: {reason}")]
    Decode {
        tp: TopicPartition,
        offset: i64,
        reason: String,
    },
}

#[async_trait]
pub trait AlertConsumer: Send + Sync {
    /// Deliver at most one message, waiting up to `timeout` for one to
    /// arrive.
    async fn poll(&self, timeout: Duration) -> Result<Option<AlertEnvelope>, BrokerError>;

    /// Commit the next offset to consume for a partition.
    fn commit(&self, tp: &TopicPartition, next_offset: i64) -> Result<(), BrokerError>;

    /// Partitions revoked by a rebalance since the last call.
    fn take_revoked(&self) -> Vec<TopicPartition>;

    fn close(&self);
}
