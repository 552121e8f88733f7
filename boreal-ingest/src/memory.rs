//! Scripted in-process consumer for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::consumer::{AlertConsumer, AlertEnvelope, BrokerError, TopicPartition};

#[derive(Debug, Clone)]
pub enum ConsumerEvent {
    Deliver(AlertEnvelope),
    /// A rebalance takes the partition away; observed at the next poll.
    Revoke(TopicPartition),
    /// One poll comes back empty.
    Quiet,
    Fail(String),
}

/// Plays back a scripted event sequence. Once the script is exhausted every
/// poll waits out its timeout and returns nothing.
#[derive(Default)]
pub struct InMemoryConsumer {
    events: Mutex<VecDeque<ConsumerEvent>>,
    revoked: Mutex<Vec<TopicPartition>>,
    committed: Mutex<HashMap<TopicPartition, i64>>,
    fail_commits: AtomicBool,
    commit_attempts: AtomicUsize,
    closed: AtomicBool,
}

impl InMemoryConsumer {
    pub fn new(events: impl IntoIterator<Item = ConsumerEvent>) -> Self {
        Self {
            events: Mutex::new(events.into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn committed(&self, tp: &TopicPartition) -> Option<i64> {
        self.committed.lock().get(tp).copied()
    }

    pub fn committed_offsets(&self) -> HashMap<TopicPartition, i64> {
        self.committed.lock().clone()
    }

    /// Make every commit from here on fail with a transport error.
    pub fn refuse_commits(&self) {
        self.fail_commits.store(true, Ordering::SeqCst);
    }

    pub fn commit_attempts(&self) -> usize {
        self.commit_attempts.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn exhausted(&self) -> bool {
        self.events.lock().is_empty()
    }
}

#[async_trait]
impl AlertConsumer for InMemoryConsumer {
    async fn poll(&self, timeout: Duration) -> Result<Option<AlertEnvelope>, BrokerError> {
        loop {
            let event = self.events.lock().pop_front();
            match event {
                Some(ConsumerEvent::Deliver(envelope)) => return Ok(Some(envelope)),
                Some(ConsumerEvent::Revoke(tp)) => {
                    self.revoked.lock().push(tp);
                    continue;
                }
                Some(ConsumerEvent::Quiet) => return Ok(None),
                Some(ConsumerEvent::Fail(reason)) => return Err(BrokerError::Transport(reason)),
                None => {
                    tokio::time::sleep(timeout).await;
                    return Ok(None);
                }
            }
        }
    }

    fn commit(&self, tp: &TopicPartition, next_offset: i64) -> Result<(), BrokerError> {
        self.commit_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(BrokerError::Transport("commit refused".to_string()));
        }
        self.committed.lock().insert(tp.clone(), next_offset);
        Ok(())
    }

    fn take_revoked(&self) -> Vec<TopicPartition> {
        std::mem::take(&mut self.revoked.lock())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
