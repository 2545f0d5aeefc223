//! In-process gateway for tests: records settlements and published notices

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{Acknowledger, InboundMessage, MessageSource, NoticePublisher, QueueError, Result};
use crate::job::Job;

/// How a delivery was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Acked,
    Nacked { requeue: bool },
}

#[derive(Debug, Default)]
struct State {
    pending: VecDeque<(Bytes, bool)>,
    requeued: Vec<Bytes>,
    settled: Vec<(Bytes, Settlement)>,
    unsettled: usize,
    max_unsettled: usize,
    fail_settlements: bool,
}

/// Queue with broker-like delivery bookkeeping.
///
/// Requeued messages are parked until [`MemoryQueue::redeliver`] so a
/// permanently failing job cannot spin a test forever.
#[derive(Debug, Clone, Default)]
pub struct MemoryQueue {
    state: Arc<Mutex<State>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, payload: impl Into<Bytes>) {
        self.state.lock().await.pending.push_back((payload.into(), false));
    }

    /// Put requeued messages back at the tail, flagged as redelivered
    pub async fn redeliver(&self) -> usize {
        let mut state = self.state.lock().await;
        let requeued: Vec<Bytes> = state.requeued.drain(..).collect();
        let count = requeued.len();
        state
            .pending
            .extend(requeued.into_iter().map(|payload| (payload, true)));
        count
    }

    /// Make every following ack/nack fail like a dropped channel
    pub async fn fail_settlements(&self) {
        self.state.lock().await.fail_settlements = true;
    }

    pub async fn settlements(&self) -> Vec<Settlement> {
        self.state
            .lock()
            .await
            .settled
            .iter()
            .map(|(_, settlement)| *settlement)
            .collect()
    }

    pub async fn pending(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn requeued(&self) -> usize {
        self.state.lock().await.requeued.len()
    }

    /// Highest number of deliveries handed out but not yet settled
    pub async fn max_unsettled(&self) -> usize {
        self.state.lock().await.max_unsettled
    }

    /// Consumer that ends once the queue is drained
    pub fn source(&self) -> MemorySource {
        MemorySource {
            state: self.state.clone(),
        }
    }
}

/// Consumer side of a [`MemoryQueue`]
#[derive(Debug)]
pub struct MemorySource {
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl MessageSource for MemorySource {
    async fn next_message(&mut self) -> Option<Result<InboundMessage>> {
        let mut state = self.state.lock().await;
        let (payload, redelivered) = state.pending.pop_front()?;

        state.unsettled += 1;
        state.max_unsettled = state.max_unsettled.max(state.unsettled);

        let acker = MemoryAcker {
            state: self.state.clone(),
            payload: payload.clone(),
        };
        Some(Ok(InboundMessage::new(payload, redelivered, Box::new(acker))))
    }
}

struct MemoryAcker {
    state: Arc<Mutex<State>>,
    payload: Bytes,
}

impl MemoryAcker {
    async fn settle(&self, settlement: Settlement) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.fail_settlements {
            return Err(QueueError::Closed("memory queue rejected settlement".to_string()));
        }

        state.unsettled = state.unsettled.saturating_sub(1);
        if settlement == (Settlement::Nacked { requeue: true }) {
            state.requeued.push(self.payload.clone());
        }
        state.settled.push((self.payload.clone(), settlement));
        Ok(())
    }
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> Result<()> {
        self.settle(Settlement::Acked).await
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        self.settle(Settlement::Nacked { requeue }).await
    }
}

/// Publisher recording every notice
#[derive(Debug, Clone, Default)]
pub struct MemoryPublisher {
    published: Arc<Mutex<Vec<Job>>>,
    failing: Arc<Mutex<bool>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn published(&self) -> Vec<Job> {
        self.published.lock().await.clone()
    }

    pub async fn set_failing(&self, failing: bool) {
        *self.failing.lock().await = failing;
    }
}

#[async_trait]
impl NoticePublisher for MemoryPublisher {
    async fn publish(&self, job: &Job) -> Result<()> {
        if *self.failing.lock().await {
            return Err(QueueError::Closed("memory publisher rejected notice".to_string()));
        }

        tracing::info!(title = %job.title, "Memory publish");
        self.published.lock().await.push(job.clone());
        Ok(())
    }
}
