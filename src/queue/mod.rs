//! Queue gateway
//!
//! The worker sees the broker through three seams:
//! - [`MessageSource`] yields inbound deliveries one at a time
//! - [`Acknowledger`] settles a single delivery (ack / nack)
//! - [`NoticePublisher`] announces finished jobs downstream
//!
//! [`amqp`] implements them on RabbitMQ, [`memory`] in process for tests.

pub mod amqp;
pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::job::Job;

pub use amqp::{AmqpGateway, AmqpPublisher, AmqpSource};
pub use memory::{MemoryPublisher, MemoryQueue, MemorySource, Settlement};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("Failed to encode notice: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("No broker URL configured for {0}")]
    MissingUrl(&'static str),

    #[error("Channel closed: {0}")]
    Closed(String),

    #[error("Broker rejected notice published to exchange {0}")]
    Rejected(String),
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// Settles one delivery
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<()>;

    async fn nack(&self, requeue: bool) -> Result<()>;
}

/// A single inbound delivery.
///
/// `ack` and `nack` consume the message, so it is settled at most once.
pub struct InboundMessage {
    id: Uuid,
    payload: Bytes,
    redelivered: bool,
    acker: Box<dyn Acknowledger>,
}

impl InboundMessage {
    pub fn new(payload: impl Into<Bytes>, redelivered: bool, acker: Box<dyn Acknowledger>) -> Self {
        Self {
            id: Uuid::now_v7(),
            payload: payload.into(),
            redelivered,
            acker,
        }
    }

    /// Correlation id for logs, assigned on receipt
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    pub async fn ack(self) -> Result<()> {
        self.acker.ack().await
    }

    pub async fn nack(self, requeue: bool) -> Result<()> {
        self.acker.nack(requeue).await
    }
}

impl fmt::Debug for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundMessage")
            .field("id", &self.id)
            .field("size", &self.payload.len())
            .field("redelivered", &self.redelivered)
            .finish()
    }
}

/// Stream of inbound deliveries
#[async_trait]
pub trait MessageSource: Send {
    /// Next delivery; `None` once the consumer is cancelled (e.g. the queue
    /// was deleted)
    async fn next_message(&mut self) -> Option<Result<InboundMessage>>;
}

/// Downstream completion notices
#[async_trait]
pub trait NoticePublisher: Send + Sync {
    /// Publish the job persistently to the outbound exchange
    async fn publish(&self, job: &Job) -> Result<()>;
}
