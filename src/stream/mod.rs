//! Event stream module
//!
//! Ordered, at-least-once delivery of "user created" notifications.
//! Consumers commit offsets explicitly; anything not committed is delivered
//! again after a rewind or a restart.

mod memory;
mod postgres;

use async_trait::async_trait;

pub use memory::MemoryEventStream;
pub use postgres::{PgEventStream, PgStreamConfig};

/// Position of a message within its partition
pub type Offset = i64;

/// A message read from the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMessage {
    pub partition: i32,
    pub offset: Offset,
    pub payload: String,
}

/// Stream errors
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Stream unavailable: {0}")]
    Unavailable(String),

    #[error("Subscription closed")]
    Closed,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StreamError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, StreamError::Closed)
    }
}

/// A topic that hands out per-partition subscriptions
#[async_trait]
pub trait EventStream: Send + Sync {
    /// Start consuming `partition` from its last committed offset
    async fn subscribe(&self, partition: i32) -> Result<Box<dyn Subscription>, StreamError>;
}

/// A consumer's view of one partition
#[async_trait]
pub trait Subscription: Send {
    /// Next message after the current position. Waits for new messages;
    /// returns `None` once the stream is closed and drained.
    async fn receive(&mut self) -> Result<Option<StreamMessage>, StreamError>;

    /// Acknowledge every message up to and including `offset`
    async fn commit(&mut self, offset: Offset) -> Result<(), StreamError>;

    /// Move the read position back to the last committed offset so that
    /// uncommitted messages are delivered again
    async fn seek_to_committed(&mut self) -> Result<(), StreamError>;

    /// Release the consumer
    async fn close(&mut self) -> Result<(), StreamError>;
}
