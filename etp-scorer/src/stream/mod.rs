//! Stream sources feeding the extractor
//!
//! A source hands out opaque messages one at a time and owns a durable read
//! position. The extractor decides how many to take; the source only reports
//! whether a message is available now, nothing is available yet, or nothing
//! will ever arrive.

pub mod event_log;
pub mod memory;

pub use event_log::EventLogSource;
pub use memory::MemorySource;

use thiserror::Error;

/// One message as read from the stream
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMessage {
    /// Position of this message within its topic
    pub offset: i64,
    /// Raw payload (JSON text for every source in this crate)
    pub payload: Vec<u8>,
}

/// Result of one poll
#[derive(Debug, Clone, PartialEq)]
pub enum Poll {
    Message(StreamMessage),
    /// Nothing available right now; more may arrive
    Idle,
    /// Source is finished; nothing will arrive
    Closed,
}

/// Stream transport failure
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Stream database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Stream unavailable: {0}")]
    Unavailable(String),
}

/// A consumable stream with a durable read position
#[async_trait::async_trait]
pub trait StreamSource: Send {
    /// Short label for logs (topic name, "memory", ...)
    fn name(&self) -> &str;

    /// Take the next message, advancing the in-memory read position
    async fn poll(&mut self) -> Result<Poll, StreamError>;

    /// Persist the current read position
    async fn commit(&mut self) -> Result<(), StreamError>;

    /// Offset of the next message to be read
    fn position(&self) -> i64;
}
