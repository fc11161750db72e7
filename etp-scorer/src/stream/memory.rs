//! In-process stream source
//!
//! Backed by a queue of payloads. Used by tests and by local runs that feed
//! the scorer without an event log.

use super::{Poll, StreamError, StreamMessage, StreamSource};
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct MemorySource {
    pending: VecDeque<Vec<u8>>,
    position: i64,
    committed: i64,
    /// Report `Closed` (instead of `Idle`) once drained
    close_when_drained: bool,
}

impl MemorySource {
    /// Finite source: reports `Closed` after the last payload
    pub fn new<I, P>(payloads: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Vec<u8>>,
    {
        Self {
            pending: payloads.into_iter().map(Into::into).collect(),
            position: 0,
            committed: 0,
            close_when_drained: true,
        }
    }

    /// Live source: reports `Idle` after the last payload
    pub fn open<I, P>(payloads: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Vec<u8>>,
    {
        Self {
            close_when_drained: false,
            ..Self::new(payloads)
        }
    }

    pub fn push(&mut self, payload: impl Into<Vec<u8>>) {
        self.pending.push_back(payload.into());
    }

    /// Payloads not yet consumed
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    /// Last committed position
    pub fn committed(&self) -> i64 {
        self.committed
    }
}

#[async_trait::async_trait]
impl StreamSource for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    async fn poll(&mut self) -> Result<Poll, StreamError> {
        match self.pending.pop_front() {
            Some(payload) => {
                let offset = self.position;
                self.position += 1;
                Ok(Poll::Message(StreamMessage { offset, payload }))
            }
            None if self.close_when_drained => Ok(Poll::Closed),
            None => Ok(Poll::Idle),
        }
    }

    async fn commit(&mut self) -> Result<(), StreamError> {
        self.committed = self.position;
        Ok(())
    }

    fn position(&self) -> i64 {
        self.position
    }
}
