//! Pipeline event types and broadcast bus
//!
//! Events describe the lifecycle of one ETP run. They are emitted by the
//! orchestrator and fanned out to SSE clients through [`EventBus`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Pipeline stage names used in events and error reports
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extract,
    Transform,
    Predict,
    Assemble,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Extract => "extract",
            Stage::Transform => "transform",
            Stage::Predict => "predict",
            Stage::Assemble => "assemble",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events emitted during an ETP run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// Resources (stream consumer + store pool) were wired or replaced
    ResourcesInitialized {
        topic: String,
        group_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A run was accepted and is about to extract
    RunStarted {
        run_id: Uuid,
        request_id: u64,
        batch_size: usize,
        timestamp: DateTime<Utc>,
    },

    /// One stage finished successfully
    StageCompleted {
        run_id: Uuid,
        stage: Stage,
        /// Rows leaving the stage
        rows: usize,
        elapsed_ms: u64,
    },

    /// A run produced a complete result
    RunCompleted {
        run_id: Uuid,
        request_id: u64,
        scored: usize,
        dropped: usize,
        unmatched: usize,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A run ended in a typed failure
    RunFailed {
        run_id: Uuid,
        request_id: u64,
        stage: Option<Stage>,
        kind: String,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    /// SSE event name
    pub fn event_type(&self) -> &str {
        match self {
            PipelineEvent::ResourcesInitialized { .. } => "ResourcesInitialized",
            PipelineEvent::RunStarted { .. } => "RunStarted",
            PipelineEvent::StageCompleted { .. } => "StageCompleted",
            PipelineEvent::RunCompleted { .. } => "RunCompleted",
            PipelineEvent::RunFailed { .. } => "RunFailed",
        }
    }
}

/// Broadcast bus for pipeline events
///
/// Cloning is cheap; all clones share one channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PipelineEvent,
    ) -> Result<usize, broadcast::error::SendError<PipelineEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
