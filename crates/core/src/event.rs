//! Domain event system: decoupled observation of the engine.
//!
//! The engine publishes an event whenever it makes a decision worth
//! watching: a completion is requested, a tool ran, history was truncated,
//! or the loop stopped. Subscribers filter for what they care about.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Why the completion loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model answered without requesting tools
    NoToolCalls,
    /// A tool or hook asked to stop
    ToolRequestedStop,
    /// Tool calls were requested but none could be dispatched
    NothingDispatched,
    /// The iteration cap was reached
    MaxIterations,
}

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A completion is about to be requested from the provider
    CompletionRequested {
        model: String,
        iteration: usize,
        messages: usize,
        context_tokens: usize,
        timestamp: DateTime<Utc>,
    },

    /// A tool was dispatched or rejected
    ToolExecuted {
        tool_name: String,
        call_id: String,
        called: bool,
        proceed: bool,
        timestamp: DateTime<Utc>,
    },

    /// History was truncated to fit the model window
    ContextTruncated {
        removed: usize,
        budget: usize,
        timestamp: DateTime<Utc>,
    },

    /// The completion loop stopped
    LoopStopped {
        iterations: usize,
        reason: StopReason,
        timestamp: DateTime<Utc>,
    },
}

/// Fan-out of engine events over a `tokio::sync::broadcast` channel.
/// Slow subscribers lag and lose the oldest events; publishing never blocks.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// A bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: DomainEvent) {
        // send only fails when nobody listens
        let _ = self.sender.send(Arc::new(event));
    }

    /// Events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}
