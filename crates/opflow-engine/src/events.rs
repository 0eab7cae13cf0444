//! Process event system for observability.
//!
//! Emits [`ProcessEvent`]s via a [`tokio::sync::broadcast`] channel so that
//! external observers such as debuggers can follow a run without
//! coupling to the engine internals. Subscribers are the process's listener
//! list.

use serde::{Deserialize, Serialize};

use opflow_types::ArtifactSummary;

use crate::control::BreakpointPosition;

/// Events emitted during a process run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProcessEvent {
    ProcessStarted {
        process: String,
        run_id: String,
        operator_count: usize,
    },
    OperatorStarted {
        operator: String,
        type_name: String,
        apply_count: u64,
    },
    OperatorFinished {
        operator: String,
        duration_ms: u64,
        artifacts: usize,
    },
    BreakpointReached {
        operator: String,
        position: BreakpointPosition,
        artifacts: Vec<ArtifactSummary>,
    },
    ProcessResumed {
        operator: String,
    },
    MacroDefined {
        operator: String,
        name: String,
        value: String,
    },
    ProcessCompleted {
        process: String,
        duration_ms: u64,
        artifacts: Vec<ArtifactSummary>,
    },
    ProcessStopped {
        process: String,
        operator: String,
    },
    ProcessFailed {
        process: String,
        operator: Option<String>,
        error: String,
    },
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<ProcessEvent>,
}

impl EventEmitter {
    /// Create a new emitter with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    ///
    /// If there are no active receivers the event is silently dropped.
    pub fn emit(&self, event: ProcessEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ProcessEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}
