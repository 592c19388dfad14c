//! Event types for the run lifecycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping all events with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event ID
    pub id: Uuid,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// Position in the emitter's stream, 0 when published directly
    #[serde(default)]
    pub sequence: u64,
    /// The actual event
    pub event: Event,
}

impl EventEnvelope {
    /// Create a new event envelope with auto-generated ID and timestamp
    pub fn new(event: Event) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            sequence: 0,
            event,
        }
    }

    /// Stamp the envelope with a sequence number
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }
}

/// All possible events emitted by a run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A run started executing the regular phases
    #[serde(rename = "run.started")]
    RunStarted { run_id: Uuid, phases: usize },

    /// The run moved to another lifecycle state
    #[serde(rename = "run.state_changed")]
    RunStateChanged {
        run_id: Uuid,
        from_state: String,
        to_state: String,
    },

    /// A regular phase failed and the error was routed to `$error`
    #[serde(rename = "run.failed")]
    RunFailed { run_id: Uuid, error: String },

    /// The run reached its final state
    #[serde(rename = "run.finished")]
    RunFinished {
        run_id: Uuid,
        success: bool,
        duration_ms: u64,
    },

    /// The run future was dropped before it finished
    #[serde(rename = "run.abandoned")]
    RunAbandoned { run_id: Uuid, state: String },
}

impl Event {
    /// Get the run ID associated with this event
    pub fn run_id(&self) -> Uuid {
        match self {
            Event::RunStarted { run_id, .. }
            | Event::RunStateChanged { run_id, .. }
            | Event::RunFailed { run_id, .. }
            | Event::RunFinished { run_id, .. }
            | Event::RunAbandoned { run_id, .. } => *run_id,
        }
    }

    /// Whether this event ends the run's event stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::RunFinished { .. } | Event::RunAbandoned { .. })
    }
}
