//! Event bus implementation using tokio broadcast channels
//!
//! Publishing never blocks a run: with no subscribers the event is dropped,
//! and slow subscribers observe lag instead of applying back-pressure.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use crate::types::EventEnvelope;

/// Capacity for the broadcast channel
const DEFAULT_CAPACITY: usize = 256;

/// Event bus for publishing and subscribing to run events
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
    /// Number of events published (for monitoring)
    published: Arc<AtomicUsize>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a new event bus with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            published: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Publish an event to all subscribers
    ///
    /// Returns the number of subscribers that received the event.
    pub fn publish(&self, envelope: EventEnvelope) -> usize {
        self.published.fetch_add(1, Ordering::Relaxed);
        self.sender.send(envelope).unwrap_or(0)
    }

    /// Subscribe to every event published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    /// Subscribe to the events of a single run
    pub fn subscribe_run(&self, run_id: Uuid) -> RunSubscription {
        RunSubscription {
            run_id,
            receiver: self.sender.subscribe(),
            finished: false,
        }
    }

    /// Get the number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Get the total number of events published
    pub fn event_count(&self) -> usize {
        self.published.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .field("event_count", &self.event_count())
            .finish()
    }
}

/// Receiver filtered to one run.
///
/// Yields `None` once the run's terminal event was delivered or the bus
/// was dropped. Lagged events are skipped.
pub struct RunSubscription {
    run_id: Uuid,
    receiver: broadcast::Receiver<EventEnvelope>,
    finished: bool,
}

impl RunSubscription {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub async fn next(&mut self) -> Option<EventEnvelope> {
        if self.finished {
            return None;
        }
        loop {
            match self.receiver.recv().await {
                Ok(envelope) if envelope.event.run_id() == self.run_id => {
                    self.finished = envelope.event.is_terminal();
                    return Some(envelope);
                }
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => {
                    self.finished = true;
                    return None;
                }
            }
        }
    }
}
