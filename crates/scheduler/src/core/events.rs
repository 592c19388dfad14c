//! Ordered event emitter with sequence guarantees.
//!
//! Every envelope published through one emitter carries a sequence number
//! one higher than the previous one, so subscribers can order events of
//! concurrent runs sharing a bus.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use events::{Event, EventBus, EventEnvelope};

/// Event emitter with sequence number guarantees.
#[derive(Clone)]
pub struct OrderedEventEmitter {
    bus: EventBus,
    sequence: Arc<AtomicU64>,
}

impl OrderedEventEmitter {
    /// Create a new ordered event emitter wrapping the given bus.
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event with the next sequence number and return that number.
    pub fn emit(&self, event: Event) -> u64 {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        self.bus
            .publish(EventEnvelope::new(event).with_sequence(sequence));
        sequence
    }

    /// Sequence number of the last emitted event, 0 before the first.
    pub fn current_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Get a reference to the underlying event bus.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }
}

impl std::fmt::Debug for OrderedEventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderedEventEmitter")
            .field("sequence", &self.current_sequence())
            .finish()
    }
}
