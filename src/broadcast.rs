//! Broadcast gateway: ordered fan-out of engine events.
//!
//! The engine depends on the narrow [`EventSink`] seam; the concrete
//! transport behind it (websockets, SSE, polling) is swappable without
//! touching engine logic. Emission order is the engine's processing order,
//! and each subscriber observes events in that order.

use crate::types::GameEvent;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

/// Observer seam the engine emits through. Implementations must not
/// reorder events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &GameEvent);
}

/// Fan-out over a tokio broadcast channel. Every subscriber receives the
/// engine's events verbatim and in order; a subscriber that falls too far
/// behind observes a lag error rather than reordered delivery.
pub struct BroadcastGateway {
    tx: broadcast::Sender<GameEvent>,
}

impl BroadcastGateway {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventSink for BroadcastGateway {
    fn emit(&self, event: &GameEvent) {
        if self.tx.send(event.clone()).is_err() {
            debug!("no subscribers for engine event");
        }
    }
}

/// Test double that records events in emission order.
pub struct RecordingSink {
    events: Mutex<Vec<GameEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn snapshot(&self) -> Vec<GameEvent> {
        self.events.lock().expect("recording sink poisoned").clone()
    }

    pub fn take(&self) -> Vec<GameEvent> {
        std::mem::take(&mut *self.events.lock().expect("recording sink poisoned"))
    }
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &GameEvent) {
        self.events
            .lock()
            .expect("recording sink poisoned")
            .push(event.clone());
    }
}
