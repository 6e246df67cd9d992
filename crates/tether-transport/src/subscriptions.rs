//! Event subscription table and synchronous fan-out.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tether_proto::EventFrame;
use tracing::warn;

/// Wildcard subscription name: receive every event.
pub const WILDCARD: &str = "*";

/// Handler invoked for each matching inbound event.
pub type EventHandler = Arc<dyn Fn(&EventFrame) + Send + Sync>;

/// Opaque handle identifying one subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Entry {
    id: u64,
    event: String,
    handler: EventHandler,
}

/// Registry of event handlers for one connection.
///
/// Handlers are called synchronously, in subscription order, from the
/// connection's read path. A panicking handler is caught and logged; it
/// never affects sibling handlers or the connection itself.
#[derive(Default)]
pub struct SubscriptionTable {
    entries: Mutex<Vec<Entry>>,
    next_id: AtomicU64,
}

impl SubscriptionTable {
    /// Register a handler for an event name (or [`WILDCARD`]).
    pub fn add(&self, event: impl Into<String>, handler: EventHandler) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.entries.lock().push(Entry {
            id,
            event: event.into(),
            handler,
        });
        SubscriptionId(id)
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub fn remove(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| e.id != id.0);
        entries.len() != before
    }

    /// Drop every subscription (disconnect path).
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Fan an event out to every handler registered for its name.
    pub fn dispatch(&self, frame: &EventFrame) {
        // Snapshot matching handlers so the lock is not held during calls.
        let handlers: Vec<EventHandler> = self
            .entries
            .lock()
            .iter()
            .filter(|e| e.event == frame.event || e.event == WILDCARD)
            .map(|e| Arc::clone(&e.handler))
            .collect();

        for handler in handlers {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| handler(frame)));
            if result.is_err() {
                warn!(event = %frame.event, "event handler panicked; continuing");
            }
        }
    }
}
