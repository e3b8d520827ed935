//! Change notifications for independent consumers
//!
//! The coordinator publishes on a broadcast channel; consumers subscribe
//! and invalidate their own caches without the coordinator knowing who
//! they are. Publishing with no subscribers is not an error.

use tokio::sync::broadcast;
use tracing::trace;

use crate::status::SyncStatus;
use crate::types::SyncReport;

/// Default capacity for the event broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events emitted by the coordinator
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// A sync pass finished
    SyncCompleted {
        success: usize,
        failed: usize,
        skipped: usize,
    },
    /// A character was removed from the library
    CharacterDeleted { id: String },
    /// A character was created or updated
    CharacterSaved { id: String },
    /// The manual repair path collapsed duplicates
    DuplicatesRepaired { removed: usize },
    /// Sync status changed
    StatusChanged(SyncStatus),
}

impl StoreEvent {
    /// Get the character id associated with this event, if any
    pub fn character_id(&self) -> Option<&str> {
        match self {
            StoreEvent::CharacterDeleted { id } | StoreEvent::CharacterSaved { id } => {
                Some(id.as_str())
            }
            _ => None,
        }
    }
}

impl From<SyncReport> for StoreEvent {
    fn from(report: SyncReport) -> Self {
        StoreEvent::SyncCompleted {
            success: report.success,
            failed: report.failed,
            skipped: report.skipped,
        }
    }
}

/// Process-wide publish/subscribe channel for [`StoreEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StoreEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Returns a receiver that gets every event published from now on.
    ///
    /// Multiple subscribers can exist; events are broadcast to all.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: StoreEvent) {
        trace!(?event, "Publishing store event");
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}
