//! Change notifications for presentation collaborators.
//!
//! The store publishes a [`StoreEvent`] after every successful mutation, and
//! the persistence layer publishes flush outcomes. A view subscribes once and
//! refreshes whatever it shows when an event for its collection arrives.
//!
//! # Example
//!
//! ```rust
//! use sdalocal_core::event_bus::{EventBus, StoreEvent};
//! use sdalocal_core::persistence::CollectionKind;
//!
//! let bus = EventBus::new();
//! let mut rx = bus.subscribe();
//!
//! bus.emit(StoreEvent::RecordAdded { collection: CollectionKind::Events, id: 1 });
//!
//! assert!(rx.try_recv().is_ok());
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::persistence::CollectionKind;

/// Default channel capacity for the event bus.
/// Slow subscribers beyond this many buffered events start missing events.
const DEFAULT_CAPACITY: usize = 256;

/// Something observable happened to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StoreEvent {
    RecordAdded { collection: CollectionKind, id: u64 },
    RecordUpdated { collection: CollectionKind, id: u64 },
    RecordRemoved { collection: CollectionKind, id: u64 },
    /// The state as of `generation` is on disk.
    Flushed { generation: u64 },
    FlushFailed { reason: String },
}

impl StoreEvent {
    /// The collection this event concerns, if it is a record change.
    pub fn collection(&self) -> Option<CollectionKind> {
        match self {
            StoreEvent::RecordAdded { collection, .. }
            | StoreEvent::RecordUpdated { collection, .. }
            | StoreEvent::RecordRemoved { collection, .. } => Some(*collection),
            StoreEvent::Flushed { .. } | StoreEvent::FlushFailed { .. } => None,
        }
    }
}

/// Broadcasts [`StoreEvent`]s to any number of subscribers.
pub struct EventBus {
    sender: broadcast::Sender<StoreEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event.
    ///
    /// Returns the number of subscribers that will see it. With no
    /// subscribers the event is dropped and 0 is returned.
    pub fn emit(&self, event: StoreEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Receive all future events. Past events are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    fn added(id: u64) -> StoreEvent {
        StoreEvent::RecordAdded {
            collection: CollectionKind::Projects,
            id,
        }
    }

    #[test]
    fn emit_without_subscribers_returns_zero() {
        let bus = EventBus::new();
        assert_eq!(bus.emit(added(1)), 0);
    }

    #[test]
    fn every_subscriber_receives_events() {
        let bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        assert_eq!(bus.emit(added(7)), 2);

        assert_eq!(first.try_recv().unwrap(), added(7));
        assert_eq!(second.try_recv().unwrap(), added(7));
        assert!(matches!(first.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn late_subscriber_misses_earlier_events() {
        let bus = EventBus::new();
        let _early = bus.subscribe();
        bus.emit(added(1));

        let mut late = bus.subscribe();
        assert!(matches!(late.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn slow_subscriber_lags() {
        let bus = EventBus::with_capacity(2);
        let mut rx = bus.subscribe();
        for id in 0..5 {
            bus.emit(added(id));
        }
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Lagged(_))));
    }

    #[test]
    fn collection_is_reported_for_record_changes() {
        assert_eq!(added(1).collection(), Some(CollectionKind::Projects));
        assert_eq!(StoreEvent::Flushed { generation: 3 }.collection(), None);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(StoreEvent::RecordRemoved {
            collection: CollectionKind::MediaChatEntries,
            id: 5,
        })
        .unwrap();
        assert_eq!(json["type"], "recordRemoved");
        assert_eq!(json["collection"], "mediaChatEntries");
        assert_eq!(json["id"], 5);
    }
}
