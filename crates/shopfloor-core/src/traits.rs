//! Collaborator traits at the pipeline's boundaries.
//!
//! The dispatcher owns no storage and no socket: persistence goes through
//! [`EventStore`] and real-time delivery through [`Transport`]. Any concrete
//! implementation satisfying these traits is pluggable.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::Result;
use crate::events::Event;

/// Callback invoked with each raw inbound transport message.
pub type MessageCallback = Box<dyn Fn(String) + Send + Sync>;

/// Callback invoked on transport lifecycle transitions.
pub type LifecycleCallback = Box<dyn Fn() + Send + Sync>;

/// Opaque persistence capability consumed when routing marks an event type
/// as persisted. The storage schema is the implementor's concern.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn persist(&self, event: &Event) -> Result<()>;
}

/// Abstract real-time transport (WebSocket or equivalent).
///
/// The bridge depends on this interface only. Lifecycle callbacks drive the
/// bridge's connection-state reporting.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;

    /// Forward one encoded message. Callers check [`Transport::is_connected`]
    /// first; sending while disconnected may fail.
    fn send(&self, data: String) -> Result<()>;

    fn is_connected(&self) -> bool;

    fn on_message(&self, callback: MessageCallback);
    fn on_connect(&self, callback: LifecycleCallback);
    fn on_disconnect(&self, callback: LifecycleCallback);
}

/// In-memory event store for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryEventStore {
    events: Mutex<Vec<Event>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything persisted so far, in persistence order.
    pub fn persisted(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn persist(&self, event: &Event) -> Result<()> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventDraft, EventPayload};

    fn sample_event() -> Event {
        EventDraft::new(EventPayload::SystemAlert {
            message: "lift 3 overdue for inspection".to_string(),
            severity: Some("warning".to_string()),
        })
        .finalize()
    }

    #[tokio::test]
    async fn test_memory_store_persists_in_order() {
        let store = MemoryEventStore::new();
        assert!(store.is_empty());

        let first = sample_event();
        let second = sample_event();
        store.persist(&first).await.unwrap();
        store.persist(&second).await.unwrap();

        let persisted = store.persisted();
        assert_eq!(persisted.len(), 2);
        assert_eq!(persisted[0].id, first.id);
        assert_eq!(persisted[1].id, second.id);
    }
}
