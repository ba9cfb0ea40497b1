//! Subscription registry: who gets which events.
//!
//! Handlers are registered against one or more event types, optionally with
//! a filter predicate and one-shot semantics. For a given event, handlers
//! fire in subscription insertion order (no priority among handlers).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use uuid::Uuid;

use shopfloor_core::{new_v7, Event, EventType, Result};

/// Predicate deciding whether a subscription wants a particular event.
pub type FilterFn = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// Trait for event handlers.
///
/// A handler is a pure side-effecting consumer: it receives an owned copy
/// of the event and reports success or failure. Failures are isolated per
/// handler and feed the dispatcher's retry machinery.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Event) -> Result<()>;
}

/// Adapter turning an async closure into an [`EventHandler`].
pub struct FnHandler {
    f: Box<dyn Fn(Event) -> BoxFuture<'static, Result<()>> + Send + Sync>,
}

/// Wrap an async closure as an [`EventHandler`].
pub fn handler_fn<F, Fut>(f: F) -> FnHandler
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    FnHandler {
        f: Box::new(move |event| Box::pin(f(event))),
    }
}

#[async_trait]
impl EventHandler for FnHandler {
    async fn handle(&self, event: Event) -> Result<()> {
        (self.f)(event).await
    }
}

/// Options controlling a subscription's behavior.
#[derive(Clone, Default)]
pub struct SubscribeOptions {
    /// Only fire the handler when this predicate passes.
    pub filter: Option<FilterFn>,
    /// Remove the subscription after its first successfully completed,
    /// filter-passing invocation.
    pub once: bool,
}

impl SubscribeOptions {
    pub fn once() -> Self {
        Self {
            filter: None,
            once: true,
        }
    }

    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn with_once(mut self, once: bool) -> Self {
        self.once = once;
        self
    }
}

/// A registered interest in one or more event types.
pub struct Subscription {
    pub id: Uuid,
    pub event_types: Vec<EventType>,
    pub once: bool,
    pub(crate) handler: Arc<dyn EventHandler>,
    filter: Option<FilterFn>,
}

impl Subscription {
    /// Whether this subscription's filter (if any) accepts the event.
    pub fn accepts(&self, event: &Event) -> bool {
        self.filter.as_ref().is_none_or(|f| f(event))
    }
}

/// Observable snapshot of a live subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionInfo {
    pub id: Uuid,
    pub event_types: Vec<EventType>,
    pub once: bool,
}

/// Mapping from event type to insertion-ordered subscriptions.
#[derive(Default)]
pub struct SubscriptionRegistry {
    by_type: HashMap<EventType, Vec<Arc<Subscription>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler against the given event types. Returns the
    /// subscription id for later removal.
    pub fn insert(
        &mut self,
        event_types: Vec<EventType>,
        handler: Arc<dyn EventHandler>,
        options: SubscribeOptions,
    ) -> Uuid {
        let subscription = Arc::new(Subscription {
            id: new_v7(),
            event_types,
            once: options.once,
            handler,
            filter: options.filter,
        });

        let mut seen = Vec::new();
        for event_type in &subscription.event_types {
            if seen.contains(event_type) {
                continue;
            }
            seen.push(*event_type);
            self.by_type
                .entry(*event_type)
                .or_default()
                .push(Arc::clone(&subscription));
        }
        subscription.id
    }

    /// Remove a subscription. Idempotent: removing an unknown or
    /// already-removed id is a no-op and returns false.
    pub fn remove(&mut self, id: Uuid) -> bool {
        let mut found = false;
        for subscriptions in self.by_type.values_mut() {
            let before = subscriptions.len();
            subscriptions.retain(|s| s.id != id);
            found |= subscriptions.len() < before;
        }
        self.by_type.retain(|_, v| !v.is_empty());
        found
    }

    /// All subscriptions that match the event: type match AND filter pass,
    /// in insertion order.
    pub fn matching(&self, event: &Event) -> Vec<Arc<Subscription>> {
        self.by_type
            .get(&event.event_type())
            .map(|subscriptions| {
                subscriptions
                    .iter()
                    .filter(|s| s.accepts(event))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Snapshot of every live subscription (deduplicated across types).
    pub fn active(&self) -> Vec<SubscriptionInfo> {
        let mut seen = HashSet::new();
        let mut infos = Vec::new();
        for subscriptions in self.by_type.values() {
            for subscription in subscriptions {
                if seen.insert(subscription.id) {
                    infos.push(SubscriptionInfo {
                        id: subscription.id,
                        event_types: subscription.event_types.clone(),
                        once: subscription.once,
                    });
                }
            }
        }
        infos
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        let mut seen = HashSet::new();
        for subscriptions in self.by_type.values() {
            for subscription in subscriptions {
                seen.insert(subscription.id);
            }
        }
        seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shopfloor_core::{EventDraft, EventPayload};

    fn noop() -> Arc<dyn EventHandler> {
        Arc::new(handler_fn(|_event| async { Ok(()) }))
    }

    fn order_event(workshop_id: &str) -> Event {
        EventDraft::new(EventPayload::ServiceOrderUpdated {
            service_order_id: "SO-1".to_string(),
            status: None,
            bay: None,
        })
        .with_workshop_id(workshop_id)
        .finalize()
    }

    #[test]
    fn test_insert_and_match() {
        let mut registry = SubscriptionRegistry::new();
        let id = registry.insert(
            vec![EventType::ServiceOrderUpdated],
            noop(),
            SubscribeOptions::default(),
        );

        let event = order_event("W1");
        let matches = registry.matching(&event);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, id);
    }

    #[test]
    fn test_no_match_for_other_type() {
        let mut registry = SubscriptionRegistry::new();
        registry.insert(
            vec![EventType::InventoryLow],
            noop(),
            SubscribeOptions::default(),
        );
        assert!(registry.matching(&order_event("W1")).is_empty());
    }

    #[test]
    fn test_filter_gates_matching() {
        let mut registry = SubscriptionRegistry::new();
        registry.insert(
            vec![EventType::ServiceOrderUpdated],
            noop(),
            SubscribeOptions::default()
                .with_filter(|event| event.workshop_id.as_deref() == Some("W1")),
        );

        assert_eq!(registry.matching(&order_event("W1")).len(), 1);
        assert!(registry.matching(&order_event("W2")).is_empty());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut registry = SubscriptionRegistry::new();
        let id = registry.insert(
            vec![EventType::ServiceOrderUpdated, EventType::InventoryLow],
            noop(),
            SubscribeOptions::default(),
        );

        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert!(!registry.remove(new_v7()));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_multi_type_subscription_counted_once() {
        let mut registry = SubscriptionRegistry::new();
        registry.insert(
            vec![EventType::ServiceOrderUpdated, EventType::InventoryLow],
            noop(),
            SubscribeOptions::default(),
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.active().len(), 1);
        assert_eq!(registry.active()[0].event_types.len(), 2);
    }

    #[test]
    fn test_duplicate_types_registered_once() {
        let mut registry = SubscriptionRegistry::new();
        registry.insert(
            vec![EventType::InventoryLow, EventType::InventoryLow],
            noop(),
            SubscribeOptions::default(),
        );

        let event = EventDraft::new(EventPayload::InventoryLow {
            part_id: "P-2".to_string(),
            quantity_on_hand: 1,
            reorder_level: 4,
        })
        .finalize();
        assert_eq!(registry.matching(&event).len(), 1);
    }

    #[test]
    fn test_matching_preserves_insertion_order() {
        let mut registry = SubscriptionRegistry::new();
        let first = registry.insert(
            vec![EventType::ServiceOrderUpdated],
            noop(),
            SubscribeOptions::default(),
        );
        let second = registry.insert(
            vec![EventType::ServiceOrderUpdated],
            noop(),
            SubscribeOptions::default(),
        );

        let matches = registry.matching(&order_event("W1"));
        assert_eq!(matches[0].id, first);
        assert_eq!(matches[1].id, second);
    }

    #[tokio::test]
    async fn test_fn_handler_invokes_closure() {
        let handler = handler_fn(|event: Event| async move {
            assert_eq!(event.workshop_id.as_deref(), Some("W1"));
            Ok(())
        });
        handler.handle(order_event("W1")).await.unwrap();
    }
}
