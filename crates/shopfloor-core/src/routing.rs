//! Per-event-type routing policy.
//!
//! The dispatcher consults the [`RoutingTable`] before every delivery to
//! decide whether an event is persisted, mirrored to the real-time bridge,
//! how many retry attempts it gets, and whether exhausted events are
//! dead-lettered. Configured at startup, updatable at runtime.

use std::collections::HashMap;

use crate::defaults;
use crate::events::EventType;

/// Delivery policy for one event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingConfig {
    /// Append to history (and the external store, if configured).
    pub persist: bool,
    /// Mirror to the real-time bridge on first delivery.
    pub broadcast: bool,
    /// Maximum retry attempts after a failed delivery.
    pub max_retries: u32,
    /// Base delay before the first retry; doubles per attempt.
    pub retry_delay_ms: u64,
    /// Move retry-exhausted events to the dead-letter sink instead of
    /// discarding them.
    pub dead_letter: bool,
}

impl RoutingConfig {
    /// Safe fallback applied when no configuration exists for an event type:
    /// no persistence, no broadcast, a single retry, no dead letter.
    pub fn fallback() -> Self {
        Self {
            persist: false,
            broadcast: false,
            max_retries: 1,
            retry_delay_ms: defaults::RETRY_BASE_DELAY_MS,
            dead_letter: false,
        }
    }

    /// Standard policy for domain events: persisted, broadcast, full retry
    /// budget with dead-lettering.
    pub fn durable() -> Self {
        Self {
            persist: true,
            broadcast: true,
            max_retries: defaults::MAX_RETRY_ATTEMPTS,
            retry_delay_ms: defaults::RETRY_BASE_DELAY_MS,
            dead_letter: true,
        }
    }

    /// Policy for transient signals: broadcast but never persisted or
    /// retried.
    pub fn transient() -> Self {
        Self {
            persist: false,
            broadcast: true,
            max_retries: 0,
            retry_delay_ms: defaults::RETRY_BASE_DELAY_MS,
            dead_letter: false,
        }
    }

    pub fn with_persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    pub fn with_broadcast(mut self, broadcast: bool) -> Self {
        self.broadcast = broadcast;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay_ms(mut self, retry_delay_ms: u64) -> Self {
        self.retry_delay_ms = retry_delay_ms;
        self
    }

    pub fn with_dead_letter(mut self, dead_letter: bool) -> Self {
        self.dead_letter = dead_letter;
        self
    }
}

/// Mapping from event type to delivery policy, with a fallback for
/// unconfigured types.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    routes: HashMap<EventType, RoutingConfig>,
}

impl Default for RoutingTable {
    /// Workshop-domain defaults: business events are durable, connection
    /// and meta events are fire-and-forget.
    fn default() -> Self {
        let mut table = Self::empty();
        for event_type in [
            EventType::ServiceOrderCreated,
            EventType::ServiceOrderUpdated,
            EventType::ServiceOrderCompleted,
            EventType::TechnicianClockedIn,
            EventType::TechnicianClockedOut,
            EventType::TechnicianStatusChanged,
            EventType::InventoryLow,
            EventType::PartReceived,
            EventType::QualityCheckRequired,
        ] {
            table.set(event_type, RoutingConfig::durable());
        }
        table.set(
            EventType::SystemAlert,
            RoutingConfig::durable().with_dead_letter(false),
        );
        // Connection status is a local signal, never echoed to the transport
        table.set(
            EventType::ConnectionStatusChanged,
            RoutingConfig::transient().with_broadcast(false),
        );
        // Meta failure reports must never loop back into retries.
        table.set(
            EventType::DispatchFailed,
            RoutingConfig::transient().with_broadcast(false),
        );
        table
    }
}

impl RoutingTable {
    /// A table with no routes; every lookup falls back.
    pub fn empty() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    /// Set or replace the policy for an event type.
    pub fn set(&mut self, event_type: EventType, config: RoutingConfig) {
        self.routes.insert(event_type, config);
    }

    /// Remove the policy for an event type, reverting it to the fallback.
    pub fn unset(&mut self, event_type: EventType) -> bool {
        self.routes.remove(&event_type).is_some()
    }

    /// Resolve the policy for an event type.
    ///
    /// Missing configuration is not an error: the dispatcher gets
    /// [`RoutingConfig::fallback`] and the miss is logged at debug level.
    pub fn resolve(&self, event_type: EventType) -> RoutingConfig {
        match self.routes.get(&event_type) {
            Some(config) => *config,
            None => {
                tracing::debug!(
                    event_type = %event_type,
                    "No routing config for event type, using fallback"
                );
                RoutingConfig::fallback()
            }
        }
    }

    /// Whether an explicit policy exists for the event type.
    pub fn contains(&self, event_type: EventType) -> bool {
        self.routes.contains_key(&event_type)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_policy() {
        let config = RoutingConfig::fallback();
        assert!(!config.persist);
        assert!(!config.broadcast);
        assert_eq!(config.max_retries, 1);
        assert!(!config.dead_letter);
    }

    #[test]
    fn test_durable_policy() {
        let config = RoutingConfig::durable();
        assert!(config.persist);
        assert!(config.broadcast);
        assert_eq!(config.max_retries, defaults::MAX_RETRY_ATTEMPTS);
        assert!(config.dead_letter);
    }

    #[test]
    fn test_builder_chaining() {
        let config = RoutingConfig::fallback()
            .with_persist(true)
            .with_max_retries(5)
            .with_retry_delay_ms(100)
            .with_dead_letter(true);
        assert!(config.persist);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_delay_ms, 100);
        assert!(config.dead_letter);
        assert!(!config.broadcast);
    }

    #[test]
    fn test_empty_table_falls_back() {
        let table = RoutingTable::empty();
        assert!(table.is_empty());
        assert_eq!(
            table.resolve(EventType::ServiceOrderUpdated),
            RoutingConfig::fallback()
        );
    }

    #[test]
    fn test_set_and_resolve() {
        let mut table = RoutingTable::empty();
        let config = RoutingConfig::durable().with_max_retries(7);
        table.set(EventType::InventoryLow, config);

        assert!(table.contains(EventType::InventoryLow));
        assert_eq!(table.resolve(EventType::InventoryLow), config);
        // Other types still fall back
        assert_eq!(
            table.resolve(EventType::SystemAlert),
            RoutingConfig::fallback()
        );
    }

    #[test]
    fn test_unset_reverts_to_fallback() {
        let mut table = RoutingTable::default();
        assert!(table.unset(EventType::InventoryLow));
        assert!(!table.unset(EventType::InventoryLow));
        assert_eq!(
            table.resolve(EventType::InventoryLow),
            RoutingConfig::fallback()
        );
    }

    #[test]
    fn test_default_table_policies() {
        let table = RoutingTable::default();
        assert!(table.resolve(EventType::ServiceOrderUpdated).persist);
        assert!(table.resolve(EventType::ServiceOrderUpdated).dead_letter);
        assert!(!table.resolve(EventType::ConnectionStatusChanged).persist);
        assert_eq!(table.resolve(EventType::ConnectionStatusChanged).max_retries, 0);
        // dispatch.failed must never be re-broadcast or retried
        let meta = table.resolve(EventType::DispatchFailed);
        assert!(!meta.broadcast);
        assert_eq!(meta.max_retries, 0);
        assert!(!meta.dead_letter);
    }

    #[test]
    fn test_runtime_update_replaces_policy() {
        let mut table = RoutingTable::default();
        table.set(
            EventType::SystemAlert,
            RoutingConfig::transient().with_broadcast(false),
        );
        let updated = table.resolve(EventType::SystemAlert);
        assert!(!updated.persist);
        assert!(!updated.broadcast);
    }
}
