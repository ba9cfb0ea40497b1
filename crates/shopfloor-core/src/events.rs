//! Canonical event model for the shopfloor dispatch pipeline.
//!
//! Every event moving through the system is an [`Event`]: an immutable
//! record carrying identity, priority, tenant scope, tracking metadata, and
//! a type-tagged [`EventPayload`]. The payload union is closed — the event
//! type is derived from the payload variant, so type and payload can never
//! disagree.
//!
//! Producers build an [`EventDraft`] (payload plus optional overrides) and
//! hand it to the dispatcher, which normalizes it via [`EventDraft::finalize`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::uuid_utils;

// ============================================================================
// Priority
// ============================================================================

/// Delivery priority. Determines batch ordering, not delivery guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    /// Fixed integer rank used for batch ordering. Lower ranks sort first.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Medium => 2,
            Priority::Low => 3,
        }
    }

    /// Parse a priority from a string (case-insensitive).
    ///
    /// Unknown values map to [`Priority::Low`] (rank 3) rather than failing,
    /// so a misspelled priority on an inbound message degrades gracefully.
    pub fn from_str_loose(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "critical" => Priority::Critical,
            "high" => Priority::High,
            "medium" | "normal" => Priority::Medium,
            _ => Priority::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Source / entity classification
// ============================================================================

/// Origin classification for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    MobileApp,
    DesktopApp,
    Scheduler,
    ExternalApi,
    /// Decoded from the real-time transport by the bridge.
    RealTime,
    #[default]
    System,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::MobileApp => "mobile_app",
            EventSource::DesktopApp => "desktop_app",
            EventSource::Scheduler => "scheduler",
            EventSource::ExternalApi => "external_api",
            EventSource::RealTime => "real_time",
            EventSource::System => "system",
        }
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain entity an event concerns. Used for history filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    ServiceOrder,
    Technician,
    Customer,
    Vehicle,
    Part,
    Workshop,
    #[default]
    System,
}

impl EntityType {
    /// Infer the entity type from a namespaced event type name.
    ///
    /// Substring rules, first match wins; anything unmatched falls back to
    /// the generic [`EntityType::System`].
    pub fn infer(type_name: &str) -> Self {
        const RULES: [(&str, EntityType); 6] = [
            ("service_order", EntityType::ServiceOrder),
            ("technician", EntityType::Technician),
            ("customer", EntityType::Customer),
            ("vehicle", EntityType::Vehicle),
            ("inventory", EntityType::Part),
            ("part", EntityType::Part),
        ];
        for (needle, entity) in RULES {
            if type_name.contains(needle) {
                return entity;
            }
        }
        EntityType::System
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::ServiceOrder => "service_order",
            EntityType::Technician => "technician",
            EntityType::Customer => "customer",
            EntityType::Vehicle => "vehicle",
            EntityType::Part => "part",
            EntityType::Workshop => "workshop",
            EntityType::System => "system",
        }
    }
}

// ============================================================================
// Connection status (bridge vocabulary, carried by a dedicated event type)
// ============================================================================

/// Real-time transport connection state, observable via
/// [`EventType::ConnectionStatusChanged`] events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Reconnecting,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Event type enumeration
// ============================================================================

/// Closed enumeration of event kinds, with dot-namespaced wire names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "service_order.created")]
    ServiceOrderCreated,
    #[serde(rename = "service_order.updated")]
    ServiceOrderUpdated,
    #[serde(rename = "service_order.completed")]
    ServiceOrderCompleted,
    #[serde(rename = "technician.clocked_in")]
    TechnicianClockedIn,
    #[serde(rename = "technician.clocked_out")]
    TechnicianClockedOut,
    #[serde(rename = "technician.status_changed")]
    TechnicianStatusChanged,
    #[serde(rename = "inventory.low")]
    InventoryLow,
    #[serde(rename = "inventory.part_received")]
    PartReceived,
    #[serde(rename = "quality_check.required")]
    QualityCheckRequired,
    #[serde(rename = "system.alert")]
    SystemAlert,
    #[serde(rename = "connection.status_changed")]
    ConnectionStatusChanged,
    /// Meta event reporting a delivery that exhausted its retries.
    #[serde(rename = "dispatch.failed")]
    DispatchFailed,
}

impl EventType {
    /// All known event types, for routing-table construction and tests.
    pub const ALL: [EventType; 12] = [
        EventType::ServiceOrderCreated,
        EventType::ServiceOrderUpdated,
        EventType::ServiceOrderCompleted,
        EventType::TechnicianClockedIn,
        EventType::TechnicianClockedOut,
        EventType::TechnicianStatusChanged,
        EventType::InventoryLow,
        EventType::PartReceived,
        EventType::QualityCheckRequired,
        EventType::SystemAlert,
        EventType::ConnectionStatusChanged,
        EventType::DispatchFailed,
    ];

    /// Namespaced wire name (e.g. `"service_order.updated"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ServiceOrderCreated => "service_order.created",
            EventType::ServiceOrderUpdated => "service_order.updated",
            EventType::ServiceOrderCompleted => "service_order.completed",
            EventType::TechnicianClockedIn => "technician.clocked_in",
            EventType::TechnicianClockedOut => "technician.clocked_out",
            EventType::TechnicianStatusChanged => "technician.status_changed",
            EventType::InventoryLow => "inventory.low",
            EventType::PartReceived => "inventory.part_received",
            EventType::QualityCheckRequired => "quality_check.required",
            EventType::SystemAlert => "system.alert",
            EventType::ConnectionStatusChanged => "connection.status_changed",
            EventType::DispatchFailed => "dispatch.failed",
        }
    }

    /// Parse a namespaced wire name back into an event type.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Payload union
// ============================================================================

/// Domain payload, tagged by event type.
///
/// Serialized as JSON with a `type` tag field carrying the namespaced event
/// type name, e.g. `{"type":"inventory.low","part_id":"P-7","...":...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventPayload {
    #[serde(rename = "service_order.created")]
    ServiceOrderCreated {
        service_order_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        customer_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        vehicle_id: Option<String>,
    },
    #[serde(rename = "service_order.updated")]
    ServiceOrderUpdated {
        service_order_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bay: Option<String>,
    },
    #[serde(rename = "service_order.completed")]
    ServiceOrderCompleted {
        service_order_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_minutes: Option<i64>,
    },
    #[serde(rename = "technician.clocked_in")]
    TechnicianClockedIn {
        technician_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        service_order_id: Option<String>,
    },
    #[serde(rename = "technician.clocked_out")]
    TechnicianClockedOut {
        technician_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        minutes_worked: Option<i64>,
    },
    #[serde(rename = "technician.status_changed")]
    TechnicianStatusChanged {
        technician_id: String,
        status: String,
    },
    #[serde(rename = "inventory.low")]
    InventoryLow {
        part_id: String,
        quantity_on_hand: i64,
        reorder_level: i64,
    },
    #[serde(rename = "inventory.part_received")]
    PartReceived {
        part_id: String,
        quantity: i64,
    },
    #[serde(rename = "quality_check.required")]
    QualityCheckRequired {
        service_order_id: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        checklist: Vec<String>,
    },
    #[serde(rename = "system.alert")]
    SystemAlert {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        severity: Option<String>,
    },
    #[serde(rename = "connection.status_changed")]
    ConnectionStatusChanged { status: ConnectionStatus },
    #[serde(rename = "dispatch.failed")]
    DispatchFailed {
        event_id: Uuid,
        event_type: EventType,
        reason: String,
        attempts: u32,
    },
}

impl EventPayload {
    /// The event type this payload belongs to.
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::ServiceOrderCreated { .. } => EventType::ServiceOrderCreated,
            EventPayload::ServiceOrderUpdated { .. } => EventType::ServiceOrderUpdated,
            EventPayload::ServiceOrderCompleted { .. } => EventType::ServiceOrderCompleted,
            EventPayload::TechnicianClockedIn { .. } => EventType::TechnicianClockedIn,
            EventPayload::TechnicianClockedOut { .. } => EventType::TechnicianClockedOut,
            EventPayload::TechnicianStatusChanged { .. } => EventType::TechnicianStatusChanged,
            EventPayload::InventoryLow { .. } => EventType::InventoryLow,
            EventPayload::PartReceived { .. } => EventType::PartReceived,
            EventPayload::QualityCheckRequired { .. } => EventType::QualityCheckRequired,
            EventPayload::SystemAlert { .. } => EventType::SystemAlert,
            EventPayload::ConnectionStatusChanged { .. } => EventType::ConnectionStatusChanged,
            EventPayload::DispatchFailed { .. } => EventType::DispatchFailed,
        }
    }

    /// The primary entity ID this payload relates to, when it carries one.
    pub fn entity_id(&self) -> Option<&str> {
        match self {
            EventPayload::ServiceOrderCreated { service_order_id, .. }
            | EventPayload::ServiceOrderUpdated { service_order_id, .. }
            | EventPayload::ServiceOrderCompleted { service_order_id, .. }
            | EventPayload::QualityCheckRequired { service_order_id, .. } => {
                Some(service_order_id)
            }
            EventPayload::TechnicianClockedIn { technician_id, .. }
            | EventPayload::TechnicianClockedOut { technician_id, .. }
            | EventPayload::TechnicianStatusChanged { technician_id, .. } => Some(technician_id),
            EventPayload::InventoryLow { part_id, .. }
            | EventPayload::PartReceived { part_id, .. } => Some(part_id),
            EventPayload::SystemAlert { .. }
            | EventPayload::ConnectionStatusChanged { .. }
            | EventPayload::DispatchFailed { .. } => None,
        }
    }
}

// ============================================================================
// Metadata, delivery state, and the canonical event
// ============================================================================

/// Free-form tracking bag attached to every event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    /// Current retry attempt; 0 means first delivery.
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Stations on a single event's journey through the dispatcher.
///
/// `Created → Queued → Delivering → {Delivered | Failed}`; a failed event
/// loops back via `Retrying` while attempts remain, and terminates in
/// `DeadLettered` or `Discarded` once they are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Created,
    Queued,
    Delivering,
    Delivered,
    Failed,
    Retrying,
    DeadLettered,
    Discarded,
}

impl DeliveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryState::Created => "created",
            DeliveryState::Queued => "queued",
            DeliveryState::Delivering => "delivering",
            DeliveryState::Delivered => "delivered",
            DeliveryState::Failed => "failed",
            DeliveryState::Retrying => "retrying",
            DeliveryState::DeadLettered => "dead_lettered",
            DeliveryState::Discarded => "discarded",
        }
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryState::Delivered | DeliveryState::DeadLettered | DeliveryState::Discarded
        )
    }
}

/// The canonical unit moving through the pipeline.
///
/// `id` and `occurred_at` are set once at emission time and never mutated.
/// Retried copies keep the original id and timestamp; only
/// `metadata.retry_count` differs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier (UUIDv7, time-ordered).
    pub id: Uuid,
    /// When the event was emitted (UTC).
    pub occurred_at: DateTime<Utc>,
    pub source: EventSource,
    pub priority: Priority,
    pub entity_type: EntityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    /// Workshop/tenant scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workshop_id: Option<String>,
    /// Specific recipients; absence means broadcast.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Vec<String>>,
    #[serde(default)]
    pub requires_ack: bool,
    /// Advisory time-to-live in milliseconds, checked at dequeue time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<i64>,
    #[serde(default)]
    pub metadata: EventMetadata,
    pub payload: EventPayload,
}

impl Event {
    /// The event type, derived from the payload variant.
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    /// Whether the advisory TTL has elapsed relative to `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.ttl_ms {
            Some(ttl) => now.signed_duration_since(self.occurred_at).num_milliseconds() > ttl,
            None => false,
        }
    }
}

// ============================================================================
// Draft / normalization
// ============================================================================

/// Partial event handed to `emit`. Only the payload is required; everything
/// else defaults during [`EventDraft::finalize`].
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub payload: EventPayload,
    pub priority: Option<Priority>,
    pub source: Option<EventSource>,
    pub entity_type: Option<EntityType>,
    pub entity_id: Option<String>,
    pub workshop_id: Option<String>,
    pub target: Option<Vec<String>>,
    pub requires_ack: bool,
    pub ttl_ms: Option<i64>,
    pub metadata: EventMetadata,
}

impl EventDraft {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            payload,
            priority: None,
            source: None,
            entity_type: None,
            entity_id: None,
            workshop_id: None,
            target: None,
            requires_ack: false,
            ttl_ms: None,
            metadata: EventMetadata::default(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_source(mut self, source: EventSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_entity_type(mut self, entity_type: EntityType) -> Self {
        self.entity_type = Some(entity_type);
        self
    }

    pub fn with_entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_workshop_id(mut self, workshop_id: impl Into<String>) -> Self {
        self.workshop_id = Some(workshop_id.into());
        self
    }

    pub fn with_target(mut self, target: Vec<String>) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_requires_ack(mut self, requires_ack: bool) -> Self {
        self.requires_ack = requires_ack;
        self
    }

    pub fn with_ttl_ms(mut self, ttl_ms: i64) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.metadata.tags.push(tag.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.metadata.session_id = Some(session_id.into());
        self
    }

    /// Check the draft for values the dispatcher cannot accept.
    pub fn validate(&self) -> Result<()> {
        if let Some(ttl) = self.ttl_ms {
            if ttl <= 0 {
                return Err(Error::InvalidInput(format!(
                    "ttl_ms must be positive, got {ttl}"
                )));
            }
        }
        Ok(())
    }

    /// Normalize into a canonical [`Event`].
    ///
    /// Fills in a fresh UUIDv7 id and timestamp, defaults the priority to
    /// medium and the source to system, and infers the entity type from the
    /// event type name when not set explicitly.
    pub fn finalize(self) -> Event {
        let event_type = self.payload.event_type();
        let entity_type = self
            .entity_type
            .unwrap_or_else(|| EntityType::infer(event_type.as_str()));
        let entity_id = self
            .entity_id
            .or_else(|| self.payload.entity_id().map(String::from));

        Event {
            id: uuid_utils::new_v7(),
            occurred_at: Utc::now(),
            source: self.source.unwrap_or_default(),
            priority: self.priority.unwrap_or_default(),
            entity_type,
            entity_id,
            workshop_id: self.workshop_id,
            target: self.target,
            requires_ack: self.requires_ack,
            ttl_ms: self.ttl_ms,
            metadata: self.metadata,
            payload: self.payload,
        }
    }
}
