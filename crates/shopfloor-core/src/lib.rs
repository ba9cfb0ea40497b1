//! # shopfloor-core
//!
//! Core types, traits, and abstractions for the shopfloor event pipeline.
//!
//! This crate provides the canonical event model, per-type routing policy,
//! error taxonomy, and the collaborator traits (persistence, transport)
//! that the dispatch crate depends on.

pub mod defaults;
pub mod error;
pub mod events;
pub mod logging;
pub mod routing;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use events::{
    ConnectionStatus, DeliveryState, EntityType, Event, EventDraft, EventMetadata, EventPayload,
    EventSource, EventType, Priority,
};
pub use routing::{RoutingConfig, RoutingTable};
pub use traits::{EventStore, LifecycleCallback, MemoryEventStore, MessageCallback, Transport};
pub use uuid_utils::{extract_timestamp, is_v7, new_v7};
