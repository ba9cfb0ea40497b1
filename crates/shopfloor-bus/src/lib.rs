//! # shopfloor-bus
//!
//! Event dispatch and delivery pipeline for workshop applications.
//!
//! The bus receives domain events, orders them by priority, and delivers
//! them to registered handlers with retry, backoff, and dead-lettering on
//! failure. Delivered events are retained in a bounded history buffer,
//! delivery health is exposed as metrics, and a pluggable real-time bridge
//! mirrors events to and from a transport such as a WebSocket.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use shopfloor_bus::{handler_fn, Dispatcher, SubscribeOptions};
//! use shopfloor_core::{EventDraft, EventPayload, EventType};
//!
//! # async fn run() -> shopfloor_core::Result<()> {
//! let dispatcher = Dispatcher::builder().build();
//!
//! dispatcher
//!     .subscribe(
//!         vec![EventType::InventoryLow],
//!         Arc::new(handler_fn(|event| async move {
//!             println!("reorder needed: {:?}", event.entity_id);
//!             Ok(())
//!         })),
//!         SubscribeOptions::default(),
//!     )
//!     .await;
//!
//! dispatcher.emit(EventDraft::new(EventPayload::InventoryLow {
//!     part_id: "P-1042".to_string(),
//!     quantity_on_hand: 2,
//!     reorder_level: 10,
//! }))?;
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod dispatcher;
pub mod history;
pub mod metrics;
pub mod registry;

// Re-export commonly used types at crate root
pub use bridge::{decode, encode, RealTimeBridge};
pub use dispatcher::{
    DeadLetter, Dispatcher, DispatcherBuilder, DispatcherConfig, ProcessingResult,
};
pub use history::{EventHistory, HistoryFilter};
pub use metrics::{BusMetrics, MetricsCollector};
pub use registry::{
    handler_fn, EventHandler, FilterFn, FnHandler, SubscribeOptions, SubscriptionInfo,
    SubscriptionRegistry,
};
