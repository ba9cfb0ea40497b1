//! Structured logging schema and field name constants for the event pipeline.
//!
//! All crates use these names for consistent structured logging fields so
//! log aggregation tools can query by standardized field names across every
//! subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied (retry, discard) |
//! | INFO  | Lifecycle events (bridge connect, dead-letter), completions |
//! | DEBUG | Decision points, routing fallbacks, subscription changes |
//! | TRACE | Per-handler invocation, high-volume data |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Event UUID being dispatched. Format: UUIDv7 (time-ordered).
pub const EVENT_ID: &str = "event_id";

/// Namespaced event type (e.g. "service_order.updated").
pub const EVENT_TYPE: &str = "event_type";

/// Subscription UUID.
pub const SUBSCRIPTION_ID: &str = "subscription_id";

/// Workshop/tenant scope identifier.
pub const WORKSHOP_ID: &str = "workshop_id";

/// Domain entity the event concerns.
pub const ENTITY_ID: &str = "entity_id";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of handlers invoked for an event.
pub const HANDLER_COUNT: &str = "handler_count";

/// Current retry attempt for an event (0 = first delivery).
pub const RETRY_COUNT: &str = "retry_count";

/// Backoff delay before the next retry, in milliseconds.
pub const RETRY_DELAY_MS: &str = "retry_delay_ms";

/// Number of events waiting in the pending queue.
pub const QUEUE_SIZE: &str = "queue_size";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

/// Terminal delivery state ("delivered", "dead_lettered", "discarded").
pub const OUTCOME: &str = "outcome";
