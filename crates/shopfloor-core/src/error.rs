//! Error types for the shopfloor event pipeline.

use thiserror::Error;

use crate::events::EventType;

/// Result type alias using the shopfloor Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for event pipeline operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A subscribed handler returned an error or panicked.
    #[error("Handler error: {0}")]
    Handler(String),

    /// A handler exceeded the configured execution timeout.
    #[error("Handler timed out after {0}s")]
    HandlerTimeout(u64),

    /// An inbound transport message could not be decoded into an event.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The real-time transport rejected an operation.
    #[error("Transport error: {0}")]
    Transport(String),

    /// All configured retry attempts for an event were exhausted.
    #[error("Retry exhausted for {event_type} event {event_id} after {attempts} attempts")]
    RetryExhausted {
        event_id: uuid::Uuid,
        event_type: EventType,
        attempts: u32,
    },

    /// The external event store failed to persist an event.
    #[error("Store error: {0}")]
    Store(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
