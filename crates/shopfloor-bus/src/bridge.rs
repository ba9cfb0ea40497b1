//! Real-time transport bridge.
//!
//! The bridge sits between the dispatcher and an abstract [`Transport`]
//! (WebSocket or equivalent). Outbound: broadcast-routed events are encoded
//! to the wire format and forwarded when connected. Inbound: raw transport
//! messages are decoded into drafts and emitted onto the dispatcher with
//! fresh local identity. Connection transitions surface on the bus as
//! `connection.status_changed` events.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use shopfloor_core::{
    ConnectionStatus, Error, Event, EventDraft, EventPayload, EventSource, EventType, Priority,
    Result, Transport,
};

use crate::dispatcher::{lock, Dispatcher};

// ============================================================================
// Wire format
// ============================================================================

/// JSON envelope exchanged with the transport.
///
/// The payload's fields are flattened into `data` with the type tag hoisted
/// to the top level, so a peer can route on `type` without knowing the full
/// payload schema. Everything but `type` and `data` is optional.
#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    #[serde(rename = "type")]
    event_type: String,
    data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    occurred_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    priority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    workshop_id: Option<String>,
    /// Specific recipients; absence means broadcast to all peers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ttl_ms: Option<i64>,
}

/// Encode an event into the wire format.
pub fn encode(event: &Event) -> Result<String> {
    let mut data = serde_json::to_value(&event.payload)?;
    match &mut data {
        Value::Object(map) => {
            map.remove("type");
        }
        _ => {
            return Err(Error::Serialization(
                "payload did not serialize to an object".to_string(),
            ))
        }
    }

    let message = WireMessage {
        event_type: event.event_type().as_str().to_string(),
        data,
        id: Some(event.id),
        occurred_at: Some(event.occurred_at),
        priority: Some(event.priority.as_str().to_string()),
        source: Some(event.source.as_str().to_string()),
        entity_id: event.entity_id.clone(),
        workshop_id: event.workshop_id.clone(),
        target: event.target.clone(),
        ttl_ms: event.ttl_ms,
    };
    Ok(serde_json::to_string(&message)?)
}

/// Decode a raw transport message into an event draft.
///
/// The draft gets a fresh local id and timestamp when emitted; any id or
/// timestamp on the wire is advisory and ignored. The source is always
/// [`EventSource::RealTime`] and an unknown priority degrades to low rather
/// than failing the whole message.
pub fn decode(text: &str) -> Result<EventDraft> {
    let message: WireMessage =
        serde_json::from_str(text).map_err(|e| Error::Decode(e.to_string()))?;

    let event_type = EventType::parse(&message.event_type)
        .ok_or_else(|| Error::Decode(format!("unknown event type: {}", message.event_type)))?;

    let Value::Object(mut map) = message.data else {
        return Err(Error::Decode("data field must be an object".to_string()));
    };
    map.insert(
        "type".to_string(),
        Value::String(event_type.as_str().to_string()),
    );
    let payload: EventPayload = serde_json::from_value(Value::Object(map))
        .map_err(|e| Error::Decode(format!("{event_type}: {e}")))?;

    let mut draft = EventDraft::new(payload).with_source(EventSource::RealTime);
    if let Some(priority) = message.priority {
        draft = draft.with_priority(Priority::from_str_loose(&priority));
    }
    if let Some(entity_id) = message.entity_id {
        draft = draft.with_entity_id(entity_id);
    }
    if let Some(workshop_id) = message.workshop_id {
        draft = draft.with_workshop_id(workshop_id);
    }
    if let Some(target) = message.target {
        draft = draft.with_target(target);
    }
    if let Some(ttl_ms) = message.ttl_ms {
        draft = draft.with_ttl_ms(ttl_ms);
    }
    Ok(draft)
}

// ============================================================================
// Bridge
// ============================================================================

struct BridgeState {
    status: ConnectionStatus,
    /// Once true, a drop reports `Reconnecting` instead of `Disconnected`.
    ever_connected: bool,
}

/// Connects one dispatcher to one transport.
///
/// Construct with [`RealTimeBridge::new`], then hand to
/// [`Dispatcher::attach_bridge`], which wires the inbound callbacks.
pub struct RealTimeBridge {
    transport: Arc<dyn Transport>,
    state: Mutex<BridgeState>,
}

impl RealTimeBridge {
    pub fn new(transport: Arc<dyn Transport>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            state: Mutex::new(BridgeState {
                status: ConnectionStatus::Disconnected,
                ever_connected: false,
            }),
        })
    }

    pub async fn connect(&self, url: &str) -> Result<()> {
        self.transport.connect(url).await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.transport.disconnect().await
    }

    /// Current connection status as last reported by the transport.
    pub fn status(&self) -> ConnectionStatus {
        lock(&self.state).status
    }

    /// Forward one event to the transport. A disconnected transport makes
    /// this a silent no-op; history retains the event for catch-up.
    pub fn send(&self, event: &Event) {
        if !self.transport.is_connected() {
            debug!(
                event_id = %event.id,
                event_type = %event.event_type(),
                "Transport disconnected, skipping broadcast"
            );
            return;
        }
        match encode(event) {
            Ok(encoded) => {
                if let Err(e) = self.transport.send(encoded) {
                    warn!(
                        event_id = %event.id,
                        error = %e,
                        "Transport send failed"
                    );
                }
            }
            Err(e) => {
                warn!(
                    event_id = %event.id,
                    error = %e,
                    "Failed to encode event for broadcast"
                );
            }
        }
    }

    /// Register the transport callbacks against a dispatcher. Callbacks
    /// hold weak references only, so neither side keeps the other alive.
    pub(crate) fn bind(self: &Arc<Self>, dispatcher: &Arc<Dispatcher>) {
        let weak_dispatcher = Arc::downgrade(dispatcher);
        let weak_bridge = Arc::downgrade(self);

        {
            let weak_dispatcher = weak_dispatcher.clone();
            self.transport.on_message(Box::new(move |text| {
                let Some(dispatcher) = weak_dispatcher.upgrade() else {
                    return;
                };
                match decode(&text) {
                    Ok(draft) => {
                        if let Err(e) = dispatcher.emit(draft) {
                            warn!(error = %e, "Rejected inbound transport event");
                            dispatcher.record_decode_error();
                        }
                    }
                    Err(e) => {
                        // One bad message never takes down the pipeline
                        warn!(error = %e, "Failed to decode inbound transport message");
                        dispatcher.record_decode_error();
                    }
                }
            }));
        }

        {
            let weak_dispatcher = weak_dispatcher.clone();
            let weak_bridge = weak_bridge.clone();
            self.transport.on_connect(Box::new(move || {
                if let (Some(bridge), Some(dispatcher)) =
                    (weak_bridge.upgrade(), weak_dispatcher.upgrade())
                {
                    bridge.transition(ConnectionStatus::Connected, &dispatcher);
                }
            }));
        }

        self.transport.on_disconnect(Box::new(move || {
            if let (Some(bridge), Some(dispatcher)) =
                (weak_bridge.upgrade(), weak_dispatcher.upgrade())
            {
                let next = if lock(&bridge.state).ever_connected {
                    ConnectionStatus::Reconnecting
                } else {
                    ConnectionStatus::Disconnected
                };
                bridge.transition(next, &dispatcher);
            }
        }));
    }

    /// Apply a status change and report it on the bus. Repeated reports of
    /// the current status are ignored.
    fn transition(&self, status: ConnectionStatus, dispatcher: &Arc<Dispatcher>) {
        let changed = {
            let mut state = lock(&self.state);
            if state.status == status {
                false
            } else {
                state.status = status;
                if status == ConnectionStatus::Connected {
                    state.ever_connected = true;
                }
                true
            }
        };
        if !changed {
            return;
        }

        info!(status = %status, "Transport connection status changed");
        let draft = EventDraft::new(EventPayload::ConnectionStatusChanged { status })
            .with_priority(Priority::High);
        if let Err(e) = dispatcher.emit(draft) {
            error!(error = %e, "Failed to emit connection status event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{handler_fn, SubscribeOptions};
    use async_trait::async_trait;
    use shopfloor_core::{LifecycleCallback, MessageCallback};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Scriptable in-memory transport.
    #[derive(Default)]
    pub(crate) struct MockTransport {
        connected: AtomicBool,
        sent: Mutex<Vec<String>>,
        on_message: Mutex<Option<MessageCallback>>,
        on_connect: Mutex<Option<LifecycleCallback>>,
        on_disconnect: Mutex<Option<LifecycleCallback>>,
    }

    impl MockTransport {
        pub(crate) fn sent(&self) -> Vec<String> {
            lock(&self.sent).clone()
        }

        pub(crate) fn push_inbound(&self, text: &str) {
            if let Some(callback) = lock(&self.on_message).as_ref() {
                callback(text.to_string());
            }
        }

        pub(crate) fn simulate_connect(&self) {
            self.connected.store(true, Ordering::SeqCst);
            if let Some(callback) = lock(&self.on_connect).as_ref() {
                callback();
            }
        }

        pub(crate) fn simulate_disconnect(&self) {
            self.connected.store(false, Ordering::SeqCst);
            if let Some(callback) = lock(&self.on_disconnect).as_ref() {
                callback();
            }
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn connect(&self, _url: &str) -> Result<()> {
            self.simulate_connect();
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            self.simulate_disconnect();
            Ok(())
        }

        fn send(&self, data: String) -> Result<()> {
            lock(&self.sent).push(data);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn on_message(&self, callback: MessageCallback) {
            *lock(&self.on_message) = Some(callback);
        }

        fn on_connect(&self, callback: LifecycleCallback) {
            *lock(&self.on_connect) = Some(callback);
        }

        fn on_disconnect(&self, callback: LifecycleCallback) {
            *lock(&self.on_disconnect) = Some(callback);
        }
    }

    fn order_event() -> Event {
        EventDraft::new(EventPayload::ServiceOrderUpdated {
            service_order_id: "SO-7".to_string(),
            status: Some("in_progress".to_string()),
            bay: None,
        })
        .with_priority(Priority::High)
        .with_workshop_id("W1")
        .finalize()
    }

    #[test]
    fn test_encode_hoists_type_tag() {
        let encoded = encode(&order_event()).unwrap();
        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["type"], "service_order.updated");
        assert_eq!(value["priority"], "high");
        assert_eq!(value["workshop_id"], "W1");
        assert_eq!(value["data"]["service_order_id"], "SO-7");
        // The tag lives at the top level only
        assert!(value["data"].get("type").is_none());
    }

    #[test]
    fn test_decode_rebuilds_payload() {
        let draft = decode(
            r#"{"type":"inventory.low","priority":"critical","workshop_id":"W2",
               "data":{"part_id":"P-3","quantity_on_hand":1,"reorder_level":5}}"#,
        )
        .unwrap();

        assert_eq!(draft.source, Some(EventSource::RealTime));
        assert_eq!(draft.priority, Some(Priority::Critical));
        assert_eq!(draft.workshop_id.as_deref(), Some("W2"));
        match draft.payload {
            EventPayload::InventoryLow {
                part_id,
                quantity_on_hand,
                ..
            } => {
                assert_eq!(part_id, "P-3");
                assert_eq!(quantity_on_hand, 1);
            }
            other => panic!("Unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn test_decode_unknown_priority_degrades_to_low() {
        let draft = decode(
            r#"{"type":"system.alert","priority":"shouty","data":{"message":"hi"}}"#,
        )
        .unwrap();
        assert_eq!(draft.priority, Some(Priority::Low));
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let err = decode(r#"{"type":"note.updated","data":{}}"#).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
        assert!(err.to_string().contains("note.updated"));
    }

    #[test]
    fn test_decode_rejects_malformed_json() {
        assert!(matches!(decode("not json"), Err(Error::Decode(_))));
        assert!(matches!(
            decode(r#"{"type":"system.alert","data":"not an object"}"#),
            Err(Error::Decode(_))
        ));
        // Payload fields that don't match the type
        assert!(matches!(
            decode(r#"{"type":"inventory.low","data":{"message":"wrong shape"}}"#),
            Err(Error::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_send_skipped_while_disconnected() {
        let transport = Arc::new(MockTransport::default());
        let bridge = RealTimeBridge::new(Arc::clone(&transport) as Arc<dyn Transport>);

        bridge.send(&order_event());
        assert!(transport.sent().is_empty());

        transport.simulate_connect();
        bridge.send(&order_event());
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_inbound_message_reaches_subscribers() {
        let transport = Arc::new(MockTransport::default());
        let bridge = RealTimeBridge::new(Arc::clone(&transport) as Arc<dyn Transport>);
        let dispatcher = Dispatcher::builder().build();
        dispatcher.attach_bridge(bridge).await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        dispatcher
            .subscribe(
                vec![EventType::InventoryLow],
                Arc::new(handler_fn(move |event: Event| {
                    let seen = Arc::clone(&seen_clone);
                    async move {
                        lock(&seen).push(event);
                        Ok(())
                    }
                })),
                SubscribeOptions::default(),
            )
            .await;

        transport.push_inbound(
            r#"{"type":"inventory.low","data":{"part_id":"P-9","quantity_on_hand":0,"reorder_level":3}}"#,
        );
        tokio::time::sleep(Duration::from_millis(100)).await;

        let seen = lock(&seen).clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].source, EventSource::RealTime);
        assert_eq!(seen[0].entity_id.as_deref(), Some("P-9"));
    }

    #[tokio::test]
    async fn test_bad_inbound_message_counted_not_fatal() {
        let transport = Arc::new(MockTransport::default());
        let bridge = RealTimeBridge::new(Arc::clone(&transport) as Arc<dyn Transport>);
        let dispatcher = Dispatcher::builder().build();
        dispatcher.attach_bridge(bridge).await;

        transport.push_inbound("garbage");
        transport.push_inbound(r#"{"type":"nope","data":{}}"#);

        let metrics = dispatcher.metrics().await;
        assert_eq!(metrics.decode_errors, 2);
        assert_eq!(metrics.total_events, 0);
    }

    #[tokio::test]
    async fn test_status_transitions_emit_events() {
        let transport = Arc::new(MockTransport::default());
        let bridge = RealTimeBridge::new(Arc::clone(&transport) as Arc<dyn Transport>);
        let dispatcher = Dispatcher::builder().build();
        dispatcher.attach_bridge(Arc::clone(&bridge)).await;

        let statuses = Arc::new(Mutex::new(Vec::new()));
        let statuses_clone = Arc::clone(&statuses);
        dispatcher
            .subscribe(
                vec![EventType::ConnectionStatusChanged],
                Arc::new(handler_fn(move |event: Event| {
                    let statuses = Arc::clone(&statuses_clone);
                    async move {
                        if let EventPayload::ConnectionStatusChanged { status } = event.payload {
                            lock(&statuses).push(status);
                        }
                        Ok(())
                    }
                })),
                SubscribeOptions::default(),
            )
            .await;

        assert_eq!(bridge.status(), ConnectionStatus::Disconnected);

        transport.simulate_connect();
        assert_eq!(bridge.status(), ConnectionStatus::Connected);

        // A drop after a successful connect reads as reconnecting
        transport.simulate_disconnect();
        assert_eq!(bridge.status(), ConnectionStatus::Reconnecting);

        transport.simulate_connect();
        // Repeat reports of the same status are ignored
        transport.simulate_connect();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            *lock(&statuses),
            vec![
                ConnectionStatus::Connected,
                ConnectionStatus::Reconnecting,
                ConnectionStatus::Connected,
            ]
        );
    }

    #[tokio::test]
    async fn test_metrics_surface_connection_status() {
        let transport = Arc::new(MockTransport::default());
        let bridge = RealTimeBridge::new(Arc::clone(&transport) as Arc<dyn Transport>);
        let dispatcher = Dispatcher::builder().build();
        dispatcher.attach_bridge(bridge).await;

        transport.simulate_connect();
        let metrics = dispatcher.metrics().await;
        assert_eq!(metrics.connection_status, Some(ConnectionStatus::Connected));
    }
}
