//! The event dispatcher: batching, delivery, retry, and dead-lettering.
//!
//! One [`Dispatcher`] owns the subscription registry, routing table, history
//! buffer, metrics collector, and pending queue. Events enter via
//! [`Dispatcher::emit`] or [`Dispatcher::process_batch`]; a single batch
//! runs at a time, ordered by priority, and failed deliveries are retried
//! with exponential backoff until the routing policy's budget is exhausted.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use shopfloor_core::{
    defaults, DeliveryState, Error, Event, EventDraft, EventPayload, EventSource, EventStore,
    EventType, Priority, Result, RoutingConfig, RoutingTable,
};

use crate::bridge::RealTimeBridge;
use crate::history::{EventHistory, HistoryFilter};
use crate::metrics::{BusMetrics, MetricsCollector};
use crate::registry::{EventHandler, SubscribeOptions, SubscriptionInfo, SubscriptionRegistry};

// ============================================================================
// Configuration
// ============================================================================

/// Tunables for one dispatcher instance.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Capacity of the in-memory history ring buffer.
    pub history_capacity: usize,
    /// Per-handler execution timeout. `None` disables enforcement.
    pub handler_timeout_secs: Option<u64>,
    /// Bounded sample window for processing-duration statistics.
    pub metrics_sample_window: usize,
    /// Interval between metrics sweeps.
    pub sweep_interval_secs: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            history_capacity: defaults::HISTORY_CAPACITY,
            handler_timeout_secs: Some(defaults::HANDLER_TIMEOUT_SECS),
            metrics_sample_window: defaults::METRICS_SAMPLE_WINDOW,
            sweep_interval_secs: defaults::METRICS_SWEEP_INTERVAL_SECS,
        }
    }
}

impl DispatcherConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    ///
    /// - `BUS_HISTORY_CAPACITY`: history ring buffer size
    /// - `BUS_HANDLER_TIMEOUT_SECS`: per-handler timeout (0 disables)
    /// - `BUS_METRICS_SAMPLE_WINDOW`: duration sample window
    /// - `BUS_SWEEP_INTERVAL_SECS`: metrics sweep interval
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(capacity) = read_env("BUS_HISTORY_CAPACITY") {
            config.history_capacity = capacity;
        }
        if let Some(secs) = read_env::<u64>("BUS_HANDLER_TIMEOUT_SECS") {
            config.handler_timeout_secs = if secs == 0 { None } else { Some(secs) };
        }
        if let Some(window) = read_env("BUS_METRICS_SAMPLE_WINDOW") {
            config.metrics_sample_window = window;
        }
        if let Some(secs) = read_env("BUS_SWEEP_INTERVAL_SECS") {
            config.sweep_interval_secs = secs;
        }
        config
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn with_handler_timeout_secs(mut self, secs: Option<u64>) -> Self {
        self.handler_timeout_secs = secs;
        self
    }

    pub fn with_metrics_sample_window(mut self, window: usize) -> Self {
        self.metrics_sample_window = window;
        self
    }

    pub fn with_sweep_interval_secs(mut self, secs: u64) -> Self {
        self.sweep_interval_secs = secs;
        self
    }
}

fn read_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

// ============================================================================
// Delivery outcomes
// ============================================================================

/// Outcome of one delivery attempt for one event.
#[derive(Debug, Clone)]
pub struct ProcessingResult {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub priority: Priority,
    pub state: DeliveryState,
    /// How many matching handlers were invoked.
    pub handlers_invoked: usize,
    /// One message per failed handler; empty on success.
    pub errors: Vec<String>,
    /// True when the event was discarded because its TTL had elapsed.
    /// Distinguishes expiry from handler-failure discards in metrics.
    pub expired: bool,
    pub duration: Duration,
}

impl ProcessingResult {
    pub fn succeeded(&self) -> bool {
        self.state == DeliveryState::Delivered
    }
}

/// An event parked after exhausting its retry budget.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub event: Event,
    pub reason: String,
    pub attempts: u32,
    pub dead_lettered_at: DateTime<Utc>,
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Central event dispatch pipeline. Construct via [`Dispatcher::builder`]
/// and hold behind an [`Arc`]; all methods take `&self`.
pub struct Dispatcher {
    config: DispatcherConfig,
    registry: RwLock<SubscriptionRegistry>,
    routing: RwLock<RoutingTable>,
    history: Mutex<EventHistory>,
    metrics: Mutex<MetricsCollector>,
    pending: Mutex<VecDeque<Event>>,
    /// Held for the duration of one batch; guarantees a single batch runs
    /// at a time. Emissions during a batch queue up in `pending`.
    batch_gate: tokio::sync::Mutex<()>,
    dead_letters: Mutex<Vec<DeadLetter>>,
    /// High-water mark for emission timestamps, enforcing monotonic
    /// `occurred_at` even when the wall clock steps backwards.
    last_occurred_at: Mutex<DateTime<Utc>>,
    store: Option<Arc<dyn EventStore>>,
    bridge: RwLock<Option<Arc<RealTimeBridge>>>,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    /// Register a handler for the given event types. Returns the
    /// subscription id for [`Dispatcher::unsubscribe`].
    pub async fn subscribe(
        &self,
        event_types: Vec<EventType>,
        handler: Arc<dyn EventHandler>,
        options: SubscribeOptions,
    ) -> Uuid {
        let id = self
            .registry
            .write()
            .await
            .insert(event_types, handler, options);
        debug!(subscription_id = %id, "Subscription registered");
        id
    }

    /// Remove a subscription. Safe to call twice; the second call is a
    /// no-op returning false.
    pub async fn unsubscribe(&self, id: Uuid) -> bool {
        let removed = self.registry.write().await.remove(id);
        debug!(subscription_id = %id, removed, "Subscription removed");
        removed
    }

    /// Snapshot of all live subscriptions.
    pub async fn active_subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.registry.read().await.active()
    }

    // ------------------------------------------------------------------
    // Routing
    // ------------------------------------------------------------------

    /// Set or replace the routing policy for an event type at runtime.
    pub async fn set_route(&self, event_type: EventType, config: RoutingConfig) {
        self.routing.write().await.set(event_type, config);
        debug!(event_type = %event_type, "Routing policy updated");
    }

    /// Remove the routing policy for an event type, reverting it to the
    /// fallback.
    pub async fn unset_route(&self, event_type: EventType) -> bool {
        self.routing.write().await.unset(event_type)
    }

    pub async fn route_for(&self, event_type: EventType) -> RoutingConfig {
        self.routing.read().await.resolve(event_type)
    }

    // ------------------------------------------------------------------
    // Emission
    // ------------------------------------------------------------------

    /// Validate and normalize a draft, queue the event, and kick off a
    /// drain. Returns the assigned event id immediately; delivery happens
    /// asynchronously.
    pub fn emit(self: &Arc<Self>, draft: EventDraft) -> Result<Uuid> {
        let event = self.admit(draft)?;
        let id = event.id;
        self.enqueue(event);
        self.schedule_drain();
        Ok(id)
    }

    /// Validate, normalize, and deliver a batch in one call, returning the
    /// per-event outcomes. Events queued by concurrent emissions while the
    /// batch runs are drained too and included in the results.
    ///
    /// If another batch is already running, the events are queued behind it
    /// and an empty result set is returned.
    pub async fn process_batch(
        self: &Arc<Self>,
        drafts: Vec<EventDraft>,
    ) -> Result<Vec<ProcessingResult>> {
        let mut events = Vec::with_capacity(drafts.len());
        for draft in drafts {
            events.push(self.admit(draft)?);
        }

        let guard = match self.batch_gate.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                let queue_size = {
                    let mut pending = lock(&self.pending);
                    pending.extend(events);
                    pending.len()
                };
                debug!(queue_size, "Batch already running, events queued");
                self.schedule_drain();
                return Ok(Vec::new());
            }
        };

        let mut results = self.run_batch(events).await;
        loop {
            let queued: Vec<Event> = lock(&self.pending).drain(..).collect();
            if queued.is_empty() {
                break;
            }
            results.extend(self.run_batch(queued).await);
        }
        drop(guard);
        // An emit may have queued between the last drain and gate release
        if !lock(&self.pending).is_empty() {
            self.schedule_drain();
        }
        Ok(results)
    }

    fn admit(&self, draft: EventDraft) -> Result<Event> {
        draft.validate()?;
        let mut event = draft.finalize();
        {
            let mut last = lock(&self.last_occurred_at);
            if event.occurred_at < *last {
                event.occurred_at = *last;
            } else {
                *last = event.occurred_at;
            }
        }
        trace!(
            event_id = %event.id,
            event_type = %event.event_type(),
            priority = %event.priority,
            "Event admitted"
        );
        Ok(event)
    }

    fn enqueue(&self, event: Event) {
        lock(&self.pending).push_back(event);
    }

    /// Number of events waiting for the next batch.
    pub fn queue_size(&self) -> usize {
        lock(&self.pending).len()
    }

    fn schedule_drain(self: &Arc<Self>) {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            dispatcher.drain().await;
        });
    }

    async fn drain(self: Arc<Self>) {
        // If the gate is held, the holder drains the queue before releasing
        let guard = match self.batch_gate.try_lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };
        loop {
            let queued: Vec<Event> = lock(&self.pending).drain(..).collect();
            if queued.is_empty() {
                break;
            }
            self.run_batch(queued).await;
        }
        drop(guard);
        if !lock(&self.pending).is_empty() {
            self.schedule_drain();
        }
    }

    // ------------------------------------------------------------------
    // Batch execution
    // ------------------------------------------------------------------

    /// Deliver one batch, highest priority first. The sort is stable, so
    /// events of equal priority keep their emission order.
    async fn run_batch(self: &Arc<Self>, mut events: Vec<Event>) -> Vec<ProcessingResult> {
        events.sort_by_key(|e| e.priority.rank());
        let total = events.len();
        let mut results = Vec::with_capacity(total);

        for (index, event) in events.into_iter().enumerate() {
            let pause = batch_pause(event.priority);
            results.push(self.process_event(event).await);
            if index + 1 < total {
                tokio::time::sleep(pause).await;
            }
        }
        results
    }

    async fn process_event(self: &Arc<Self>, event: Event) -> ProcessingResult {
        let started = Instant::now();
        let event_id = event.id;
        let event_type = event.event_type();
        let priority = event.priority;
        let retry_count = event.metadata.retry_count;

        if event.is_expired(Utc::now()) {
            warn!(
                event_id = %event_id,
                event_type = %event_type,
                ttl_ms = event.ttl_ms,
                "Event expired before delivery, discarding"
            );
            let result = ProcessingResult {
                event_id,
                event_type,
                priority,
                state: DeliveryState::Discarded,
                handlers_invoked: 0,
                errors: vec!["ttl expired".to_string()],
                expired: true,
                duration: started.elapsed(),
            };
            lock(&self.metrics).record(&result);
            return result;
        }

        let route = self.routing.read().await.resolve(event_type);

        // Persist on the first attempt only; a retry is the same event
        if route.persist && retry_count == 0 {
            lock(&self.history).push(event.clone());
            if let Some(store) = &self.store {
                if let Err(e) = store.persist(&event).await {
                    // Persistence failure never blocks delivery
                    error!(
                        event_id = %event_id,
                        event_type = %event_type,
                        error = %e,
                        "Event store persist failed"
                    );
                }
            }
        }

        // Mirror to the real-time transport on the first attempt only, and
        // never echo events that arrived from the transport back out
        if route.broadcast && retry_count == 0 && event.source != EventSource::RealTime {
            if let Some(bridge) = self.bridge.read().await.as_ref() {
                bridge.send(&event);
            }
        }

        let subscriptions = self.registry.read().await.matching(&event);
        let handler_count = subscriptions.len();
        trace!(
            event_id = %event_id,
            event_type = %event_type,
            handler_count,
            retry_count,
            "Delivering event"
        );

        // Each handler runs in its own task so a panic surfaces as a
        // JoinError and feeds the retry path instead of unwinding through
        // the batch loop
        let timeout_secs = self.config.handler_timeout_secs;
        let invocations: Vec<_> = subscriptions
            .into_iter()
            .map(|subscription| {
                let event = event.clone();
                let handler = Arc::clone(&subscription.handler);
                let task = tokio::spawn(async move {
                    match timeout_secs {
                        Some(secs) => {
                            match tokio::time::timeout(
                                Duration::from_secs(secs),
                                handler.handle(event),
                            )
                            .await
                            {
                                Ok(outcome) => outcome,
                                Err(_) => Err(Error::HandlerTimeout(secs)),
                            }
                        }
                        None => handler.handle(event).await,
                    }
                });
                (subscription, task)
            })
            .collect();

        let mut errors = Vec::new();
        let mut completed_once = Vec::new();
        for (subscription, task) in invocations {
            let outcome = task.await.unwrap_or_else(|e| {
                if e.is_panic() {
                    Err(Error::Handler("handler panicked".to_string()))
                } else {
                    Err(Error::Handler(format!("handler task failed: {e}")))
                }
            });
            match outcome {
                Ok(()) => {
                    if subscription.once {
                        completed_once.push(subscription.id);
                    }
                }
                Err(e) => {
                    warn!(
                        event_id = %event_id,
                        subscription_id = %subscription.id,
                        error = %e,
                        "Handler failed"
                    );
                    errors.push(e.to_string());
                }
            }
        }

        // One-shot subscriptions retire only after a successful invocation,
        // so a failed delivery still gets its retries
        if !completed_once.is_empty() {
            let mut registry = self.registry.write().await;
            for id in completed_once {
                registry.remove(id);
            }
        }

        let state = if errors.is_empty() {
            DeliveryState::Delivered
        } else {
            self.handle_failure(&event, route, &errors).await
        };

        let result = ProcessingResult {
            event_id,
            event_type,
            priority,
            state,
            handlers_invoked: handler_count,
            errors,
            expired: false,
            duration: started.elapsed(),
        };
        debug!(
            event_id = %event_id,
            event_type = %event_type,
            outcome = state.as_str(),
            handler_count,
            duration_ms = result.duration.as_millis() as u64,
            "Event processed"
        );
        lock(&self.metrics).record(&result);
        result
    }

    // ------------------------------------------------------------------
    // Failure handling
    // ------------------------------------------------------------------

    /// Decide what happens to a failed delivery: schedule a retry while
    /// attempts remain, otherwise dead-letter or discard per routing policy.
    async fn handle_failure(
        self: &Arc<Self>,
        event: &Event,
        route: RoutingConfig,
        errors: &[String],
    ) -> DeliveryState {
        let attempt = event.metadata.retry_count;

        if attempt < route.max_retries {
            let delay_ms = route
                .retry_delay_ms
                .saturating_mul(1u64 << attempt.min(16));
            info!(
                event_id = %event.id,
                event_type = %event.event_type(),
                retry_count = attempt + 1,
                retry_delay_ms = delay_ms,
                "Scheduling retry"
            );

            let mut retry = event.clone();
            retry.metadata.retry_count = attempt + 1;
            let weak = Arc::downgrade(self);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                if let Some(dispatcher) = weak.upgrade() {
                    dispatcher.enqueue(retry);
                    dispatcher.schedule_drain();
                }
            });
            return DeliveryState::Retrying;
        }

        // First delivery counts toward the attempt total
        let attempts = attempt + 1;
        let reason = errors.join("; ");
        let exhausted = Error::RetryExhausted {
            event_id: event.id,
            event_type: event.event_type(),
            attempts,
        };

        let state = if route.dead_letter {
            lock(&self.dead_letters).push(DeadLetter {
                event: event.clone(),
                reason: reason.clone(),
                attempts,
                dead_lettered_at: Utc::now(),
            });
            info!(
                event_id = %event.id,
                event_type = %event.event_type(),
                error = %exhausted,
                "Event dead-lettered"
            );
            DeliveryState::DeadLettered
        } else {
            warn!(
                event_id = %event.id,
                event_type = %event.event_type(),
                error = %exhausted,
                "Event discarded after retry exhaustion"
            );
            DeliveryState::Discarded
        };

        // Report the failure on the bus itself, guarding against loops: a
        // failing failure report is never re-reported
        if event.event_type() != EventType::DispatchFailed {
            let report = EventDraft::new(EventPayload::DispatchFailed {
                event_id: event.id,
                event_type: event.event_type(),
                reason,
                attempts,
            })
            .with_priority(Priority::Low);
            if let Err(e) = self.emit(report) {
                error!(error = %e, "Failed to emit dispatch failure report");
            }
        }

        state
    }

    // ------------------------------------------------------------------
    // History, dead letters, metrics
    // ------------------------------------------------------------------

    /// Query the history buffer. Newest events first.
    pub fn history(&self, filter: &HistoryFilter) -> Vec<Event> {
        lock(&self.history).query(filter)
    }

    /// The most recent `limit` persisted events.
    pub fn recent_history(&self, limit: usize) -> Vec<Event> {
        lock(&self.history).recent(limit)
    }

    pub fn clear_history(&self) {
        lock(&self.history).clear();
    }

    /// Snapshot of everything dead-lettered so far, oldest first.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        lock(&self.dead_letters).clone()
    }

    pub fn record_decode_error(&self) {
        lock(&self.metrics).record_decode_error();
    }

    /// Current bus health: delivery counters plus live queue, subscription,
    /// dead-letter, and connection state.
    pub async fn metrics(&self) -> BusMetrics {
        let mut snapshot = lock(&self.metrics).snapshot(Utc::now());
        snapshot.queue_size = self.queue_size();
        snapshot.active_subscriptions = self.registry.read().await.len();
        snapshot.dead_letter_count = lock(&self.dead_letters).len();
        snapshot.connection_status = self
            .bridge
            .read()
            .await
            .as_ref()
            .map(|bridge| bridge.status());
        snapshot
    }

    /// Spawn the periodic metrics sweep. The task holds only a weak
    /// reference and exits once the dispatcher is dropped.
    pub fn start_metrics_sweeper(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let interval_secs = self.config.sweep_interval_secs.max(1);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(dispatcher) = weak.upgrade() else {
                    break;
                };
                lock(&dispatcher.metrics).sweep(Utc::now());
            }
        });
    }

    // ------------------------------------------------------------------
    // Bridge
    // ------------------------------------------------------------------

    /// Attach the real-time bridge: outbound broadcasts flow through it and
    /// its inbound messages are emitted onto this dispatcher.
    pub async fn attach_bridge(self: &Arc<Self>, bridge: Arc<RealTimeBridge>) {
        bridge.bind(self);
        *self.bridge.write().await = Some(bridge);
        info!("Real-time bridge attached");
    }
}

/// Inter-event pause for batch pacing, scaled by priority so urgent events
/// yield less.
fn batch_pause(priority: Priority) -> Duration {
    let ms = match priority {
        Priority::Critical => defaults::BATCH_PAUSE_CRITICAL_MS,
        Priority::High => defaults::BATCH_PAUSE_HIGH_MS,
        Priority::Medium => defaults::BATCH_PAUSE_MEDIUM_MS,
        Priority::Low => defaults::BATCH_PAUSE_LOW_MS,
    };
    Duration::from_millis(ms)
}

/// Lock a std mutex, recovering the inner value if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`Dispatcher`].
#[derive(Default)]
pub struct DispatcherBuilder {
    config: Option<DispatcherConfig>,
    routing: Option<RoutingTable>,
    store: Option<Arc<dyn EventStore>>,
}

impl DispatcherBuilder {
    pub fn with_config(mut self, config: DispatcherConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_routing(mut self, routing: RoutingTable) -> Self {
        self.routing = Some(routing);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> Arc<Dispatcher> {
        let config = self.config.unwrap_or_default();
        Arc::new(Dispatcher {
            history: Mutex::new(EventHistory::new(config.history_capacity)),
            metrics: Mutex::new(MetricsCollector::new(config.metrics_sample_window)),
            config,
            registry: RwLock::new(SubscriptionRegistry::new()),
            routing: RwLock::new(self.routing.unwrap_or_default()),
            pending: Mutex::new(VecDeque::new()),
            batch_gate: tokio::sync::Mutex::new(()),
            dead_letters: Mutex::new(Vec::new()),
            last_occurred_at: Mutex::new(DateTime::<Utc>::MIN_UTC),
            store: self.store,
            bridge: RwLock::new(None),
        })
    }
}
