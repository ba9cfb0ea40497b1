//! Bounded in-memory event history.
//!
//! A fixed-capacity ring buffer holding the most recent persisted events,
//! newest first. When full, the oldest entry is evicted. Queries filter on
//! any combination of event attributes without consuming the buffer.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;

use shopfloor_core::{defaults, EntityType, Event, EventSource, EventType, Priority};

/// Query over the history buffer. All criteria are optional and combine
/// with AND semantics; an empty filter matches everything.
#[derive(Default, Clone)]
pub struct HistoryFilter {
    pub event_types: Vec<EventType>,
    pub source: Option<EventSource>,
    pub priority: Option<Priority>,
    pub entity_type: Option<EntityType>,
    pub entity_id: Option<String>,
    pub workshop_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub limit: Option<usize>,
}

impl HistoryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_type(mut self, event_type: EventType) -> Self {
        self.event_types.push(event_type);
        self
    }

    pub fn with_source(mut self, source: EventSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
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

    pub fn with_since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn with_until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether an event satisfies every set criterion.
    pub fn matches(&self, event: &Event) -> bool {
        if !self.event_types.is_empty() && !self.event_types.contains(&event.event_type()) {
            return false;
        }
        if self.source.is_some_and(|s| s != event.source) {
            return false;
        }
        if self.priority.is_some_and(|p| p != event.priority) {
            return false;
        }
        if self.entity_type.is_some_and(|t| t != event.entity_type) {
            return false;
        }
        if let Some(entity_id) = &self.entity_id {
            if event.entity_id.as_deref() != Some(entity_id.as_str()) {
                return false;
            }
        }
        if let Some(workshop_id) = &self.workshop_id {
            if event.workshop_id.as_deref() != Some(workshop_id.as_str()) {
                return false;
            }
        }
        if self.since.is_some_and(|since| event.occurred_at < since) {
            return false;
        }
        if self.until.is_some_and(|until| event.occurred_at > until) {
            return false;
        }
        self.tags
            .iter()
            .all(|tag| event.metadata.tags.contains(tag))
    }
}

/// Fixed-capacity ring buffer of recent events, newest first.
pub struct EventHistory {
    capacity: usize,
    events: VecDeque<Event>,
}

impl Default for EventHistory {
    fn default() -> Self {
        Self::new(defaults::HISTORY_CAPACITY)
    }
}

impl EventHistory {
    /// Create a history buffer. A zero capacity is clamped to 1 so pushes
    /// always retain at least the latest event.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: VecDeque::new(),
        }
    }

    /// Record an event, evicting the oldest entry when at capacity.
    pub fn push(&mut self, event: Event) {
        if self.events.len() == self.capacity {
            self.events.pop_back();
        }
        self.events.push_front(event);
    }

    /// Events matching the filter, newest first, honoring the filter's limit.
    pub fn query(&self, filter: &HistoryFilter) -> Vec<Event> {
        let limit = filter.limit.unwrap_or(usize::MAX);
        self.events
            .iter()
            .filter(|e| filter.matches(e))
            .take(limit)
            .cloned()
            .collect()
    }

    /// The most recent `limit` events, unfiltered.
    pub fn recent(&self, limit: usize) -> Vec<Event> {
        self.events.iter().take(limit).cloned().collect()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
