//! Delivery metrics.
//!
//! The collector accumulates per-delivery observations (outcome, duration,
//! type, priority) into bounded structures and renders point-in-time
//! snapshots. A periodic sweep prunes samples that have aged out of the
//! rate window so an idle bus converges to zero events per second.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;

use shopfloor_core::{defaults, ConnectionStatus, DeliveryState, EventType, Priority};

use crate::dispatcher::ProcessingResult;

/// Point-in-time snapshot of bus health. Serializable for exposure on an
/// admin or diagnostics surface.
#[derive(Debug, Clone, Serialize)]
pub struct BusMetrics {
    pub total_events: u64,
    pub success_count: u64,
    pub error_count: u64,
    /// Deliveries skipped because the event's TTL had elapsed.
    pub expired_count: u64,
    /// Inbound transport messages that failed to decode.
    pub decode_errors: u64,
    /// Percentage of completed deliveries that succeeded.
    pub success_rate: f64,
    /// Percentage of completed deliveries that failed.
    pub error_rate: f64,
    /// Throughput over the sliding rate window.
    pub events_per_second: f64,
    pub avg_processing_ms: f64,
    pub min_processing_ms: Option<u64>,
    pub max_processing_ms: Option<u64>,
    pub events_by_type: HashMap<String, u64>,
    pub events_by_priority: HashMap<String, u64>,
    pub queue_size: usize,
    pub active_subscriptions: usize,
    pub dead_letter_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_status: Option<ConnectionStatus>,
}

/// Accumulates delivery observations. Owned by the dispatcher behind a lock;
/// all methods are synchronous and cheap.
pub struct MetricsCollector {
    sample_window: usize,
    total_events: u64,
    success_count: u64,
    error_count: u64,
    expired_count: u64,
    decode_errors: u64,
    per_type: HashMap<EventType, u64>,
    per_priority: HashMap<Priority, u64>,
    durations: VecDeque<u64>,
    min_ms: Option<u64>,
    max_ms: Option<u64>,
    recent: VecDeque<DateTime<Utc>>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(defaults::METRICS_SAMPLE_WINDOW)
    }
}

impl MetricsCollector {
    pub fn new(sample_window: usize) -> Self {
        Self {
            sample_window: sample_window.max(1),
            total_events: 0,
            success_count: 0,
            error_count: 0,
            expired_count: 0,
            decode_errors: 0,
            per_type: HashMap::new(),
            per_priority: HashMap::new(),
            durations: VecDeque::new(),
            min_ms: None,
            max_ms: None,
            recent: VecDeque::new(),
        }
    }

    /// Record one completed delivery attempt.
    pub fn record(&mut self, result: &ProcessingResult) {
        self.total_events += 1;
        *self.per_type.entry(result.event_type).or_insert(0) += 1;
        *self.per_priority.entry(result.priority).or_insert(0) += 1;

        match result.state {
            DeliveryState::Delivered => self.success_count += 1,
            DeliveryState::Discarded if result.expired => self.expired_count += 1,
            _ => self.error_count += 1,
        }

        let ms = result.duration.as_millis() as u64;
        self.min_ms = Some(self.min_ms.map_or(ms, |m| m.min(ms)));
        self.max_ms = Some(self.max_ms.map_or(ms, |m| m.max(ms)));
        if self.durations.len() == self.sample_window {
            self.durations.pop_front();
        }
        self.durations.push_back(ms);

        self.recent.push_back(Utc::now());
    }

    /// Record an inbound transport message that could not be decoded.
    pub fn record_decode_error(&mut self) {
        self.decode_errors += 1;
    }

    /// Drop rate samples older than the rate window. Called periodically by
    /// the dispatcher's sweeper task.
    pub fn sweep(&mut self, now: DateTime<Utc>) {
        let cutoff = now - chrono::Duration::seconds(defaults::METRICS_RATE_WINDOW_SECS as i64);
        while self.recent.front().is_some_and(|t| *t < cutoff) {
            self.recent.pop_front();
        }
    }

    /// Render a snapshot. Queue, subscription, dead-letter, and connection
    /// fields are zeroed here; the dispatcher fills them in.
    pub fn snapshot(&self, now: DateTime<Utc>) -> BusMetrics {
        let completed = self.success_count + self.error_count;
        let pct = |n: u64| {
            if completed == 0 {
                0.0
            } else {
                (n as f64 / completed as f64) * 100.0
            }
        };

        let window_secs = defaults::METRICS_RATE_WINDOW_SECS as f64;
        let cutoff = now - chrono::Duration::seconds(defaults::METRICS_RATE_WINDOW_SECS as i64);
        let in_window = self.recent.iter().filter(|t| **t >= cutoff).count();

        let avg = if self.durations.is_empty() {
            0.0
        } else {
            self.durations.iter().sum::<u64>() as f64 / self.durations.len() as f64
        };

        BusMetrics {
            total_events: self.total_events,
            success_count: self.success_count,
            error_count: self.error_count,
            expired_count: self.expired_count,
            decode_errors: self.decode_errors,
            success_rate: pct(self.success_count),
            error_rate: pct(self.error_count),
            events_per_second: in_window as f64 / window_secs,
            avg_processing_ms: avg,
            min_processing_ms: self.min_ms,
            max_processing_ms: self.max_ms,
            events_by_type: self
                .per_type
                .iter()
                .map(|(t, n)| (t.as_str().to_string(), *n))
                .collect(),
            events_by_priority: self
                .per_priority
                .iter()
                .map(|(p, n)| (p.as_str().to_string(), *n))
                .collect(),
            queue_size: 0,
            active_subscriptions: 0,
            dead_letter_count: 0,
            connection_status: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shopfloor_core::new_v7;
    use std::time::Duration;

    fn result(state: DeliveryState, errors: Vec<String>, ms: u64) -> ProcessingResult {
        ProcessingResult {
            event_id: new_v7(),
            event_type: EventType::ServiceOrderUpdated,
            priority: Priority::Medium,
            state,
            handlers_invoked: 1,
            errors,
            expired: false,
            duration: Duration::from_millis(ms),
        }
    }

    #[test]
    fn test_record_success_and_failure() {
        let mut collector = MetricsCollector::new(100);
        collector.record(&result(DeliveryState::Delivered, vec![], 10));
        collector.record(&result(DeliveryState::Delivered, vec![], 30));
        collector.record(&result(
            DeliveryState::Failed,
            vec!["handler blew up".to_string()],
            20,
        ));

        let snapshot = collector.snapshot(Utc::now());
        assert_eq!(snapshot.total_events, 3);
        assert_eq!(snapshot.success_count, 2);
        assert_eq!(snapshot.error_count, 1);
        assert!((snapshot.success_rate - 66.666).abs() < 0.01);
        assert!((snapshot.error_rate - 33.333).abs() < 0.01);
        assert_eq!(snapshot.min_processing_ms, Some(10));
        assert_eq!(snapshot.max_processing_ms, Some(30));
        assert!((snapshot.avg_processing_ms - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_ttl_discard_counts_as_expired_not_error() {
        let mut collector = MetricsCollector::new(100);
        let mut discard = result(DeliveryState::Discarded, vec!["ttl expired".to_string()], 0);
        discard.expired = true;
        collector.record(&discard);

        let snapshot = collector.snapshot(Utc::now());
        assert_eq!(snapshot.expired_count, 1);
        assert_eq!(snapshot.error_count, 0);
        // Expired deliveries do not dilute the success rate
        assert_eq!(snapshot.success_rate, 0.0);
        assert_eq!(snapshot.error_rate, 0.0);
    }

    #[test]
    fn test_discard_mentioning_ttl_in_error_counts_as_error() {
        // Only the expired flag marks an expiry; error wording is opaque
        let mut collector = MetricsCollector::new(100);
        collector.record(&result(
            DeliveryState::Discarded,
            vec!["connection ttl exceeded".to_string()],
            5,
        ));

        let snapshot = collector.snapshot(Utc::now());
        assert_eq!(snapshot.error_count, 1);
        assert_eq!(snapshot.expired_count, 0);
        assert_eq!(snapshot.error_rate, 100.0);
    }

    #[test]
    fn test_per_type_and_priority_breakdown() {
        let mut collector = MetricsCollector::new(100);
        collector.record(&result(DeliveryState::Delivered, vec![], 1));
        let mut critical = result(DeliveryState::Delivered, vec![], 1);
        critical.event_type = EventType::SystemAlert;
        critical.priority = Priority::Critical;
        collector.record(&critical);

        let snapshot = collector.snapshot(Utc::now());
        assert_eq!(snapshot.events_by_type["service_order.updated"], 1);
        assert_eq!(snapshot.events_by_type["system.alert"], 1);
        assert_eq!(snapshot.events_by_priority["medium"], 1);
        assert_eq!(snapshot.events_by_priority["critical"], 1);
    }

    #[test]
    fn test_duration_window_bounded() {
        let mut collector = MetricsCollector::new(3);
        for ms in [10, 20, 30, 40] {
            collector.record(&result(DeliveryState::Delivered, vec![], ms));
        }
        // Only the newest 3 samples feed the average, min/max stay all-time
        let snapshot = collector.snapshot(Utc::now());
        assert!((snapshot.avg_processing_ms - 30.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.min_processing_ms, Some(10));
        assert_eq!(snapshot.max_processing_ms, Some(40));
    }

    #[test]
    fn test_sweep_prunes_rate_samples() {
        let mut collector = MetricsCollector::new(100);
        collector.record(&result(DeliveryState::Delivered, vec![], 1));

        let later = Utc::now() + chrono::Duration::seconds(defaults::METRICS_RATE_WINDOW_SECS as i64 + 5);
        collector.sweep(later);
        let snapshot = collector.snapshot(later);
        assert_eq!(snapshot.events_per_second, 0.0);
        // Counters survive the sweep
        assert_eq!(snapshot.total_events, 1);
    }

    #[test]
    fn test_decode_errors_tracked() {
        let mut collector = MetricsCollector::new(100);
        collector.record_decode_error();
        collector.record_decode_error();
        assert_eq!(collector.snapshot(Utc::now()).decode_errors, 2);
    }

    #[test]
    fn test_empty_snapshot() {
        let collector = MetricsCollector::new(100);
        let snapshot = collector.snapshot(Utc::now());
        assert_eq!(snapshot.total_events, 0);
        assert_eq!(snapshot.success_rate, 0.0);
        assert_eq!(snapshot.events_per_second, 0.0);
        assert!(snapshot.min_processing_ms.is_none());
    }
}
