//! Centralized default constants for the shopfloor event pipeline.
//!
//! **This module is the single source of truth** for all shared default
//! values. Crates reference these constants instead of defining their own
//! magic numbers. When adding new constants, place them in the appropriate
//! section and document the rationale for the chosen value.

// =============================================================================
// HISTORY
// =============================================================================

/// Maximum events retained in the in-memory history ring buffer.
pub const HISTORY_CAPACITY: usize = 1000;

// =============================================================================
// RETRY / DELIVERY
// =============================================================================

/// Default maximum retry attempts for events whose handlers fail.
pub const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay for the first retry in milliseconds. Subsequent retries
/// double the delay (exponential backoff): 500, 1000, 2000, ...
pub const RETRY_BASE_DELAY_MS: u64 = 500;

/// Default per-handler execution timeout in seconds.
///
/// A hung handler stalls only its own join branch, but without a timeout
/// the batch it belongs to never completes. 30s is generous for UI-side
/// handlers while still bounding the worst case.
pub const HANDLER_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// BATCH PROCESSING
// =============================================================================

/// Inter-event pause during batch processing for critical events (ms).
pub const BATCH_PAUSE_CRITICAL_MS: u64 = 1;

/// Inter-event pause during batch processing for high-priority events (ms).
pub const BATCH_PAUSE_HIGH_MS: u64 = 5;

/// Inter-event pause during batch processing for medium-priority events (ms).
pub const BATCH_PAUSE_MEDIUM_MS: u64 = 10;

/// Inter-event pause during batch processing for low-priority events (ms).
pub const BATCH_PAUSE_LOW_MS: u64 = 25;

// =============================================================================
// METRICS
// =============================================================================

/// Number of processing-duration samples retained for min/max/avg stats.
pub const METRICS_SAMPLE_WINDOW: usize = 1000;

/// Interval between metrics sweeps in seconds. Each sweep recomputes
/// aggregate rates and prunes samples outside the bounded window.
pub const METRICS_SWEEP_INTERVAL_SECS: u64 = 60;

/// Sliding window for the events-per-second rate in seconds.
pub const METRICS_RATE_WINDOW_SECS: u64 = 60;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_pauses_ordered_by_priority() {
        const {
            assert!(BATCH_PAUSE_CRITICAL_MS < BATCH_PAUSE_HIGH_MS);
            assert!(BATCH_PAUSE_HIGH_MS < BATCH_PAUSE_MEDIUM_MS);
            assert!(BATCH_PAUSE_MEDIUM_MS < BATCH_PAUSE_LOW_MS);
        }
    }

    #[test]
    fn rate_window_matches_sweep_interval() {
        const {
            assert!(METRICS_RATE_WINDOW_SECS == METRICS_SWEEP_INTERVAL_SECS);
        }
    }
}
