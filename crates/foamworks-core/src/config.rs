//! Engine configuration
//!
//! Tunables for the retry executor, the offline queue replay cap, and the
//! optimistic-update suppression window. Defaults match production behavior;
//! tests run against the defaults under tokio's paused clock.

use std::time::Duration;

/// Bounded-retry policy for a single remote call.
///
/// Attempt `i` (zero-indexed) is followed by a delay of
/// `initial_delay * 2^i` before the next attempt: 1s, 2s, 4s with the
/// defaults. No jitter; this system's concurrency is low enough that
/// synchronized retries are not a concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (not retries-after-first)
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each attempt after
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt `attempt` (zero-indexed).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.initial_delay * 2u32.saturating_pow(attempt)
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Retry policy applied to every remote call
    pub retry: RetryPolicy,
    /// Replay attempts before a queued operation is discarded
    pub max_replay_attempts: u32,
    /// Grace delay after a background sync settles before an entity's
    /// realtime events are accepted again
    pub suppression_grace: Duration,
    /// Capacity of the engine event broadcast channel
    pub event_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            max_replay_attempts: 3,
            suppression_grace: Duration::from_secs(2),
            event_channel_capacity: 256,
        }
    }
}
