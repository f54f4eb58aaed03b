//! # Fibonacci Backoff
//!
//! Progressive retry delays for failed reconciliations. Grows more slowly
//! than exponential backoff so a flapping Equinix Metal API is retried
//! promptly without being hammered.
//!
//! Default sequence: 5s, 5s, 10s, 15s, 25s, 40s, 65s, 105s, 170s, 275s, 300s (max).

use std::time::Duration;

/// Fibonacci backoff calculator
///
/// Each delay is the sum of the previous two, capped at `max_seconds`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min_seconds: u64,
    prev_seconds: u64,
    current_seconds: u64,
    max_seconds: u64,
}

impl FibonacciBackoff {
    /// Create a new backoff starting at `min_seconds` and capped at `max_seconds`
    #[must_use]
    pub fn new(min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            min_seconds,
            prev_seconds: 0,
            current_seconds: min_seconds,
            max_seconds,
        }
    }

    /// Get the next backoff duration and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current_seconds;

        let next = self.prev_seconds + self.current_seconds;
        self.prev_seconds = self.current_seconds;
        self.current_seconds = std::cmp::min(next, self.max_seconds);

        Duration::from_secs(result)
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.prev_seconds = 0;
        self.current_seconds = self.min_seconds;
    }
}

impl Default for FibonacciBackoff {
    fn default() -> Self {
        Self::new(5, 300)
    }
}
