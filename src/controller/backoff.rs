//! # Backoff
//!
//! Fibonacci delay sequence for failed reconciliation passes. The error
//! policy tracks one instance per resource, so a persistently failing
//! AzureApp backs off on its own schedule without slowing down the others.

/// Fibonacci backoff in minutes, capped at a maximum
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    previous_minutes: u64,
    current_minutes: u64,
    max_minutes: u64,
}

impl FibonacciBackoff {
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        Self {
            previous_minutes: 0,
            current_minutes: min_minutes,
            max_minutes,
        }
    }

    /// Advance the sequence and return the next delay in seconds
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let delay_minutes = self.current_minutes.min(self.max_minutes);
        let next = (self.previous_minutes + self.current_minutes).min(self.max_minutes);
        self.previous_minutes = self.current_minutes;
        self.current_minutes = next;
        delay_minutes * 60
    }
}

/// Per-resource error bookkeeping consumed by the error policy
#[derive(Debug)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min_minutes, max_minutes),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }
}
