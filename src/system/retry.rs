//! Exponential backoff for commands that may fail while a service starts.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::error::ConciergeError;

/// Delay before the second attempt; every later delay doubles.
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Retry policy bounded by the cumulative elapsed time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub max_elapsed: Duration,
}

impl RetryPolicy {
    pub fn new(max_elapsed: Duration) -> Self {
        Self {
            initial_backoff: INITIAL_BACKOFF,
            max_elapsed,
        }
    }

    #[must_use]
    pub fn with_initial_backoff(mut self, initial_backoff: Duration) -> Self {
        self.initial_backoff = initial_backoff;
        self
    }

    /// Runs `op` until it succeeds, a permanent error occurs, or waiting for
    /// the next attempt would exceed `max_elapsed`.
    ///
    /// The last error is returned when the deadline is reached. Errors that
    /// are not [`ConciergeError`]s are treated as retryable.
    pub fn run<T>(&self, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let start = Instant::now();
        let mut delay = self.initial_backoff;
        let mut attempt: u32 = 1;

        loop {
            let err = match op() {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let retryable = err
                .downcast_ref::<ConciergeError>()
                .is_none_or(ConciergeError::is_retryable);
            if !retryable {
                return Err(err);
            }

            if start.elapsed() + delay > self.max_elapsed {
                tracing::debug!(attempt, "giving up after {:?}: {:#}", start.elapsed(), err);
                return Err(err);
            }

            tracing::debug!(attempt, "attempt failed, retrying in {:?}: {:#}", delay, err);
            thread::sleep(delay);
            delay = delay.saturating_mul(2);
            attempt += 1;
        }
    }
}
