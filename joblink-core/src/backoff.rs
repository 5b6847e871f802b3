//! Bounded exponential backoff between retries
//!
//! A [`Backoff`] is a value type: the wait-duration transition is pure and
//! testable without real time, and the sleep is the only side effect. Each
//! retry sequence constructs a fresh instance — two loops must never share
//! an attempt counter.

use std::time::Duration;

use thiserror::Error;

/// The retry budget is spent; the caller should give up.
#[derive(Debug, Error)]
#[error("retry budget exhausted after {attempts} waits")]
pub struct Exhausted {
    pub attempts: u32,
}

/// Exponential backoff state: `limit` waits, each `growth` times longer
/// than the previous, starting from the configured initial duration.
#[derive(Debug, Clone)]
pub struct Backoff {
    attempt: u32,
    limit: u32,
    wait: Duration,
    growth: u32,
}

impl Backoff {
    /// Create a policy allowing `limit` waits.
    ///
    /// `initial` is clamped to at least one second and `growth` to at
    /// least 1: a zero wait would busy-spin the retry loop and a growth
    /// below one would shrink it.
    #[must_use]
    pub fn new(limit: u32, initial: Duration, growth: u32) -> Self {
        Self {
            attempt: 0,
            limit,
            wait: initial.max(Duration::from_secs(1)),
            growth: growth.max(1),
        }
    }

    /// Pure transition: the duration to wait now and the successor state,
    /// or `None` once the budget is spent.
    #[must_use]
    pub fn next(&self) -> Option<(Duration, Self)> {
        if self.attempt >= self.limit {
            return None;
        }
        let successor = Self {
            attempt: self.attempt + 1,
            limit: self.limit,
            wait: self.wait.saturating_mul(self.growth),
            growth: self.growth,
        };
        Some((self.wait, successor))
    }

    /// Number of waits performed so far
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Sleep for the next computed duration, or fail immediately (no
    /// sleep) once `limit` waits have been performed.
    pub async fn wait(&mut self) -> Result<(), Exhausted> {
        match self.next() {
            Some((delay, successor)) => {
                tokio::time::sleep(delay).await;
                *self = successor;
                Ok(())
            }
            None => Err(Exhausted {
                attempts: self.attempt,
            }),
        }
    }
}
