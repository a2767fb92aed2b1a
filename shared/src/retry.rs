//! Exponential backoff with random jitter

use rand::Rng;
use std::time::Duration;

/// Backoff parameters for one call site.
///
/// `delay(n) = base * 2^n + uniform(0, jitter_max)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub jitter_max: Duration,
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub const fn new(base: Duration, jitter_max: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            jitter_max,
            max_attempts,
        }
    }

    /// Spacing between socket open attempts
    pub const fn socket_open() -> Self {
        Self::new(
            Duration::from_millis(500),
            Duration::from_millis(500),
            crate::limits::SOCKET_OPEN_ATTEMPTS,
        )
    }

    /// Spacing between network registration polls
    pub const fn registration() -> Self {
        Self::new(
            Duration::from_millis(1000),
            Duration::from_millis(1000),
            crate::limits::REGISTRATION_ATTEMPTS,
        )
    }

    /// Spacing between publish session connects
    pub const fn publish() -> Self {
        Self::new(
            Duration::from_millis(1000),
            Duration::from_millis(500),
            crate::limits::PUBLISH_CONNECT_ATTEMPTS,
        )
    }

    /// Same policy with a different attempt cap
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay before retry `attempt` using the thread-local RNG
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, &mut rand::rng())
    }

    /// Delay before retry `attempt` using the given jitter source.
    ///
    /// Saturates instead of overflowing for large attempt indices.
    pub fn delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        self.backoff(attempt).saturating_add(self.jitter(rng))
    }

    /// Deterministic part of the delay
    pub fn backoff(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base.checked_mul(factor))
            .unwrap_or(Duration::MAX)
    }

    fn jitter<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let max_ms = self.jitter_max.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rng.random_range(0..max_ms))
    }
}
