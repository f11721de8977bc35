//! Reconnect backoff with jitter.
//!
//! The delay for attempt `n` (1-indexed) is `min(max, min * 2^(n-1))`, scaled
//! by a uniform jitter factor in `[0.75, 1.25]` and clamped back into
//! `[min, max]`.

use std::ops::RangeInclusive;
use std::time::Duration;

use rand::Rng;

/// Range of the multiplicative jitter factor.
pub const JITTER: RangeInclusive<f64> = 0.75..=1.25;

/// Exponential backoff state for one client.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    /// Creates a backoff starting at attempt 0.
    ///
    /// `max` is raised to `min` if it is smaller.
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
            attempt: 0,
        }
    }

    /// Number of reconnects scheduled since the last successful connection.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Lower bound of every delay.
    #[must_use]
    pub const fn min(&self) -> Duration {
        self.min
    }

    /// Upper bound of every delay.
    #[must_use]
    pub const fn max(&self) -> Duration {
        self.max
    }

    /// Resets the attempt counter after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Advances the attempt counter and returns the jittered delay.
    pub fn next_delay(&mut self) -> Duration {
        self.next_delay_with(&mut rand::thread_rng())
    }

    /// Like [`next_delay`](Self::next_delay) with a caller-supplied RNG.
    pub fn next_delay_with<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let factor = rng.gen_range(JITTER);
        self.jittered(self.base_delay(), factor)
    }

    /// Un-jittered delay for the current attempt.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        let exponent = self.attempt.saturating_sub(1).min(31);
        self.min
            .saturating_mul(1u32 << exponent)
            .min(self.max)
    }

    fn jittered(&self, base: Duration, factor: f64) -> Duration {
        base.mul_f64(factor).clamp(self.min, self.max)
    }
}
