//! Retry policy: backoff delays between attempts.

use std::time::Duration;

use rand::Rng;

/// Backoff for rescheduled jobs.
///
/// delay = min(base_delay * multiplier^(attempts - 1), max_delay),
/// then shortened by up to `jitter` (a fraction in [0, 1]).
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the second run.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound for a single delay.
    pub max_delay: Duration,

    /// Fraction of the delay that may be randomly cut off. 0 disables jitter.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_delay: Duration::from_secs(300),
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Delay after `attempts` runs (1-indexed; 0 is treated as 1).
    ///
    /// With base_delay=2s, multiplier=2.0:
    /// - attempt 1: 2s
    /// - attempt 2: 4s
    /// - attempt 3: 8s
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let max = self.max_delay.as_secs_f64();
        if !secs.is_finite() || secs >= max {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// `next_delay` with jitter drawn from `rng`.
    pub fn next_delay_with<R: Rng + ?Sized>(&self, attempts: u32, rng: &mut R) -> Duration {
        let delay = self.next_delay(attempts);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return delay;
        }
        let cut = rng.gen_range(0.0..=jitter);
        delay.mul_f64(1.0 - cut)
    }

    /// `next_delay` with jitter from the thread-local rng.
    pub fn jittered_delay(&self, attempts: u32) -> Duration {
        self.next_delay_with(attempts, &mut rand::thread_rng())
    }
}
