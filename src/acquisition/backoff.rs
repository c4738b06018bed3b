//! Reconnect delay schedule

use std::time::Duration;

use rand::Rng;

/// Exponential reconnect delay with jitter.
///
/// The delay doubles per consecutive failure from `min` up to `max`, and
/// resets once a connection has stayed subscribed long enough.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    /// Fractional jitter, 0.2 means ±20 %
    jitter: f64,
    attempt: u32,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
            jitter: 0.2,
            attempt: 0,
        }
    }

    /// Disable jitter, mainly for deterministic tests.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }

    /// Number of delays handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay before the next attempt, without jitter.
    pub fn base_delay(&self) -> Duration {
        let factor = 2u32.saturating_pow(self.attempt.min(31));
        self.min.saturating_mul(factor).min(self.max)
    }

    /// Delay before the next attempt; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.base_delay();
        self.attempt = self.attempt.saturating_add(1);
        if self.jitter <= 0.0 {
            return base;
        }
        let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        base.mul_f64(1.0 + spread).min(self.max)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_and_caps() {
        let mut b = Backoff::new(Duration::from_secs(1), Duration::from_secs(60)).without_jitter();
        let delays: Vec<u64> = (0..8).map(|_| b.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn test_reset_returns_to_minimum() {
        let mut b = Backoff::new(Duration::from_secs(1), Duration::from_secs(60)).without_jitter();
        b.next_delay();
        b.next_delay();
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let mut b = Backoff::new(Duration::from_secs(10), Duration::from_secs(60));
        for _ in 0..50 {
            b.reset();
            let d = b.next_delay();
            assert!(d >= Duration::from_millis(7_900) && d <= Duration::from_millis(12_100), "{d:?}");
        }
    }

    #[test]
    fn test_large_attempt_counts_do_not_overflow() {
        let mut b = Backoff::new(Duration::from_secs(1), Duration::from_secs(60)).without_jitter();
        for _ in 0..100 {
            b.next_delay();
        }
        assert_eq!(b.next_delay(), Duration::from_secs(60));
    }
}
