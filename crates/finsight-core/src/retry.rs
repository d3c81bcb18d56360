//! Exponential backoff for transient fetch failures.

use std::time::Duration;

/// Bounded exponential backoff: `min(base * 2^retry, cap)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base: Duration::from_secs(1),
            cap: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base: Duration, cap: Duration) -> Self {
        Self {
            max_retries,
            base,
            cap,
        }
    }

    /// Delay before retry number `retry` (zero-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map(|d| d.min(self.cap))
            .unwrap_or(self.cap)
    }

    /// Delay before the next retry, or `None` once `retries_used` has
    /// reached the limit.
    pub fn next_delay(&self, retries_used: u32) -> Option<Duration> {
        (retries_used < self.max_retries).then(|| self.delay_for(retries_used))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_delays_double() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_for(0), Duration::from_secs(1));
        assert_eq!(p.delay_for(1), Duration::from_secs(2));
        assert_eq!(p.delay_for(2), Duration::from_secs(4));
    }

    #[test]
    fn delays_are_capped() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_for(6), Duration::from_secs(60));
        assert_eq!(p.delay_for(40), Duration::from_secs(60));
    }

    #[test]
    fn delays_never_decrease() {
        let p = RetryPolicy::new(10, Duration::from_millis(300), Duration::from_secs(20));
        let delays: Vec<_> = (0..10).map(|r| p.delay_for(r)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn retries_are_bounded() {
        let p = RetryPolicy::default();
        assert!(p.next_delay(0).is_some());
        assert!(p.next_delay(2).is_some());
        assert_eq!(p.next_delay(3), None);
    }

    #[test]
    fn zero_retries_never_retry() {
        let p = RetryPolicy::new(0, Duration::from_secs(1), Duration::from_secs(60));
        assert_eq!(p.next_delay(0), None);
    }
}
