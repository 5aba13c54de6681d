//! Exponential backoff for periodic sync attempts.

use std::time::{Duration, Instant};

const MAX_DELAY: Duration = Duration::from_secs(300);

/// Doubles the wait after every failed pass, capped at five minutes.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: u32,
    last_failure: Option<Instant>,
}

impl Backoff {
    pub fn new(base: Duration) -> Self {
        Self {
            base,
            max: MAX_DELAY.max(base),
            failures: 0,
            last_failure: None,
        }
    }

    pub const fn failures(&self) -> u32 {
        self.failures
    }

    /// Current wait after the last failure; zero when healthy.
    pub fn delay(&self) -> Duration {
        if self.failures == 0 {
            return Duration::ZERO;
        }
        let factor = 2_u32.saturating_pow(self.failures - 1);
        self.base.saturating_mul(factor).min(self.max)
    }

    pub fn should_retry(&self, now: Instant) -> bool {
        self.last_failure
            .is_none_or(|failed_at| now.saturating_duration_since(failed_at) >= self.delay())
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.failures = self.failures.saturating_add(1);
        self.last_failure = Some(now);
    }

    pub fn reset(&mut self) {
        self.failures = 0;
        self.last_failure = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_and_caps() {
        let mut backoff = Backoff::new(Duration::from_secs(30));
        let now = Instant::now();
        assert_eq!(backoff.delay(), Duration::ZERO);

        backoff.record_failure(now);
        assert_eq!(backoff.delay(), Duration::from_secs(30));
        backoff.record_failure(now);
        assert_eq!(backoff.delay(), Duration::from_secs(60));
        for _ in 0..10 {
            backoff.record_failure(now);
        }
        assert_eq!(backoff.delay(), Duration::from_secs(300));
    }

    #[test]
    fn should_retry_waits_for_delay() {
        let mut backoff = Backoff::new(Duration::from_secs(10));
        let start = Instant::now();
        assert!(backoff.should_retry(start));

        backoff.record_failure(start);
        assert!(!backoff.should_retry(start + Duration::from_secs(5)));
        assert!(backoff.should_retry(start + Duration::from_secs(10)));

        backoff.reset();
        assert_eq!(backoff.failures(), 0);
        assert!(backoff.should_retry(start));
    }
}
