//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

/// Delay schedule between retries: `base * 2^(attempt-1)`, capped at `max`,
/// plus up to a tenth of jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    /// A `max` below `base` is raised to `base`.
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    pub fn from_millis(base_ms: u64, max_ms: u64) -> Self {
        Self::new(Duration::from_millis(base_ms), Duration::from_millis(max_ms))
    }

    /// Delay before retry number `attempt` (1-based). Attempt 0 waits for nothing.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let factor = 2u32.checked_pow(attempt - 1).unwrap_or(u32::MAX);
        let capped = self.base.saturating_mul(factor).min(self.max);

        let spread = capped.as_millis() as u64 / 10;
        let jitter = if spread > 0 {
            rand::thread_rng().gen_range(0..spread)
        } else {
            0
        };
        capped + Duration::from_millis(jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_until_capped() {
        let backoff = Backoff::from_millis(100, 1000);
        let first = backoff.delay(1).as_millis();
        assert!((100..110).contains(&first));

        let second = backoff.delay(2).as_millis();
        assert!((200..220).contains(&second));

        let capped = backoff.delay(10).as_millis();
        assert!((1000..1100).contains(&capped));
    }

    #[test]
    fn test_edge_attempts() {
        let backoff = Backoff::from_millis(100, 500);
        assert_eq!(backoff.delay(0), Duration::ZERO);
        // The doubling factor saturates long before the cap is lost.
        assert!(backoff.delay(64).as_millis() >= 500);
    }

    #[test]
    fn test_max_never_below_base() {
        let backoff = Backoff::from_millis(300, 100);
        assert!(backoff.delay(1).as_millis() >= 300);
    }
}
