//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

/// Retry schedule for a bounded operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_ms: u64,
    pub max_ms: u64,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        calculate_backoff(retry, self.base_ms, self.max_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_ms: 200,
            max_ms: 800,
        }
    }
}

/// Calculate exponential backoff delay with jitter.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    let capped_delay = delay_ms.min(max_ms);

    // Apply jitter (0 to 10% of the delay)
    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_retry_schedule() {
        let policy = RetryPolicy::default();
        let delays: Vec<u128> = (1..=3).map(|r| policy.delay(r).as_millis()).collect();

        assert!((200..220).contains(&delays[0]));
        assert!((400..440).contains(&delays[1]));
        assert!((800..880).contains(&delays[2]));
    }

    #[test]
    fn test_backoff_is_capped() {
        let capped = calculate_backoff(10, 200, 800);
        assert!(capped.as_millis() >= 800 && capped.as_millis() < 880);
        assert_eq!(calculate_backoff(0, 200, 800), Duration::ZERO);
    }
}
