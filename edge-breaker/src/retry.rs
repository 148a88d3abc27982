//! Exponential backoff with jitter (spec.md §4.3). The delay for attempt
//! `n` (0-indexed) is `min(base * multiplier^n, max)`, optionally jittered
//! by up to ±10% so that several devices retrying in lockstep don't all
//! wake up on the same tick.

use std::time::Duration;

use rand::Rng;

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub base: Duration,
    pub multiplier: f64,
    pub max: Duration,
    pub max_retries: u32,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            multiplier: 2.0,
            max: Duration::from_secs(1),
            max_retries: 3,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait before retry attempt `attempt` (0 = first retry,
    /// after the initial try already failed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.base.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = scaled.min(self.max.as_secs_f64());
        let jittered = if self.jitter {
            let factor = rand::thread_rng().gen_range(0.9..=1.1);
            capped * factor
        } else {
            capped
        };
        Duration::from_secs_f64(jittered.max(0.0))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn delay_grows_geometrically_and_caps_at_max() {
        let policy = RetryPolicy {
            jitter: false,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        // 100ms * 2^5 = 3200ms, capped to the 1s max.
        assert_eq!(policy.delay_for(5), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        let policy = RetryPolicy::default();
        for _ in 0..50 {
            let delay = policy.delay_for(1).as_secs_f64();
            assert!(delay >= 0.18 && delay <= 0.22, "delay {delay} out of jitter band");
        }
    }
}
