//! Randomized exponential backoff for reconnect scheduling.

use std::time::Duration;

use rand::Rng;

use crate::config::ReconnectConfig;

/// Exponential backoff with jitter, computed from the session's attempt
/// counter so the schedule survives the session being torn down and rebuilt.
#[derive(Debug, Clone)]
pub struct BackoffSchedule {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter_factor: f64,
}

impl BackoffSchedule {
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self {
            initial_delay_ms: config.backoff_initial_ms,
            max_delay_ms: config.backoff_max_ms,
            multiplier: config.backoff_multiplier,
            jitter_factor: config.backoff_jitter,
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(32);
        let base_delay = self.initial_delay_ms as f64 * self.multiplier.powi(exponent as i32);
        let capped_delay = base_delay.min(self.max_delay_ms as f64);

        // Apply jitter only if jitter_factor > 0
        let final_delay = if self.jitter_factor > 0.0 && capped_delay > 0.0 {
            let jitter_range = capped_delay * self.jitter_factor;
            let jitter = rand::rng().random_range(-jitter_range..jitter_range);
            (capped_delay + jitter).max(1.0) as u64
        } else {
            capped_delay.max(1.0) as u64
        };

        Duration::from_millis(final_delay)
    }
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self::from_config(&ReconnectConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule_no_jitter() -> BackoffSchedule {
        BackoffSchedule {
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
            multiplier: 2.0,
            jitter_factor: 0.0, // No jitter for predictable testing
        }
    }

    #[test]
    fn test_backoff_increases_with_attempts() {
        let schedule = schedule_no_jitter();

        let d0 = schedule.delay_for_attempt(0);
        let d1 = schedule.delay_for_attempt(1);
        let d2 = schedule.delay_for_attempt(2);

        assert_eq!(d0, Duration::from_millis(100));
        assert!(d1 > d0);
        assert!(d2 > d1);
    }

    #[test]
    fn test_backoff_caps_at_max() {
        let schedule = BackoffSchedule {
            initial_delay_ms: 1_000,
            max_delay_ms: 5_000,
            multiplier: 10.0,
            jitter_factor: 0.0,
        };

        let delay = schedule.delay_for_attempt(20);
        assert!(delay.as_millis() <= 5_000);
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let schedule = BackoffSchedule {
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
            multiplier: 2.0,
            jitter_factor: 0.1,
        };

        for attempt in 0..8 {
            let base = (1_000.0 * 2.0f64.powi(attempt)).min(60_000.0);
            let delay = schedule.delay_for_attempt(attempt as u32).as_millis() as f64;
            assert!(delay >= base * 0.9 - 1.0);
            assert!(delay <= base * 1.1 + 1.0);
        }
    }

    #[test]
    fn test_large_attempt_does_not_overflow() {
        let schedule = schedule_no_jitter();
        let delay = schedule.delay_for_attempt(u32::MAX);
        assert!(delay.as_millis() <= 10_000);
    }
}
