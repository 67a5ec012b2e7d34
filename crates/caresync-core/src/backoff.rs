//! Exponential backoff policy for drain retries.
//!
//! Delay grows as `base × factor^min(attempt, cap)`, jittered by a
//! configurable percentage and clamped to a maximum interval. The sync
//! coordinator records the resulting deadline and lets the next platform
//! trigger decide whether it has passed; nothing sleeps in-process.

use std::time::Duration;

use rand::Rng;

/// Configuration for retry delay growth.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Upper bound on any computed delay.
    pub max_delay: Duration,
    /// Multiplier applied per failed attempt.
    pub factor: f64,
    /// Random jitter range as a fraction of the delay (0.1 = ±10%).
    pub jitter_percent: f64,
    /// Exponent cap: attempts beyond this stop growing the delay.
    pub exponent_cap: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(300),
            factor: 2.0,
            jitter_percent: 0.1,
            exponent_cap: 6,
        }
    }
}

impl BackoffPolicy {
    /// Policy with no jitter, for deterministic tests.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter_percent = 0.0;
        self
    }

    /// Delay before the next retry given the number of failed attempts so
    /// far (1 = first failure just happened).
    #[must_use]
    pub fn delay_for_attempt(&self, attempts: u32) -> Duration {
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);

        let exp = attempts.saturating_sub(1).min(self.exponent_cap) as i32;
        let delay_ms = (base_ms as f64) * self.factor.max(1.0).powi(exp);
        let delay_ms = delay_ms.min(max_ms as f64);

        let jitter = if self.jitter_percent > 0.0 {
            let mut rng = rand::rng();
            let range = delay_ms * self.jitter_percent;
            rng.random_range(-range..=range)
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).max(0.0) as u64)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::default().without_jitter()
    }

    #[test]
    fn delay_doubles_per_attempt() {
        let policy = policy();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(8));
    }

    #[test]
    fn exponent_cap_stops_growth() {
        let policy = policy();
        let capped = policy.delay_for_attempt(policy.exponent_cap + 1);
        assert_eq!(capped, policy.delay_for_attempt(policy.exponent_cap + 10));
    }

    #[test]
    fn max_delay_clamps() {
        let policy = BackoffPolicy {
            max_delay: Duration::from_secs(5),
            ..policy()
        };
        assert_eq!(policy.delay_for_attempt(30), Duration::from_secs(5));
    }

    #[test]
    fn jitter_stays_in_bounds() {
        let policy = BackoffPolicy::default();
        for _ in 0..100 {
            let delay = policy.delay_for_attempt(1).as_millis() as f64;
            let base = 2000.0;
            assert!(delay >= base * 0.9 - 1.0 && delay <= base * 1.1 + 1.0);
        }
    }
}
