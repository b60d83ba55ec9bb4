use std::time::Duration;

use livewire_config::ReconnectConfig;
use rand::Rng;

/// Exponential backoff with symmetric jitter.
///
/// The delay before attempt `n` is `min(base * 2^(n-1), max)`, scaled by a
/// random factor in `[1 - jitter, 1 + jitter]` and clamped to `max` again.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: f64,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: f64) -> Self {
        Self {
            base,
            max: max.max(base),
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(config.base_delay(), config.max_delay(), config.jitter)
    }

    pub fn max_delay(&self) -> Duration {
        self.max
    }

    /// The un-jittered delay before `attempt` (1-based).
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base.saturating_mul(1u32 << exponent).min(self.max)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt);
        if self.jitter <= 0.0 {
            return ceiling;
        }
        let factor = rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        ceiling.mul_f64(factor).min(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn ceiling_doubles_then_caps() {
        let backoff = Backoff::new(secs(1), secs(30), 0.0);
        let delays: Vec<u64> = (1..=7).map(|n| backoff.ceiling(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
        assert_eq!(backoff.ceiling(0), secs(1));
        assert_eq!(backoff.ceiling(u32::MAX), secs(30));
    }

    #[test]
    fn zero_jitter_is_exact() {
        let backoff = Backoff::new(secs(1), secs(30), 0.0);
        assert_eq!(backoff.delay(3), secs(4));
    }

    #[test]
    fn jittered_delay_stays_in_bounds() {
        let backoff = Backoff::new(secs(1), secs(30), 0.2);
        for attempt in 1..=8 {
            let ceiling = backoff.ceiling(attempt);
            let low = ceiling.mul_f64(0.8);
            let high = ceiling.mul_f64(1.2).min(secs(30));
            for _ in 0..50 {
                let d = backoff.delay(attempt);
                assert!(d >= low && d <= high, "attempt {attempt}: {d:?} not in [{low:?}, {high:?}]");
            }
        }
    }

    #[test]
    fn config_values_are_sanitized() {
        let backoff = Backoff::new(secs(5), secs(1), 3.0);
        assert_eq!(backoff.ceiling(4), secs(5));
        assert_eq!(backoff.jitter, 1.0);
    }

    #[test]
    fn from_default_config() {
        let backoff = Backoff::from_config(&ReconnectConfig::default());
        assert_eq!(backoff.ceiling(1), Duration::from_millis(1_000));
        assert_eq!(backoff.ceiling(10), Duration::from_millis(30_000));
    }
}
