//! Bounded exponential backoff for transport reconnection

use std::time::Duration;

use rand::Rng;

/// Exponential backoff configuration
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry, in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,
    /// Multiplier for exponential growth
    pub multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
    /// Number of retries allowed before the policy is exhausted
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: 60_000,
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts: 5,
        }
    }
}

/// Attempt counter plus delay calculator.
///
/// Attempt `n` (0-based) waits `initial_delay * multiplier^n`, capped at
/// `max_delay`. Once `max_attempts` delays have been handed out,
/// [`next_delay`](Self::next_delay) returns `None` until [`reset`](Self::reset).
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    attempt: u32,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff with default configuration
    pub fn new() -> Self {
        Self::with_config(BackoffConfig::default())
    }

    /// Create a new exponential backoff with custom configuration
    pub fn with_config(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay for the next attempt, or `None` when the attempt budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }

        let capped_delay = self.base_delay(self.attempt);
        self.attempt += 1;

        // Apply jitter only if jitter_factor > 0
        let final_delay = if self.config.jitter_factor > 0.0 && capped_delay > 0.0 {
            let jitter_range = capped_delay * self.config.jitter_factor;
            let jitter = rand::rng().random_range(-jitter_range..jitter_range);
            (capped_delay + jitter).max(1.0) as u64
        } else {
            capped_delay as u64
        };

        Some(Duration::from_millis(final_delay))
    }

    /// Un-jittered delay for a given 0-based attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay(attempt) as u64)
    }

    fn base_delay(&self, attempt: u32) -> f64 {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base_delay = self.config.initial_delay_ms as f64 * self.config.multiplier.powi(exponent);
        base_delay.min(self.config.max_delay_ms as f64)
    }

    /// Reset the backoff to initial state
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Number of delays handed out since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.config.max_attempts
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(initial_delay_ms: u64, max_attempts: u32) -> BackoffConfig {
        BackoffConfig {
            initial_delay_ms,
            max_delay_ms: 1_000_000,
            multiplier: 2.0,
            jitter_factor: 0.0, // No jitter for predictable testing
            max_attempts,
        }
    }

    #[test]
    fn test_delays_double_from_base() {
        let mut backoff = ExponentialBackoff::with_config(no_jitter(1000, 5));

        let delays: Vec<u64> = std::iter::from_fn(|| backoff.next_delay())
            .map(|d| d.as_millis() as u64)
            .collect();

        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);
    }

    #[test]
    fn test_exhausts_after_max_attempts() {
        let mut backoff = ExponentialBackoff::with_config(no_jitter(100, 3));

        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.is_exhausted());
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.attempt(), 3);
    }

    #[test]
    fn test_zero_max_attempts_never_retries() {
        let mut backoff = ExponentialBackoff::with_config(no_jitter(100, 0));
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn test_exponential_backoff_caps_at_max() {
        let config = BackoffConfig {
            initial_delay_ms: 1000,
            max_delay_ms: 5000,
            multiplier: 10.0,
            jitter_factor: 0.0,
            max_attempts: 10,
        };
        let mut backoff = ExponentialBackoff::with_config(config);

        for _ in 0..5 {
            backoff.next_delay();
        }

        let delay = backoff.next_delay().unwrap();
        assert_eq!(delay.as_millis(), 5000);
    }

    #[test]
    fn test_exponential_backoff_reset() {
        let mut backoff = ExponentialBackoff::with_config(no_jitter(100, 3));

        backoff.next_delay();
        backoff.next_delay();
        backoff.next_delay();
        assert!(backoff.is_exhausted());

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_jitter_stays_within_factor() {
        let config = BackoffConfig {
            initial_delay_ms: 1000,
            max_delay_ms: 10_000,
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 100,
        };
        let mut backoff = ExponentialBackoff::with_config(config);

        let first = backoff.next_delay().unwrap().as_millis();
        assert!((900..=1100).contains(&first), "got {}", first);
    }

    #[test]
    fn test_delay_for_is_pure() {
        let backoff = ExponentialBackoff::with_config(no_jitter(250, 5));
        assert_eq!(backoff.delay_for(0), Duration::from_millis(250));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(2000));
        assert_eq!(backoff.attempt(), 0);
    }
}
