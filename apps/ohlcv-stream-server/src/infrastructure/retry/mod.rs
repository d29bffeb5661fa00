//! Retry Backoff
//!
//! Delay schedule shared by the pollers (after a failed upstream fetch) and
//! the stream client (after a dropped connection). Delays grow by a
//! multiplier up to a ceiling, with optional symmetric jitter.

use std::time::Duration;

use rand::Rng;

/// Shortest delay a schedule hands out.
const MIN_DELAY: Duration = Duration::from_millis(1);

/// Shape of a retry schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling on any single delay.
    pub max_delay: Duration,
    /// Growth factor per attempt (1.0 keeps the delay fixed).
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%, 0.0 = none).
    pub jitter_factor: f64,
    /// Maximum number of retries (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    /// Poller defaults: 5s doubling to 2 minutes, no jitter, unlimited.
    fn default() -> Self {
        Self::exponential(Duration::from_secs(5), Duration::from_secs(120), 2.0)
    }
}

impl RetryConfig {
    /// Unlimited exponential schedule without jitter.
    #[must_use]
    pub const fn exponential(initial_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier,
            jitter_factor: 0.0,
            max_attempts: 0,
        }
    }

    /// Unlimited schedule that always waits `delay`.
    #[must_use]
    pub const fn fixed(delay: Duration) -> Self {
        Self::exponential(delay, delay, 1.0)
    }

    /// Same schedule with jitter applied to every delay.
    #[must_use]
    pub const fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }

    /// Same schedule capped at `max_attempts` retries.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// Stateful walk through a [`RetryConfig`] schedule.
///
/// ```rust
/// use ohlcv_stream_server::infrastructure::retry::{RetryConfig, RetryPolicy};
/// use std::time::Duration;
///
/// let mut policy = RetryPolicy::new(RetryConfig::fixed(Duration::from_secs(5)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(5)));
/// policy.reset();
/// ```
#[derive(Debug)]
pub struct RetryPolicy {
    config: RetryConfig,
    current: Duration,
    attempts: u32,
}

impl RetryPolicy {
    /// Start a fresh schedule.
    #[must_use]
    pub const fn new(config: RetryConfig) -> Self {
        let current = config.initial_delay;
        Self {
            config,
            current,
            attempts: 0,
        }
    }

    /// Delay to wait before the next retry, or `None` once attempts run out.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }
        self.attempts = self.attempts.saturating_add(1);

        let delay = self.jittered(self.current.min(self.config.max_delay).max(MIN_DELAY));
        self.current = self.grown(self.current);
        Some(delay)
    }

    /// Return to the initial delay after a success.
    pub const fn reset(&mut self) {
        self.current = self.config.initial_delay;
        self.attempts = 0;
    }

    /// Retries handed out since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempts
    }

    /// Whether another retry is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempts < self.config.max_attempts
    }

    fn grown(&self, delay: Duration) -> Duration {
        let multiplier = self.config.multiplier;
        if !multiplier.is_finite() || multiplier <= 0.0 {
            return self.config.max_delay;
        }
        Duration::try_from_secs_f64(delay.max(MIN_DELAY).as_secs_f64() * multiplier)
            .unwrap_or(self.config.max_delay)
            .min(self.config.max_delay)
            .max(MIN_DELAY)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let factor = self.config.jitter_factor;
        if factor <= 0.0 || delay.is_zero() {
            return delay;
        }
        let offset: f64 = rand::rng().random_range(-factor..=factor);
        Duration::try_from_secs_f64(delay.as_secs_f64() * (1.0 + offset))
            .unwrap_or(delay)
            .max(MIN_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(policy: &mut RetryPolicy, n: usize) -> Vec<u64> {
        (0..n)
            .map(|_| policy.next_delay().unwrap().as_secs())
            .collect()
    }

    #[test]
    fn default_schedule_doubles_to_two_minutes() {
        let mut policy = RetryPolicy::new(RetryConfig::default());
        assert_eq!(drain(&mut policy, 7), vec![5, 10, 20, 40, 80, 120, 120]);
    }

    #[test]
    fn fixed_schedule_never_grows() {
        let mut policy = RetryPolicy::new(RetryConfig::fixed(Duration::from_secs(5)));
        assert_eq!(drain(&mut policy, 4), vec![5, 5, 5, 5]);
    }

    #[test]
    fn initial_delay_above_ceiling_is_capped() {
        let config = RetryConfig::exponential(Duration::from_secs(30), Duration::from_secs(10), 2.0);
        let mut policy = RetryPolicy::new(config);
        assert_eq!(drain(&mut policy, 2), vec![10, 10]);
    }

    #[test]
    fn reset_restarts_schedule() {
        let mut policy = RetryPolicy::new(RetryConfig::default());
        let _ = drain(&mut policy, 3);
        assert_eq!(policy.attempt_count(), 3);

        policy.reset();
        assert_eq!(policy.attempt_count(), 0);
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn bounded_attempts_run_out() {
        let mut policy = RetryPolicy::new(RetryConfig::default().with_max_attempts(2));
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_none());
        assert!(!policy.should_retry());
    }

    #[test]
    fn unjittered_delays_never_decrease() {
        let config = RetryConfig::exponential(Duration::from_millis(250), Duration::from_secs(60), 1.7);
        let mut policy = RetryPolicy::new(config);
        let mut previous = Duration::ZERO;
        for _ in 0..50 {
            let delay = policy.next_delay().unwrap();
            assert!(delay >= previous);
            previous = delay;
        }
        assert_eq!(previous, Duration::from_secs(60));
    }

    #[test]
    fn zero_initial_delay_still_grows() {
        let config = RetryConfig::exponential(Duration::ZERO, Duration::from_millis(8), 2.0);
        let mut policy = RetryPolicy::new(config);
        let delays: Vec<_> = (0..6).map(|_| policy.next_delay().unwrap()).collect();

        assert_eq!(delays[0], MIN_DELAY);
        assert!(delays.windows(2).all(|w| w[1] >= w[0]));
        assert!(delays[1] > delays[0]);
        assert_eq!(delays[5], Duration::from_millis(8));
    }

    #[test]
    fn zero_ceiling_never_yields_zero() {
        let mut policy = RetryPolicy::new(RetryConfig::fixed(Duration::ZERO));
        assert_eq!(policy.next_delay(), Some(MIN_DELAY));
        assert_eq!(policy.next_delay(), Some(MIN_DELAY));
    }

    #[test]
    fn jitter_stays_within_band() {
        for _ in 0..100 {
            let config = RetryConfig::fixed(Duration::from_secs(1)).with_jitter(0.2);
            let delay = RetryPolicy::new(config).next_delay().unwrap();
            let millis = delay.as_millis();
            assert!((800..=1200).contains(&millis), "delay {millis}ms outside ±20%");
        }
    }
}
