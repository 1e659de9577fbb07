//! Reconnect backoff.
//!
//! The delay grows linearly with the number of consecutive failures, in
//! one hundred equal steps from `min` to `max`:
//!
//! ```text
//! failures:   0     1          2               ...   100+
//! delay:     min   min+step   min+2·step       ...   max
//! ```
//!
//! The only state is the failure counter. It is reset whenever a
//! connection reaches `Ready`, so the next outage starts at `min` again.

use std::time::Duration;

/// Default first retry delay.
pub const DEFAULT_MIN_DELAY: Duration = Duration::from_millis(500);

/// Default longest retry delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(60_000);

/// Number of failures it takes to climb from `min` to `max`.
const STEPS: u32 = 100;

/// Produces increasing retry intervals after failures.
///
/// ```
/// use std::time::Duration;
/// use presence_rpc_session::BackoffDelay;
///
/// let mut backoff = BackoffDelay::new(Duration::from_millis(500), Duration::from_secs(60));
/// assert_eq!(backoff.next_delay(), Duration::from_millis(500));
/// assert!(backoff.next_delay() > Duration::from_millis(500));
/// ```
#[derive(Debug, Clone)]
pub struct BackoffDelay {
    min: Duration,
    max: Duration,
    failures: u32,
}

impl Default for BackoffDelay {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_DELAY, DEFAULT_MAX_DELAY)
    }
}

impl BackoffDelay {
    /// Creates a backoff between `min` and `max`.
    ///
    /// A `max` below `min` is raised to `min`.
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
            failures: 0,
        }
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Consecutive failures since the last reset.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Returns the delay before the next attempt and records one failure.
    pub fn next_delay(&mut self) -> Duration {
        let step = (self.max - self.min) / STEPS;
        let delay = self
            .min
            .saturating_add(step.saturating_mul(self.failures))
            .clamp(self.min, self.max);
        self.failures = self.failures.saturating_add(1);
        delay
    }

    /// Forgets all failures; the next delay is `min` again.
    pub fn reset(&mut self) {
        self.failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_next_delay_first_is_min() {
        let mut b = BackoffDelay::default();
        assert_eq!(b.next_delay(), ms(500));
        assert_eq!(b.failures(), 1);
    }

    #[test]
    fn test_next_delay_linear_steps() {
        let mut b = BackoffDelay::new(ms(500), ms(60_500));
        // step = 60_000 / 100 = 600ms
        assert_eq!(b.next_delay(), ms(500));
        assert_eq!(b.next_delay(), ms(1_100));
        assert_eq!(b.next_delay(), ms(1_700));
    }

    #[test]
    fn test_next_delay_monotonic_and_bounded() {
        let mut b = BackoffDelay::new(ms(500), ms(60_000));
        let mut previous = Duration::ZERO;
        for _ in 0..500 {
            let d = b.next_delay();
            assert!(d >= previous, "delay decreased: {previous:?} -> {d:?}");
            assert!(d >= ms(500) && d <= ms(60_000), "out of bounds: {d:?}");
            previous = d;
        }
        assert_eq!(previous, ms(60_000));
    }

    #[test]
    fn test_reset_returns_to_min() {
        let mut b = BackoffDelay::default();
        for _ in 0..10 {
            b.next_delay();
        }
        b.reset();
        assert_eq!(b.failures(), 0);
        assert_eq!(b.next_delay(), ms(500));
    }

    #[test]
    fn test_new_max_below_min_is_raised() {
        let mut b = BackoffDelay::new(ms(1_000), ms(10));
        assert_eq!(b.max(), ms(1_000));
        assert_eq!(b.next_delay(), ms(1_000));
        assert_eq!(b.next_delay(), ms(1_000));
    }
}
