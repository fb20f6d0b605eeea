//! Adaptive pacing between fetch calls

use std::time::Duration;

/// Tracks the delay observed between two fetch calls.
///
/// Throttling doubles the delay and the increase is sticky: a successful
/// call does not shrink it again. Without a configured ceiling the delay
/// grows without bound, since the backend quota is shared with other
/// consumers and may stay saturated for a long time.
///
/// # Example
/// ```
/// use store_dump::etl::RateController;
/// use std::time::Duration;
///
/// let mut rate = RateController::new(Duration::from_millis(500), None);
/// rate.on_throttled();
/// rate.on_success();
/// assert_eq!(rate.delay_before_next_call(), Duration::from_secs(1));
/// ```
#[derive(Clone, Debug)]
pub struct RateController {
    base: Duration,
    current: Duration,
    max: Option<Duration>,
    throttle_streak: u32,
}

impl RateController {
    /// Create a controller starting at `base`, optionally capped at `max`
    pub fn new(base: Duration, max: Option<Duration>) -> Self {
        Self {
            base,
            current: base,
            max,
            throttle_streak: 0,
        }
    }

    /// Delay to wait before the next fetch
    pub fn delay_before_next_call(&self) -> Duration {
        self.current
    }

    /// The configured steady-state delay
    pub fn base_delay(&self) -> Duration {
        self.base
    }

    /// Record a throttled call and double the delay
    pub fn on_throttled(&mut self) {
        self.throttle_streak += 1;
        let doubled = self.current.saturating_mul(2);
        self.current = match self.max {
            Some(max) => doubled.min(max),
            None => doubled,
        };
        log::debug!(
            "Throttled {} time(s) in a row, delay now {:?}",
            self.throttle_streak,
            self.current
        );
    }

    /// Record a successful call. The delay is left as is.
    pub fn on_success(&mut self) {
        if self.throttle_streak > 0 {
            log::debug!(
                "Recovered after {} throttled call(s), keeping delay at {:?}",
                self.throttle_streak,
                self.current
            );
            self.throttle_streak = 0;
        }
    }
}
