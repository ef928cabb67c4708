//! Weight ramp applied while a node's breaker is half-open.
//!
//! `weight = clamp(round(0.5 * elapsed / ramp * orig), 1, orig)`.
//! A ratio of 0.5 is where successes and failures break even, so the ramp
//! reaches it as the recovery window ends and the breaker closes, which
//! restores the full weight.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

const BREAK_EVEN_RATIO: f64 = 0.5;

#[derive(Debug)]
pub struct RatioRamp {
    started: Mutex<Instant>,
}

impl RatioRamp {
    pub fn new() -> Self {
        Self {
            started: Mutex::new(Instant::now()),
        }
    }

    /// Restart the ramp from now.
    pub fn reset(&self) {
        *self.started.lock() = Instant::now();
    }

    pub fn target_ratio(&self, ramp: Duration, now: Instant) -> f64 {
        if ramp.is_zero() {
            return BREAK_EVEN_RATIO;
        }
        let elapsed = now.saturating_duration_since(*self.started.lock());
        BREAK_EVEN_RATIO * elapsed.as_secs_f64() / ramp.as_secs_f64()
    }

    pub fn calculate_weight(&self, orig_weight: u32, ramp: Duration) -> u32 {
        self.calculate_weight_at(orig_weight, ramp, Instant::now())
    }

    pub fn calculate_weight_at(&self, orig_weight: u32, ramp: Duration, now: Instant) -> u32 {
        if orig_weight == 0 {
            return 0;
        }
        let raw = (self.target_ratio(ramp, now) * orig_weight as f64).round();
        (raw.min(orig_weight as f64) as u32).clamp(1, orig_weight)
    }
}

impl Default for RatioRamp {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ramp_is_monotonic_and_bounded() {
        let ramp = RatioRamp::new();
        let start = Instant::now();
        let window = Duration::from_secs(10);

        let mut last = 0;
        for step in 0..=40 {
            let w = ramp.calculate_weight_at(100, window, start + Duration::from_millis(step * 500));
            assert!(w >= last, "weight went down at step {}", step);
            assert!((1..=100).contains(&w));
            last = w;
        }
        assert_eq!(ramp.calculate_weight_at(100, window, start), 1);
        assert_eq!(ramp.calculate_weight_at(100, window, start + window), 50);
        assert_eq!(ramp.calculate_weight_at(100, window, start + window * 5), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_restarts_from_minimum() {
        let ramp = RatioRamp::new();
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(ramp.calculate_weight(10, Duration::from_secs(10)), 4);
        ramp.reset();
        assert_eq!(ramp.calculate_weight(10, Duration::from_secs(10)), 1);
    }

    #[test]
    fn test_zero_weight_stays_zero() {
        let ramp = RatioRamp::new();
        assert_eq!(ramp.calculate_weight(0, Duration::from_secs(10)), 0);
    }
}
