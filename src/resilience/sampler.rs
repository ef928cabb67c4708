//! Token-bucket sampler bounding how many outcomes a breaker inspects.

use tokio::time::Instant;

/// A simple token bucket.
#[derive(Debug)]
pub struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    pub fn new(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_update: now,
        }
    }

    /// Take one token if available. Capacity and rate are passed per call so
    /// hot-swapped settings apply without rebuilding the bucket.
    pub fn try_acquire(&mut self, capacity: f64, refill_rate: f64, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();

        // Refill tokens
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_bucket_caps_rate() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(100.0, start);
        let taken = (0..150).filter(|_| bucket.try_acquire(100.0, 100.0, start)).count();
        assert_eq!(taken, 100);

        // Refill stops at capacity.
        let later = start + Duration::from_secs(3);
        let taken = (0..150).filter(|_| bucket.try_acquire(100.0, 100.0, later)).count();
        assert_eq!(taken, 100);
    }
}
