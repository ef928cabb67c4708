//! Sliding-window outcome counters.
//!
//! The window is split into fixed-width buckets addressed by slot number
//! (elapsed time / bucket width). A bucket whose slot has fallen out of the
//! window is reset lazily on write and ignored on read.

use std::time::Duration;

use tokio::time::Instant;

/// Request outcome totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
}

impl Counts {
    /// Failures divided by requests; 0 when there were no requests.
    pub fn failure_ratio(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.failures as f64 / self.requests as f64
        }
    }

    fn add(&mut self, other: &Counts) {
        self.requests += other.requests;
        self.successes += other.successes;
        self.failures += other.failures;
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    slot: Option<u64>,
    counts: Counts,
}

/// Rolling counters over `window`, in `buckets` slices.
#[derive(Debug)]
pub struct SlidingWindow {
    origin: Instant,
    width: Duration,
    buckets: Vec<Bucket>,
}

impl SlidingWindow {
    pub fn new(window: Duration, buckets: u32, now: Instant) -> Self {
        let buckets = buckets.max(1);
        let width = (window / buckets).max(Duration::from_millis(1));
        Self {
            origin: now,
            width,
            buckets: vec![Bucket::default(); buckets as usize],
        }
    }

    /// True if this window was built for the given shape.
    pub fn has_shape(&self, window: Duration, buckets: u32) -> bool {
        let buckets = buckets.max(1);
        self.buckets.len() == buckets as usize
            && self.width == (window / buckets).max(Duration::from_millis(1))
    }

    fn slot(&self, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(self.origin);
        (elapsed.as_nanos() / self.width.as_nanos()) as u64
    }

    fn live(&self, bucket: &Bucket, current: u64) -> bool {
        match bucket.slot {
            Some(slot) => current.saturating_sub(slot) < self.buckets.len() as u64,
            None => false,
        }
    }

    pub fn record(&mut self, success: bool, now: Instant) {
        let slot = self.slot(now);
        let idx = (slot % self.buckets.len() as u64) as usize;
        let bucket = &mut self.buckets[idx];
        if bucket.slot != Some(slot) {
            *bucket = Bucket {
                slot: Some(slot),
                counts: Counts::default(),
            };
        }
        bucket.counts.requests += 1;
        if success {
            bucket.counts.successes += 1;
        } else {
            bucket.counts.failures += 1;
        }
    }

    /// Sum of all buckets still inside the window.
    pub fn totals(&self, now: Instant) -> Counts {
        let current = self.slot(now);
        let mut total = Counts::default();
        for bucket in &self.buckets {
            if self.live(bucket, current) {
                total.add(&bucket.counts);
            }
        }
        total
    }

    /// Reset buckets that have slid out of the window.
    pub fn expire(&mut self, now: Instant) {
        let current = self.slot(now);
        let len = self.buckets.len() as u64;
        for bucket in &mut self.buckets {
            if let Some(slot) = bucket.slot {
                if current.saturating_sub(slot) >= len {
                    *bucket = Bucket::default();
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.buckets.iter_mut().for_each(|b| *b = Bucket::default());
    }
}
