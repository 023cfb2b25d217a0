//! Bucketed rolling-window counters for circuit breaker accounting

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Counts accumulated in one bucket, or summed over the window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollingCounts {
    /// Calls that reached the transport
    pub fires: u64,
    pub successes: u64,
    pub failures: u64,
    /// Subset of `failures` caused by the transport timeout
    pub timeouts: u64,
    /// Calls turned away without contacting the transport
    pub rejects: u64,
}

impl RollingCounts {
    /// Failure rate in percent over calls that reached the transport
    pub fn failure_percent(&self) -> f64 {
        if self.fires == 0 {
            0.0
        } else {
            self.failures as f64 * 100.0 / self.fires as f64
        }
    }

    fn add(&mut self, other: &RollingCounts) {
        self.fires += other.fires;
        self.successes += other.successes;
        self.failures += other.failures;
        self.timeouts += other.timeouts;
        self.rejects += other.rejects;
    }
}

#[derive(Debug)]
struct Bucket {
    started: Instant,
    counts: RollingCounts,
}

/// Time-bounded counter split into fixed-width buckets
///
/// Memory is bounded by the bucket count; buckets older than the window
/// are discarded lazily on every access.
#[derive(Debug)]
pub struct RollingWindow {
    window: Duration,
    bucket_width: Duration,
    max_buckets: usize,
    buckets: VecDeque<Bucket>,
}

impl RollingWindow {
    pub fn new(window: Duration, buckets: u32) -> Self {
        let max_buckets = buckets.max(1) as usize;
        let bucket_width = (window / max_buckets as u32).max(Duration::from_millis(1));

        Self {
            window,
            bucket_width,
            max_buckets,
            buckets: VecDeque::with_capacity(max_buckets),
        }
    }

    pub fn record_fire(&mut self) {
        self.current(Instant::now()).fires += 1;
    }

    pub fn record_success(&mut self) {
        self.current(Instant::now()).successes += 1;
    }

    pub fn record_failure(&mut self, timed_out: bool) {
        let bucket = self.current(Instant::now());
        bucket.failures += 1;
        if timed_out {
            bucket.timeouts += 1;
        }
    }

    pub fn record_reject(&mut self) {
        self.current(Instant::now()).rejects += 1;
    }

    /// Sum of all buckets still inside the window
    pub fn totals(&mut self) -> RollingCounts {
        self.evict(Instant::now());
        self.buckets.iter().fold(RollingCounts::default(), |mut acc, b| {
            acc.add(&b.counts);
            acc
        })
    }

    pub fn reset(&mut self) {
        self.buckets.clear();
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    fn evict(&mut self, now: Instant) {
        while let Some(oldest) = self.buckets.front() {
            if now.duration_since(oldest.started) >= self.window {
                self.buckets.pop_front();
            } else {
                break;
            }
        }
    }

    fn current(&mut self, now: Instant) -> &mut RollingCounts {
        self.evict(now);

        let needs_new = match self.buckets.back() {
            Some(last) => now.duration_since(last.started) >= self.bucket_width,
            None => true,
        };

        if needs_new {
            if self.buckets.len() == self.max_buckets {
                self.buckets.pop_front();
            }
            self.buckets.push_back(Bucket {
                started: now,
                counts: RollingCounts::default(),
            });
        }

        let last = self.buckets.len() - 1;
        &mut self.buckets[last].counts
    }
}
