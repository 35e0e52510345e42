//! Per-operation sliding window of latency samples.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, VecDeque};

/// One observed latency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricSample {
    pub at: DateTime<Utc>,
    pub latency_ms: f64,
    pub success: bool,
}

/// Time-ordered, capacity-bounded window of samples for one operation.
///
/// Samples are appended in arrival order; when the capacity is reached the
/// oldest sample is dropped before the new one is pushed.
#[derive(Debug, Clone)]
pub struct OperationWindow {
    samples: VecDeque<MetricSample>,
    capacity: usize,
    total: u64,
    failures: u64,
}

impl OperationWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::new(),
            capacity: capacity.max(1),
            total: 0,
            failures: 0,
        }
    }

    pub fn push(&mut self, sample: MetricSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        self.total += 1;
        if !sample.success {
            self.failures += 1;
        }
    }

    /// Drop every sample older than `now - horizon`. Returns how many went.
    pub fn evict_older_than(&mut self, now: DateTime<Utc>, horizon: Duration) -> usize {
        let cutoff = now - horizon;
        let before = self.samples.len();
        // Arrival order is not strictly timestamp order under concurrency,
        // so filter rather than pop from the front.
        self.samples.retain(|s| s.at >= cutoff);
        before - self.samples.len()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples recorded over the window's lifetime, evicted ones included.
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Nearest-rank percentiles over the current samples.
    pub fn percentiles(&self, ps: &[u32]) -> BTreeMap<u32, f64> {
        let mut sorted: Vec<f64> = self.samples.iter().map(|s| s.latency_ms).collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        ps.iter().map(|&p| (p, nearest_rank(&sorted, p))).collect()
    }
}

/// Value at rank `floor(n * p / 100)` of an ascending slice, clamped to the
/// last element. Returns 0 for an empty slice.
pub fn nearest_rank(sorted: &[f64], p: u32) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let n = sorted.len();
    let rank = (n as u64 * u64::from(p) / 100) as usize;
    sorted[rank.min(n - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(at: DateTime<Utc>, latency_ms: f64) -> MetricSample {
        MetricSample {
            at,
            latency_ms,
            success: true,
        }
    }

    #[test]
    fn test_nearest_rank_p95_of_five() {
        let sorted = [10.0, 20.0, 30.0, 40.0, 50.0];
        assert_eq!(nearest_rank(&sorted, 95), 50.0);
        assert_eq!(nearest_rank(&sorted, 50), 30.0);
        assert_eq!(nearest_rank(&sorted, 0), 10.0);
    }

    #[test]
    fn test_nearest_rank_clamps_p100() {
        assert_eq!(nearest_rank(&[1.0, 2.0], 100), 2.0);
    }

    #[test]
    fn test_nearest_rank_empty_is_zero() {
        assert_eq!(nearest_rank(&[], 99), 0.0);
    }

    #[test]
    fn test_window_sorts_before_ranking() {
        let now = Utc::now();
        let mut window = OperationWindow::new(16);
        for v in [50.0, 10.0, 40.0, 20.0, 30.0] {
            window.push(sample(now, v));
        }
        let ps = window.percentiles(&[95, 99]);
        assert_eq!(ps[&95], 50.0);
        assert_eq!(ps[&99], 50.0);
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let now = Utc::now();
        let mut window = OperationWindow::new(2);
        window.push(sample(now, 100.0));
        window.push(sample(now, 1.0));
        window.push(sample(now, 2.0));
        assert_eq!(window.len(), 2);
        assert_eq!(window.total(), 3);
        assert_eq!(window.percentiles(&[99])[&99], 2.0);
    }

    #[test]
    fn test_evict_older_than_horizon() {
        let now = Utc::now();
        let mut window = OperationWindow::new(16);
        window.push(sample(now - Duration::minutes(6), 999.0));
        window.push(sample(now - Duration::minutes(1), 5.0));

        let evicted = window.evict_older_than(now, Duration::minutes(5));
        assert_eq!(evicted, 1);
        assert_eq!(window.len(), 1);
        assert_eq!(window.percentiles(&[99])[&99], 5.0);
    }
}
