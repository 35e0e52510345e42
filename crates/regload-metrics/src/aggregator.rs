//! Streaming latency aggregation.
//!
//! [`MetricsAggregator`] keeps one [`OperationWindow`] per operation name.
//! Each window has its own mutex so recording for different operations
//! never contends; the name-to-window map sits behind an `RwLock` that is
//! only write-locked the first time an operation name is seen. No lock is
//! held across the sink write.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, warn};

use crate::point::{Fields, Point, DEFAULT_MEASUREMENT};
use crate::sink::PointSink;
use crate::window::{MetricSample, OperationWindow};

/// Percentiles attached to every emitted point.
pub const EMITTED_PERCENTILES: [u32; 2] = [95, 99];

/// Aggregator tuning.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Samples older than this are evicted.
    pub horizon: Duration,
    /// Minimum time between two eviction sweeps.
    pub cleanup_interval: Duration,
    /// Per-operation sample bound.
    pub window_capacity: usize,
    /// Measurement name of emitted points.
    pub measurement: String,
    /// `hostname` tag value.
    pub hostname: String,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            horizon: Duration::minutes(5),
            cleanup_interval: Duration::minutes(5),
            window_capacity: 10_000,
            measurement: DEFAULT_MEASUREMENT.to_string(),
            hostname: local_hostname(),
        }
    }
}

fn local_hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "localhost".to_string())
}

/// One observation handed to [`MetricsAggregator::record`].
#[derive(Debug, Clone)]
pub struct Observation {
    pub operation: String,
    /// `PUT`, `GET`, `POST`, `docker`, ...
    pub request_type: String,
    pub success: bool,
    pub duration: std::time::Duration,
    /// Failure description, emitted as the `exception` tag.
    pub error: Option<String>,
    pub extra: Fields,
}

impl Observation {
    pub fn new(
        operation: impl Into<String>,
        request_type: impl Into<String>,
        success: bool,
        duration: std::time::Duration,
    ) -> Self {
        Self {
            operation: operation.into(),
            request_type: request_type.into(),
            success,
            duration,
            error: None,
            extra: Fields::new(),
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_extra(mut self, extra: Fields) -> Self {
        self.extra = extra;
        self
    }
}

/// Per-operation summary for end-of-run reporting.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OperationSummary {
    pub total: u64,
    pub failures: u64,
    pub in_window: usize,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

/// Rolling-window latency aggregator that emits one point per observation.
pub struct MetricsAggregator {
    config: AggregatorConfig,
    windows: RwLock<HashMap<String, Arc<Mutex<OperationWindow>>>>,
    last_cleanup: Mutex<DateTime<Utc>>,
    sink: Arc<dyn PointSink>,
}

impl MetricsAggregator {
    pub fn new(sink: Arc<dyn PointSink>, config: AggregatorConfig) -> Self {
        Self::starting_at(sink, config, Utc::now())
    }

    /// Construct with an explicit "last cleanup" instant.
    pub fn starting_at(
        sink: Arc<dyn PointSink>,
        config: AggregatorConfig,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            config,
            windows: RwLock::new(HashMap::new()),
            last_cleanup: Mutex::new(started_at),
            sink,
        }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Record an observation now and emit its point.
    pub async fn record(&self, observation: Observation) {
        self.record_at(observation, Utc::now()).await;
    }

    /// Record an observation at `now` and emit its point.
    ///
    /// Sink failures are logged and swallowed.
    pub async fn record_at(&self, observation: Observation, now: DateTime<Utc>) {
        let latency_ms = observation.duration.as_nanos() as f64 / 1_000_000.0;
        let window = self.window_for(&observation.operation);

        lock(&window).push(MetricSample {
            at: now,
            latency_ms,
            success: observation.success,
        });
        self.evict_stale(now);

        let (percentiles, window_count) = {
            let guard = lock(&window);
            (guard.percentiles(&EMITTED_PERCENTILES), guard.len())
        };

        let point = self.build_point(&observation, latency_ms, &percentiles, window_count, now);
        if let Err(e) = self.sink.write_points(std::slice::from_ref(&point)).await {
            warn!(
                event = "point.write_failed",
                operation = %observation.operation,
                error = %e,
            );
        }
    }

    /// Nearest-rank percentiles of the operation's current window.
    ///
    /// Unknown operations and empty windows yield 0 for every percentile.
    pub fn percentiles(&self, operation: &str, ps: &[u32]) -> BTreeMap<u32, f64> {
        let window = {
            let map = read(&self.windows);
            map.get(operation).cloned()
        };
        match window {
            Some(window) => lock(&window).percentiles(ps),
            None => ps.iter().map(|&p| (p, 0.0)).collect(),
        }
    }

    /// Evict samples older than the horizon from every window.
    ///
    /// Does nothing (and returns `false`) when the previous sweep ran less
    /// than one cleanup interval before `now`.
    pub fn evict_stale(&self, now: DateTime<Utc>) -> bool {
        {
            let mut last = lock(&self.last_cleanup);
            if now - *last < self.config.cleanup_interval {
                return false;
            }
            *last = now;
        }

        let windows: Vec<_> = read(&self.windows).values().cloned().collect();
        let mut evicted = 0usize;
        for window in windows {
            evicted += lock(&window).evict_older_than(now, self.config.horizon);
        }
        debug!(event = "metrics.evicted", samples = evicted);
        true
    }

    /// Per-operation summary of every window seen so far.
    pub fn snapshot(&self) -> BTreeMap<String, OperationSummary> {
        let windows: Vec<_> = read(&self.windows)
            .iter()
            .map(|(name, w)| (name.clone(), Arc::clone(w)))
            .collect();

        windows
            .into_iter()
            .map(|(name, window)| {
                let guard = lock(&window);
                let ps = guard.percentiles(&EMITTED_PERCENTILES);
                let summary = OperationSummary {
                    total: guard.total(),
                    failures: guard.failures(),
                    in_window: guard.len(),
                    p95_ms: ps[&95],
                    p99_ms: ps[&99],
                };
                (name, summary)
            })
            .collect()
    }

    fn window_for(&self, operation: &str) -> Arc<Mutex<OperationWindow>> {
        if let Some(window) = read(&self.windows).get(operation) {
            return Arc::clone(window);
        }
        let mut map = self
            .windows
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(map.entry(operation.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(OperationWindow::new(self.config.window_capacity)))
        }))
    }

    fn build_point(
        &self,
        observation: &Observation,
        latency_ms: f64,
        percentiles: &BTreeMap<u32, f64>,
        window_count: usize,
        now: DateTime<Utc>,
    ) -> Point {
        let mut point = Point::new(self.config.measurement.as_str(), now)
            .tag("hostname", self.config.hostname.as_str())
            .tag("operation", observation.operation.as_str())
            .tag("request_type", observation.request_type.as_str())
            .tag("status", if observation.success { "PASS" } else { "FAIL" })
            .field("duration_ms", latency_ms)
            .field("success", i64::from(observation.success))
            .field("error", i64::from(!observation.success))
            .field("window_count", window_count as u64);

        for (p, value) in percentiles {
            point = point.field(format!("p{p}_ms"), *value);
        }
        if let Some(error) = &observation.error {
            point = point.tag("exception", truncate(error, 200));
        }
        point.with_fields(observation.extra.clone())
    }
}

fn truncate(raw: &str, max_chars: usize) -> String {
    raw.chars().take(max_chars).collect()
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read<T>(rw: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    rw.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::MemorySink;
    use crate::point::FieldValue;
    use std::time::Duration as StdDuration;

    fn aggregator(sink: Arc<MemorySink>, start: DateTime<Utc>) -> MetricsAggregator {
        MetricsAggregator::starting_at(sink, AggregatorConfig::default(), start)
    }

    fn obs(op: &str, ms: u64, success: bool) -> Observation {
        Observation::new(op, "POST", success, StdDuration::from_millis(ms))
    }

    #[tokio::test]
    async fn test_percentiles_nearest_rank() {
        let sink = Arc::new(MemorySink::new());
        let now = Utc::now();
        let agg = aggregator(sink, now);
        for ms in [10, 20, 30, 40, 50] {
            agg.record_at(obs("create_watch", ms, true), now).await;
        }

        let ps = agg.percentiles("create_watch", &[95, 99]);
        assert_eq!(ps[&95], 50.0);
        assert_eq!(ps[&99], 50.0);
    }

    #[test]
    fn test_percentiles_unknown_operation_is_zero() {
        let agg = aggregator(Arc::new(MemorySink::new()), Utc::now());
        let ps = agg.percentiles("never_recorded", &[50, 95, 99]);
        assert_eq!(ps.len(), 3);
        assert!(ps.values().all(|v| *v == 0.0));
    }

    #[tokio::test]
    async fn test_record_emits_point_with_tags_and_fields() {
        let sink = Arc::new(MemorySink::new());
        let agg = aggregator(Arc::clone(&sink), Utc::now());

        let mut extra = Fields::new();
        extra.insert("violation_count".to_string(), FieldValue::Int(3));
        agg.record(
            obs("verify_violations", 25, false)
                .with_error("HTTP 500")
                .with_extra(extra),
        )
        .await;

        let points = sink.points();
        assert_eq!(points.len(), 1);
        let point = &points[0];
        assert_eq!(point.measurement, "REST_Table");
        assert_eq!(point.tags["operation"], "verify_violations");
        assert_eq!(point.tags["status"], "FAIL");
        assert_eq!(point.tags["exception"], "HTTP 500");
        assert_eq!(point.fields["success"], FieldValue::Int(0));
        assert_eq!(point.fields["error"], FieldValue::Int(1));
        assert_eq!(point.fields["duration_ms"], FieldValue::Float(25.0));
        assert_eq!(point.fields["p95_ms"], FieldValue::Float(25.0));
        assert_eq!(point.fields["violation_count"], FieldValue::Int(3));
    }

    #[tokio::test]
    async fn test_evict_stale_is_gated_by_interval() {
        let sink = Arc::new(MemorySink::new());
        let start = Utc::now();
        let agg = aggregator(sink, start);

        agg.record_at(obs("apply_watch", 900, true), start).await;
        agg.record_at(obs("apply_watch", 10, true), start + Duration::minutes(4))
            .await;

        // Inside the interval: nothing happens even though the first sample is old enough.
        assert!(!agg.evict_stale(start + Duration::minutes(4)));
        assert_eq!(agg.percentiles("apply_watch", &[99])[&99], 900.0);

        // At the interval: the sweep runs and the 6-minute-old sample goes.
        assert!(agg.evict_stale(start + Duration::minutes(6)));
        assert_eq!(agg.percentiles("apply_watch", &[99])[&99], 10.0);

        // Immediately again: gated.
        assert!(!agg.evict_stale(start + Duration::minutes(7)));
    }

    #[tokio::test]
    async fn test_point_after_sweep_excludes_stale_samples() {
        let sink = Arc::new(MemorySink::new());
        let start = Utc::now();
        let agg = aggregator(Arc::clone(&sink), start);

        agg.record_at(obs("check_scan_status", 900, true), start).await;
        agg.record_at(
            obs("check_scan_status", 10, true),
            start + Duration::minutes(6),
        )
        .await;

        let points = sink.points();
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].fields["p99_ms"], FieldValue::Float(10.0));
        assert_eq!(points[1].fields["p95_ms"], FieldValue::Float(10.0));
        assert_eq!(points[1].fields["window_count"], FieldValue::Int(1));
    }

    #[tokio::test]
    async fn test_snapshot_counts_failures() {
        let sink = Arc::new(MemorySink::new());
        let agg = aggregator(sink, Utc::now());
        agg.record(obs("push_image", 100, true)).await;
        agg.record(obs("push_image", 300, false)).await;

        let snapshot = agg.snapshot();
        let push = &snapshot["push_image"];
        assert_eq!(push.total, 2);
        assert_eq!(push.failures, 1);
        assert_eq!(push.in_window, 2);
        assert_eq!(push.p99_ms, 300.0);
    }

    #[tokio::test]
    async fn test_sink_failure_is_swallowed() {
        let sink = Arc::new(MemorySink::failing());
        let agg = aggregator(Arc::clone(&sink), Utc::now());
        agg.record(obs("create_repository", 5, true)).await;
        assert_eq!(agg.percentiles("create_repository", &[95])[&95], 5.0);
        assert!(sink.points().is_empty());
    }
}
