//! regload-metrics: rolling latency windows and time-series points
//!
//! - `MetricsAggregator`: per-operation sliding windows, nearest-rank
//!   percentiles, gated eviction, one point per observation
//! - `Point`: measurement + tags + fields + UTC time, JSON or line protocol
//! - `PointSink`: where points go (`InfluxSink`, `LogSink`, `fakes::MemorySink`)

pub mod aggregator;
mod error;
pub mod fakes;
pub mod point;
pub mod sink;
pub mod window;

pub use aggregator::{
    AggregatorConfig, MetricsAggregator, Observation, OperationSummary, EMITTED_PERCENTILES,
};
pub use error::{SinkError, SinkResult};
pub use point::{FieldValue, Fields, Point, DEFAULT_MEASUREMENT};
pub use sink::{InfluxConfig, InfluxSink, LogSink, PointSink};
pub use window::{nearest_rank, MetricSample, OperationWindow};
