//! In-memory fakes for the sink trait (testing only)

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{SinkError, SinkResult};
use crate::point::Point;
use crate::sink::PointSink;

/// Sink that keeps every written point in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    points: Mutex<Vec<Point>>,
    fail: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose writes always fail.
    pub fn failing() -> Self {
        Self {
            points: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// Copy of every point written so far.
    pub fn points(&self) -> Vec<Point> {
        self.points.lock().unwrap().clone()
    }

    /// Points whose `operation` tag equals `operation`.
    pub fn points_for(&self, operation: &str) -> Vec<Point> {
        self.points
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.tags.get("operation").map(String::as_str) == Some(operation))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl PointSink for MemorySink {
    async fn write_points(&self, points: &[Point]) -> SinkResult<()> {
        if self.fail {
            return Err(SinkError::Http("memory sink configured to fail".to_string()));
        }
        self.points.lock().unwrap().extend_from_slice(points);
        Ok(())
    }
}
