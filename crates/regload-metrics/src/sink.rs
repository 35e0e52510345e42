//! Point sinks.
//!
//! - `InfluxSink`: InfluxDB 1.x HTTP write API (line protocol)
//! - `LogSink`: emits each point as a debug-level tracing event
//!
//! An in-memory sink for tests lives in the `fakes` module.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{SinkError, SinkResult};
use crate::point::Point;

/// Destination for emitted time-series points.
#[async_trait]
pub trait PointSink: Send + Sync {
    /// Write a batch of points.
    async fn write_points(&self, points: &[Point]) -> SinkResult<()>;
}

/// Connection settings for an InfluxDB 1.x server.
#[derive(Debug, Clone)]
pub struct InfluxConfig {
    /// Base URL, e.g. `http://localhost:8086`
    pub url: String,
    /// Database name
    pub database: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl InfluxConfig {
    pub fn new(url: &str, database: &str) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
            database: database.to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// InfluxDB 1.x sink writing line protocol over HTTP.
pub struct InfluxSink {
    config: InfluxConfig,
    http_client: reqwest::Client,
}

impl InfluxSink {
    pub fn new(config: InfluxConfig) -> SinkResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("regload/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn database(&self) -> &str {
        &self.config.database
    }

    /// Drop and recreate the database so a run starts from an empty series.
    pub async fn reset_database(&self) -> SinkResult<()> {
        let db = &self.config.database;
        self.query(&format!("DROP DATABASE \"{db}\"")).await?;
        self.query(&format!("CREATE DATABASE \"{db}\"")).await?;
        info!(database = %db, "InfluxDB database reset");
        Ok(())
    }

    async fn query(&self, q: &str) -> SinkResult<()> {
        let url = format!("{}/query", self.config.url);
        let response = self
            .http_client
            .post(&url)
            .query(&[("q", q)])
            .send()
            .await?;
        check_status(response).await
    }
}

#[async_trait]
impl PointSink for InfluxSink {
    async fn write_points(&self, points: &[Point]) -> SinkResult<()> {
        if points.is_empty() {
            return Ok(());
        }

        let body = points
            .iter()
            .map(Point::to_line_protocol)
            .collect::<Vec<_>>()
            .join("\n");

        let url = format!("{}/write", self.config.url);
        let response = self
            .http_client
            .post(&url)
            .query(&[("db", self.config.database.as_str()), ("precision", "ns")])
            .body(body)
            .send()
            .await?;
        check_status(response).await
    }
}

async fn check_status(response: reqwest::Response) -> SinkResult<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(SinkError::Rejected {
        status: status.as_u16(),
        body,
    })
}

/// Sink that only logs points; used when no time-series database is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl PointSink for LogSink {
    async fn write_points(&self, points: &[Point]) -> SinkResult<()> {
        for point in points {
            let json = serde_json::to_string(point)?;
            debug!(event = "point.emitted", point = %json);
        }
        Ok(())
    }
}
