//! Load session: virtual clients pulling work items until the dataset runs
//! out or the run-time limit elapses.

use regload_metrics::OperationSummary;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::error::SourceError;
use crate::obs;
use crate::signal::CompletionSignal;
use crate::source::WorkItemSource;
use crate::workflow::{ChainReport, WorkflowRunner};

/// Session shape.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Number of virtual clients.
    pub users: usize,
    /// Clients started per second during ramp-up; `0` starts them all at
    /// once.
    pub spawn_rate: f64,
    /// Sleep between two chains of one client.
    pub pacing: Duration,
    /// Raise the completion signal after this long.
    pub run_time: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            users: 1,
            spawn_rate: 1.0,
            pacing: Duration::from_secs(1),
            run_time: None,
        }
    }
}

impl SessionConfig {
    /// Delay between two client starts.
    pub fn spawn_interval(&self) -> Duration {
        if self.spawn_rate > 0.0 && self.spawn_rate.is_finite() {
            Duration::from_secs_f64(1.0 / self.spawn_rate)
        } else {
            Duration::ZERO
        }
    }
}

/// Step and chain totals across every client.
#[derive(Debug, Default)]
pub struct SessionCounters {
    chains: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

impl SessionCounters {
    fn absorb(&self, report: &ChainReport) {
        self.chains.fetch_add(1, Ordering::Relaxed);
        self.succeeded
            .fetch_add(report.succeeded() as u64, Ordering::Relaxed);
        self.failed.fetch_add(report.failed() as u64, Ordering::Relaxed);
        self.skipped
            .fetch_add(report.skipped() as u64, Ordering::Relaxed);
    }

    pub fn chains(&self) -> u64 {
        self.chains.load(Ordering::Relaxed)
    }
}

/// End-of-run report.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub clients: usize,
    pub items_issued: u64,
    pub chains_completed: u64,
    pub steps_succeeded: u64,
    pub steps_failed: u64,
    pub steps_skipped: u64,
    pub duration_ms: u64,
    pub operations: BTreeMap<String, OperationSummary>,
}

/// One virtual user.
pub struct VirtualClient {
    pub id: usize,
    source: Arc<WorkItemSource>,
    runner: Arc<WorkflowRunner>,
    signal: CompletionSignal,
    counters: Arc<SessionCounters>,
    pacing: Duration,
}

impl VirtualClient {
    /// Acquire, run, pace; until the signal is raised or the source is
    /// exhausted. Returns the number of chains this client ran.
    pub async fn run_loop(self) -> u64 {
        let mut chains = 0u64;
        loop {
            if self.signal.is_raised() {
                break;
            }
            let item = match self.source.next() {
                Ok(item) => item,
                Err(SourceError::Exhausted) => {
                    if self.signal.raise() {
                        obs::emit_dataset_exhausted(self.source.issued_count());
                    }
                    break;
                }
                Err(e) => {
                    error!(client_id = self.id, error = %e, "Work item source unusable");
                    self.signal.raise();
                    break;
                }
            };

            let report = self.runner.run(item).await;
            self.counters.absorb(&report);
            chains += 1;

            if !self.pacing.is_zero() && !self.signal.is_raised() {
                tokio::time::sleep(self.pacing).await;
            }
        }
        obs::emit_client_stopped(self.id, chains);
        chains
    }
}

/// Drives `users` virtual clients against a shared source and runner.
pub struct LoadSession {
    source: Arc<WorkItemSource>,
    runner: Arc<WorkflowRunner>,
    config: SessionConfig,
}

impl LoadSession {
    pub fn new(
        source: Arc<WorkItemSource>,
        runner: Arc<WorkflowRunner>,
        config: SessionConfig,
    ) -> Self {
        Self {
            source,
            runner,
            config,
        }
    }

    pub fn signal(&self) -> &CompletionSignal {
        self.runner.signal()
    }

    pub async fn run(&self) -> SessionSummary {
        let start = Instant::now();
        let signal = self.runner.signal().clone();
        let counters = Arc::new(SessionCounters::default());

        if self.source.remaining() == 0 {
            warn!("No test data available");
            signal.raise();
        }

        let timer = self.config.run_time.map(|limit| {
            let signal = signal.clone();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                if signal.raise() {
                    info!(event = "session.time_limit", limit_secs = limit.as_secs(), "Run time elapsed");
                }
            })
        });

        info!(
            users = self.config.users,
            spawn_rate = self.config.spawn_rate,
            items = self.source.remaining(),
            "Starting load session"
        );

        let interval = self.config.spawn_interval();
        let mut clients = JoinSet::new();
        let mut started = 0;
        for id in 0..self.config.users {
            if signal.is_raised() {
                break;
            }
            let client = VirtualClient {
                id,
                source: Arc::clone(&self.source),
                runner: Arc::clone(&self.runner),
                signal: signal.clone(),
                counters: Arc::clone(&counters),
                pacing: self.config.pacing,
            };
            clients.spawn(client.run_loop());
            started += 1;
            if id + 1 < self.config.users && !interval.is_zero() {
                tokio::time::sleep(interval).await;
            }
        }

        while let Some(joined) = clients.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Virtual client task failed");
            }
        }
        if let Some(timer) = timer {
            timer.abort();
        }

        let summary = SessionSummary {
            clients: started,
            items_issued: self.source.issued_count(),
            chains_completed: counters.chains(),
            steps_succeeded: counters.succeeded.load(Ordering::Relaxed),
            steps_failed: counters.failed.load(Ordering::Relaxed),
            steps_skipped: counters.skipped.load(Ordering::Relaxed),
            duration_ms: start.elapsed().as_millis() as u64,
            operations: self.runner.metrics().snapshot(),
        };
        obs::emit_session_finished(
            summary.duration_ms,
            summary.chains_completed,
            summary.steps_failed,
        );
        summary
    }
}
