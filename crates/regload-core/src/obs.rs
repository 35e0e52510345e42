//! Structured observability hooks for the load-run lifecycle.
//!
//! This module provides:
//! - Chain-scoped tracing spans via [`ChainSpan`]
//! - Emission functions for lifecycle events: chain start/complete, step
//!   finished/skipped, dataset exhaustion, client stop, session finish
//!
//! Every event carries an `event = "..."` field so JSON logs can be
//! filtered by lifecycle stage.

use std::future::Future;
use tracing::instrument::Instrumented;
use tracing::{debug, info, warn, Instrument, Span};

/// Span covering one chain execution, tagged with `execution_id` and `repo`.
///
/// Chains run on a multi-threaded runtime, so the span is attached with
/// [`ChainSpan::instrument`] rather than held entered across `.await`.
///
/// ```ignore
/// let span = ChainSpan::new("3fa9c1d2", "docker-local-1");
/// let report = span.instrument(runner.run_chain(ctx)).await;
/// ```
pub struct ChainSpan {
    span: Span,
}

impl ChainSpan {
    pub fn new(execution_id: &str, repo: &str) -> Self {
        Self {
            span: tracing::info_span!("regload.chain", execution_id = %execution_id, repo = %repo),
        }
    }

    /// Run `future` inside the span.
    pub fn instrument<F: Future>(self, future: F) -> Instrumented<F> {
        future.instrument(self.span)
    }

    /// Enter the span for synchronous code.
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

/// Emit event: chain started for a work item.
pub fn emit_chain_started(execution_id: &str, repo: &str) {
    info!(event = "chain.started", execution_id = %execution_id, repo = %repo);
}

/// Emit event: an executed step finished.
pub fn emit_step_finished(step: &str, request_type: &str, duration_ms: u64, success: bool) {
    info!(
        event = "step.finished",
        step = %step,
        request_type = %request_type,
        duration_ms = duration_ms,
        success = success,
    );
}

/// Emit event: an executed step failed (warn level).
pub fn emit_step_failed(step: &str, error: &dyn std::fmt::Display) {
    warn!(event = "step.failed", step = %step, error = %error);
}

/// Emit event: a step did not execute.
pub fn emit_step_skipped(step: &str, reason: &dyn std::fmt::Display) {
    info!(event = "step.skipped", step = %step, reason = %reason);
}

/// Emit event: every step of the chain has a final state.
pub fn emit_chain_complete(
    execution_id: &str,
    duration_ms: u64,
    succeeded: usize,
    failed: usize,
    skipped: usize,
) {
    info!(
        event = "chain.complete",
        execution_id = %execution_id,
        duration_ms = duration_ms,
        succeeded = succeeded,
        failed = failed,
        skipped = skipped,
    );
}

/// Emit event: the dataset ran out; emitted once, by the client that raised
/// the completion signal.
pub fn emit_dataset_exhausted(issued: u64) {
    info!(event = "dataset.exhausted", issued = issued, "No more test data available");
}

/// Emit event: a virtual client left its loop.
pub fn emit_client_stopped(client_id: usize, chains: u64) {
    debug!(event = "client.stopped", client_id = client_id, chains = chains);
}

/// Emit event: the load session is over.
pub fn emit_session_finished(duration_ms: u64, chains: u64, steps_failed: u64) {
    info!(
        event = "session.finished",
        duration_ms = duration_ms,
        chains = chains,
        steps_failed = steps_failed,
    );
}
