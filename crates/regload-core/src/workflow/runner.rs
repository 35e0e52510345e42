//! Chain execution with per-step failure isolation.

use futures::FutureExt;
use regload_metrics::{MetricsAggregator, Observation};
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::api::{ApiRequest, RegistryApi};
use crate::config::LoadConfig;
use crate::container::ContainerTool;
use crate::error::{ConfigError, StepFailure};
use crate::obs::{self, ChainSpan};
use crate::push::{push_image, PushPlan};
use crate::signal::CompletionSignal;
use crate::source::WorkItem;
use crate::workflow::classify::Verdict;
use crate::workflow::context::WorkflowContext;
use crate::workflow::step::{
    Action, ChainReport, ChainState, HttpAction, SkipReason, StepDescriptor, StepOutcome,
    StepRecord, StepState, CHAIN,
};

/// What in-flight chains do once the completion signal is raised.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShutdownPolicy {
    /// Finish every step of chains already started.
    #[default]
    Drain,
    /// Skip the remaining steps of chains already started.
    Halt,
}

/// Step inputs resolved from configuration.
enum Resolved<'a> {
    Http {
        action: &'a HttpAction,
        path: String,
        template: Option<&'a Value>,
    },
    Push,
}

/// Runs the chain for one work item at a time. Shared by every virtual
/// client through an `Arc`.
pub struct WorkflowRunner {
    api: Arc<dyn RegistryApi>,
    container: Arc<dyn ContainerTool>,
    metrics: Arc<MetricsAggregator>,
    signal: CompletionSignal,
    config: Arc<LoadConfig>,
    policy: ShutdownPolicy,
}

impl WorkflowRunner {
    pub fn new(
        api: Arc<dyn RegistryApi>,
        container: Arc<dyn ContainerTool>,
        metrics: Arc<MetricsAggregator>,
        signal: CompletionSignal,
        config: Arc<LoadConfig>,
    ) -> Self {
        Self {
            api,
            container,
            metrics,
            signal,
            config,
            policy: ShutdownPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ShutdownPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn metrics(&self) -> &Arc<MetricsAggregator> {
        &self.metrics
    }

    pub fn signal(&self) -> &CompletionSignal {
        &self.signal
    }

    /// Run the whole chain for `item`. Never fails; every step ends up
    /// skipped, succeeded or failed and the report is always `Complete`.
    pub async fn run(&self, item: WorkItem) -> ChainReport {
        let ctx = WorkflowContext::new(item, &self.config.api.image);
        let span = ChainSpan::new(&ctx.execution_id, ctx.repo().unwrap_or("-"));
        span.instrument(self.run_chain(ctx)).await
    }

    async fn run_chain(&self, ctx: WorkflowContext) -> ChainReport {
        let start = Instant::now();
        let mut report = ChainReport::new(&ctx);
        obs::emit_chain_started(&ctx.execution_id, ctx.repo().unwrap_or("-"));

        // A chain that has not begun never starts once the signal is up,
        // whatever the policy.
        let stopped_before_start = self.signal.is_raised();
        if stopped_before_start {
            debug!("Completion signal raised before chain start");
        }

        report.state = ChainState::Running;
        for descriptor in CHAIN.iter() {
            let state = if stopped_before_start {
                skipped(descriptor.kind.name(), SkipReason::Stopped)
            } else {
                self.run_step(descriptor, &ctx).await
            };
            report.steps.push(StepRecord {
                kind: descriptor.kind,
                state,
            });
        }

        report.state = ChainState::Complete;
        report.duration_ms = start.elapsed().as_millis() as u64;
        obs::emit_chain_complete(
            &ctx.execution_id,
            report.duration_ms,
            report.succeeded(),
            report.failed(),
            report.skipped(),
        );
        report
    }

    async fn run_step(&self, descriptor: &StepDescriptor, ctx: &WorkflowContext) -> StepState {
        let step = descriptor.kind.name();

        if self.signal.is_raised() {
            match self.policy {
                ShutdownPolicy::Halt => return skipped(step, SkipReason::Stopped),
                ShutdownPolicy::Drain => debug!(step, "Completion signal raised; draining"),
            }
        }
        if let Some(missing) = ctx.first_missing(descriptor.requires) {
            return skipped(step, SkipReason::MissingIdentifier(missing.column()));
        }
        let resolved = match self.resolve(descriptor, ctx) {
            Ok(resolved) => resolved,
            Err(ConfigError::Missing(what)) => return skipped(step, SkipReason::MissingConfig(what)),
            Err(e) => return skipped(step, SkipReason::MissingConfig(e.to_string())),
        };

        let start = Instant::now();
        let result = AssertUnwindSafe(self.perform(resolved, ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(StepFailure::Panicked(panic_message(panic))));
        let duration = start.elapsed();

        let state = settle(descriptor, duration, result);
        self.record(descriptor, &state).await;
        state
    }

    /// Look up endpoint and template; absence means the step is skipped.
    fn resolve<'a>(
        &'a self,
        descriptor: &'a StepDescriptor,
        ctx: &WorkflowContext,
    ) -> Result<Resolved<'a>, ConfigError> {
        let action = match &descriptor.action {
            Action::PushImage => return Ok(Resolved::Push),
            Action::Http(action) => action,
        };

        let endpoint = self
            .config
            .api
            .endpoint(action.endpoint)
            .ok_or_else(|| ConfigError::Missing(format!("endpoint {}", action.endpoint)))?;
        let template = match &action.body {
            Some(body) => Some(self.config.templates.get(body.template).ok_or_else(|| {
                ConfigError::Missing(format!("request template {}", body.template))
            })?),
            None => None,
        };

        let path = if action.append_repo {
            format!(
                "{}/{}",
                endpoint.path.trim_end_matches('/'),
                ctx.repo().unwrap_or_default()
            )
        } else {
            endpoint.path.clone()
        };

        Ok(Resolved::Http {
            action,
            path,
            template,
        })
    }

    async fn perform(
        &self,
        resolved: Resolved<'_>,
        ctx: &WorkflowContext,
    ) -> Result<Verdict, StepFailure> {
        match resolved {
            Resolved::Push => self.push(ctx).await,
            Resolved::Http {
                action,
                path,
                template,
            } => self.call(action, path, template, ctx).await,
        }
    }

    async fn call(
        &self,
        action: &HttpAction,
        path: String,
        template: Option<&Value>,
        ctx: &WorkflowContext,
    ) -> Result<Verdict, StepFailure> {
        let mut request = ApiRequest::new(action.method, path);
        if let (Some(body), Some(template)) = (&action.body, template) {
            request = request.with_body((body.build)(template, ctx)?);
        }

        let attempts = if action.polls {
            self.config.api.scan_poll.max_attempts.max(1)
        } else {
            1
        };
        let interval = Duration::from_millis(self.config.api.scan_poll.interval_ms);

        let mut attempt = 1;
        loop {
            let response = self.api.send(request.clone()).await?;
            let verdict = (action.classify)(&response, ctx)?
                .with("response_length", response.body.len() as u64);
            if verdict.pending.is_none() || attempt >= attempts {
                return Ok(if action.polls {
                    verdict.with("poll_attempts", u64::from(attempt))
                } else {
                    verdict
                });
            }
            debug!(
                attempt,
                attempts,
                status = verdict.pending.as_deref().unwrap_or_default(),
                "Scan still in progress"
            );
            attempt += 1;
            tokio::time::sleep(interval).await;
        }
    }

    async fn push(&self, ctx: &WorkflowContext) -> Result<Verdict, StepFailure> {
        let (username, password) = self
            .config
            .credentials
            .basic_auth()
            .map_err(|e| StepFailure::Credentials(e.to_string()))?;
        let host = self.config.api.resolve_registry_host()?;
        let plan = PushPlan::new(
            &self.config.api.image,
            &host,
            ctx.repo().unwrap_or_default(),
        );

        let report = push_image(self.container.as_ref(), &plan, &username, &password).await?;
        let verdict = Verdict::accepted().with("target_image", report.target_image);
        Ok(match report.image_size {
            Some(size) => verdict.with("image_size", size),
            None => verdict,
        })
    }

    async fn record(&self, descriptor: &StepDescriptor, state: &StepState) {
        let (outcome, error) = match state {
            StepState::Succeeded { outcome } => (outcome, None),
            StepState::Failed { outcome, error } => (outcome, Some(error.as_str())),
            StepState::Skipped { .. } => return,
        };

        let step = descriptor.kind.name();
        let duration_ms = outcome.duration.as_millis() as u64;
        obs::emit_step_finished(step, outcome.request_type, duration_ms, outcome.success);
        if let Some(error) = error {
            obs::emit_step_failed(step, &error);
        }

        let mut observation = Observation::new(
            step,
            outcome.request_type,
            outcome.success,
            outcome.duration,
        )
        .with_extra(outcome.detail.clone());
        if let Some(error) = error {
            observation = observation.with_error(error);
        }
        self.metrics.record(observation).await;
    }
}

fn skipped(step: &str, reason: SkipReason) -> StepState {
    obs::emit_step_skipped(step, &reason);
    StepState::Skipped { reason }
}

fn settle(
    descriptor: &StepDescriptor,
    duration: Duration,
    result: Result<Verdict, StepFailure>,
) -> StepState {
    let outcome = |success: bool, detail| StepOutcome {
        success,
        duration,
        request_type: descriptor.request_type(),
        detail,
    };
    match result {
        Ok(Verdict {
            detail,
            pending: None,
        }) => StepState::Succeeded {
            outcome: outcome(true, detail),
        },
        Ok(Verdict {
            detail,
            pending: Some(status),
        }) => StepState::Failed {
            outcome: outcome(false, detail),
            error: format!("not complete: upstream status {status}"),
        },
        Err(failure) => StepState::Failed {
            outcome: outcome(false, Default::default()),
            error: failure.to_string(),
        },
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_downcasts() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new("boom".to_string())), "boom");
        assert_eq!(panic_message(Box::new(7u8)), "unknown panic");
    }

    #[test]
    fn test_pending_verdict_settles_as_failed() {
        let descriptor = &CHAIN[6];
        let state = settle(
            descriptor,
            Duration::from_millis(5),
            Ok(Verdict {
                pending: Some("SCANNING".to_string()),
                ..Verdict::accepted()
            }),
        );
        match state {
            StepState::Failed { outcome, error } => {
                assert!(!outcome.success);
                assert_eq!(outcome.request_type, "POST");
                assert!(error.contains("SCANNING"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
