//! Lifecycle events emitted while chains and sessions run.

use regload_core::fakes::{FakeContainerTool, ScriptedRegistryApi};
use regload_core::{
    emit_chain_complete, emit_chain_started, emit_client_stopped, emit_dataset_exhausted,
    emit_session_finished, emit_step_failed, emit_step_finished, emit_step_skipped, ApiConfig,
    ChainSpan, CompletionSignal, ContainerTool, Credentials, LoadConfig, RegistryApi,
    RequestTemplates, SkipReason, WorkItem, WorkflowRunner,
};
use regload_metrics::fakes::MemorySink;
use regload_metrics::{AggregatorConfig, MetricsAggregator};
use std::sync::Arc;
use tracing_test::traced_test;

#[traced_test]
#[test]
fn test_emit_functions_log_event_names() {
    emit_chain_started("ab12cd34", "docker-local-1");
    emit_step_finished("create_watch", "POST", 42, true);
    emit_step_failed("push_image", &"pull exited with code 1");
    emit_step_skipped("apply_watch", &SkipReason::MissingIdentifier("watch_name"));
    emit_chain_complete("ab12cd34", 420, 6, 1, 1);
    emit_dataset_exhausted(2);
    emit_session_finished(1_000, 2, 1);

    assert!(logs_contain("chain.started"));
    assert!(logs_contain("step.finished"));
    assert!(logs_contain("step.failed"));
    assert!(logs_contain("missing watch_name"));
    assert!(logs_contain("chain.complete"));
    assert!(logs_contain("No more test data available"));
    assert!(logs_contain("session.finished"));
}

#[traced_test]
#[test]
fn test_client_stopped_is_debug() {
    emit_client_stopped(3, 12);
    assert!(logs_contain("client.stopped"));
}

#[traced_test]
#[tokio::test]
async fn test_chain_events_carry_execution_span() {
    let span = ChainSpan::new("feedbeef", "docker-local-9");
    span.instrument(async {
        emit_step_finished("validate_repository", "GET", 7, true);
    })
    .await;

    assert!(logs_contain("feedbeef"));
    assert!(logs_contain("docker-local-9"));
}

#[traced_test]
#[tokio::test]
async fn test_runner_logs_skips_and_completion() {
    let api = Arc::new(ScriptedRegistryApi::new());
    let runner = WorkflowRunner::new(
        api as Arc<dyn RegistryApi>,
        Arc::new(FakeContainerTool::new()) as Arc<dyn ContainerTool>,
        Arc::new(MetricsAggregator::new(
            Arc::new(MemorySink::new()),
            AggregatorConfig::default(),
        )),
        CompletionSignal::new(),
        Arc::new(LoadConfig {
            api: ApiConfig::new("https://acme.jfrog.io"),
            credentials: Credentials::from_user_pass("admin", "pw"),
            templates: RequestTemplates::new(),
        }),
    );

    let report = runner
        .run(WorkItem::from_pairs([
            ("repo_name", "docker-local-5"),
            ("policy_name", ""),
            ("watch_name", ""),
        ]))
        .await;

    assert!(logs_contain("step.skipped"));
    assert!(logs_contain("missing policy_name"));
    assert!(logs_contain("chain.complete"));
    assert!(logs_contain(&report.execution_id));
}
