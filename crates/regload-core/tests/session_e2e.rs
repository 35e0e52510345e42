//! End-to-end load session over fakes.

use regload_core::fakes::{FakeContainerTool, ScriptedRegistryApi};
use regload_core::{
    ApiConfig, CompletionSignal, ContainerTool, Credentials, LoadConfig, LoadSession,
    RegistryApi, RequestTemplates, SessionConfig, WorkItem, WorkItemSource, WorkflowRunner,
};
use regload_metrics::fakes::MemorySink;
use regload_metrics::{AggregatorConfig, MetricsAggregator};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const REPOS: &str = "/api/repositories";

fn load_config() -> Arc<LoadConfig> {
    let api = ApiConfig::new("http://registry.local:8081")
        .with_endpoint("create_repository", REPOS)
        .with_endpoint("check_repository", REPOS);
    Arc::new(LoadConfig {
        api,
        credentials: Credentials::from_user_pass("admin", "password"),
        templates: RequestTemplates::new().with("create_repository", json!({ "key": "" })),
    })
}

fn rows(n: usize) -> Vec<WorkItem> {
    (1..=n)
        .map(|i| {
            WorkItem::from_pairs([
                ("repo_name", format!("docker-local-{i}")),
                ("policy_name", format!("policy-{i}")),
                ("watch_name", format!("watch-{i}")),
            ])
        })
        .collect()
}

struct Setup {
    api: Arc<ScriptedRegistryApi>,
    sink: Arc<MemorySink>,
    signal: CompletionSignal,
    source: Arc<WorkItemSource>,
    session: LoadSession,
}

fn setup(items: Vec<WorkItem>, config: SessionConfig) -> Setup {
    let mut api = ScriptedRegistryApi::new().respond(
        REPOS,
        200,
        r#"[{"key":"docker-local-1"},{"key":"docker-local-2"},{"key":"docker-local-3"}]"#,
    );
    for i in 1..=3 {
        api = api.respond(&format!("{REPOS}/docker-local-{i}"), 201, "");
    }
    let api = Arc::new(api);
    let sink = Arc::new(MemorySink::new());
    let metrics = Arc::new(MetricsAggregator::new(sink.clone(), AggregatorConfig::default()));
    let signal = CompletionSignal::new();
    let runner = Arc::new(WorkflowRunner::new(
        api.clone() as Arc<dyn RegistryApi>,
        Arc::new(FakeContainerTool::new()) as Arc<dyn ContainerTool>,
        metrics,
        signal.clone(),
        load_config(),
    ));
    let source = Arc::new(WorkItemSource::from_items(items));
    let session = LoadSession::new(Arc::clone(&source), runner, config);
    Setup {
        api,
        sink,
        signal,
        source,
        session,
    }
}

fn fast(users: usize) -> SessionConfig {
    SessionConfig {
        users,
        spawn_rate: 0.0,
        pacing: Duration::ZERO,
        run_time: None,
    }
}

#[tokio::test]
async fn test_two_rows_two_clients_each_row_once() {
    let s = setup(rows(2), fast(2));

    let summary = s.session.run().await;

    assert!(s.signal.is_raised());
    assert_eq!(summary.clients, 2);
    assert_eq!(summary.items_issued, 2);
    assert_eq!(summary.chains_completed, 2);
    assert_eq!(s.source.remaining(), 0);

    let created: Vec<String> = s
        .api
        .requests()
        .into_iter()
        .filter(|r| r.path.starts_with(&format!("{REPOS}/")))
        .map(|r| r.path)
        .collect();
    assert_eq!(created.len(), 2);
    assert!(created.contains(&format!("{REPOS}/docker-local-1")));
    assert!(created.contains(&format!("{REPOS}/docker-local-2")));

    // create_repository, validate_repository and push_image ran per row;
    // the rest skipped for lack of templates.
    assert_eq!(summary.steps_succeeded, 6);
    assert_eq!(summary.steps_skipped, 10);
    assert_eq!(summary.operations["create_repository"].total, 2);
    assert_eq!(s.sink.points().len(), 6);

    // Signal is raised: a further session starts no chain.
    let requests_before = s.api.requests().len();
    let again = s.session.run().await;
    assert_eq!(again.chains_completed, 0);
    assert_eq!(s.api.requests().len(), requests_before);
}

#[tokio::test]
async fn test_more_clients_than_rows() {
    let s = setup(rows(3), fast(8));

    let summary = s.session.run().await;

    assert_eq!(summary.chains_completed, 3);
    assert_eq!(summary.items_issued, 3);
    assert_eq!(summary.clients, 8);
}

#[tokio::test]
async fn test_empty_dataset_raises_signal_immediately() {
    let s = setup(Vec::new(), fast(4));

    let summary = s.session.run().await;

    assert!(s.signal.is_raised());
    assert_eq!(summary.clients, 0);
    assert_eq!(summary.chains_completed, 0);
    assert!(s.api.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_run_time_limit_stops_clients() {
    let config = SessionConfig {
        users: 1,
        spawn_rate: 1.0,
        pacing: Duration::from_secs(10),
        run_time: Some(Duration::from_secs(15)),
    };
    let s = setup(rows(3), config);

    let summary = s.session.run().await;

    assert!(s.signal.is_raised());
    assert_eq!(summary.chains_completed, 2);
    assert_eq!(s.source.remaining(), 1);
}
