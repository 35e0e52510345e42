//! regload - dataset-driven load generator for an artifact registry and its
//! security scanner
//!
//! ## Commands
//!
//! - `run`: replay the dataset through the workflow chain with N virtual
//!   clients until every row has been used
//! - `check`: load configuration, templates and dataset and report what
//!   would run

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use regload_core::{
    telemetry, CompletionSignal, ContainerTool, DockerCli, HttpRegistryApi, LoadConfig,
    LoadSession, RegistryApi, SessionConfig, SessionSummary, ShutdownPolicy, WorkItemSource,
    WorkflowRunner, CHAIN,
};
use regload_metrics::{
    AggregatorConfig, InfluxConfig, InfluxSink, LogSink, MetricsAggregator, PointSink,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "regload")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Load generator for artifact registry and security scanning APIs", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Where configuration, templates and data live.
#[derive(clap::Args, Debug, Clone)]
struct Inputs {
    /// Directory holding api_config.yml and creds.yml
    #[arg(long, env = "REGLOAD_CONFIG_DIR", default_value = "config")]
    config_dir: PathBuf,

    /// Directory holding the JSON request templates
    #[arg(long, env = "REGLOAD_REQUESTS_DIR", default_value = "requests")]
    requests_dir: PathBuf,

    /// CSV dataset with repo_name, policy_name and watch_name columns
    #[arg(long, env = "REGLOAD_DATA", default_value = "data/test_data.csv")]
    data: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the load session
    Run {
        #[command(flatten)]
        inputs: Inputs,

        /// Number of virtual clients
        #[arg(short, long, default_value = "1")]
        users: usize,

        /// Clients started per second (0 starts all at once)
        #[arg(long, default_value = "1")]
        spawn_rate: f64,

        /// Pause between two chains of one client, in milliseconds
        #[arg(long, default_value = "1000")]
        pacing_ms: u64,

        /// Stop after this many seconds even if data remains
        #[arg(long)]
        run_time_secs: Option<u64>,

        /// Skip the remaining steps of in-flight chains once the run stops
        #[arg(long)]
        halt_in_flight: bool,

        /// InfluxDB base URL; points are only logged when absent
        #[arg(long, env = "INFLUXDB_URL")]
        influx_url: Option<String>,

        /// InfluxDB database
        #[arg(long, env = "INFLUXDB_DB", default_value = "regload")]
        influx_db: String,

        /// Drop and recreate the InfluxDB database before starting
        #[arg(long)]
        reset_db: bool,

        /// Print the end-of-run summary as JSON
        #[arg(long)]
        summary_json: bool,
    },

    /// Validate configuration, templates and dataset without sending anything
    Check {
        #[command(flatten)]
        inputs: Inputs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    telemetry::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            inputs,
            users,
            spawn_rate,
            pacing_ms,
            run_time_secs,
            halt_in_flight,
            influx_url,
            influx_db,
            reset_db,
            summary_json,
        } => {
            let session = SessionConfig {
                users,
                spawn_rate,
                pacing: Duration::from_millis(pacing_ms),
                run_time: run_time_secs.map(Duration::from_secs),
            };
            let policy = if halt_in_flight {
                ShutdownPolicy::Halt
            } else {
                ShutdownPolicy::Drain
            };
            let influx = influx_url.map(|url| InfluxConfig::new(&url, &influx_db));
            let summary = cmd_run(&inputs, session, policy, influx, reset_db).await?;
            print_summary(&summary, summary_json)
        }
        Commands::Check { inputs } => cmd_check(&inputs),
    }
}

fn load_inputs(inputs: &Inputs) -> Result<(LoadConfig, WorkItemSource)> {
    let config = LoadConfig::load(&inputs.config_dir, &inputs.requests_dir).with_context(|| {
        format!(
            "Failed to load configuration from {}",
            inputs.config_dir.display()
        )
    })?;
    let source = WorkItemSource::new();
    source
        .load(&inputs.data)
        .with_context(|| format!("Failed to load dataset {}", inputs.data.display()))?;
    Ok((config, source))
}

async fn build_sink(influx: Option<InfluxConfig>, reset: bool) -> Result<Arc<dyn PointSink>> {
    let Some(influx) = influx else {
        info!("No InfluxDB URL given; points are logged at debug level");
        return Ok(Arc::new(LogSink));
    };

    let url = influx.url.clone();
    let sink = InfluxSink::new(influx).context("Failed to create InfluxDB client")?;
    if reset {
        sink.reset_database()
            .await
            .with_context(|| format!("Failed to reset InfluxDB database {}", sink.database()))?;
    }
    info!(url = %url, database = %sink.database(), "Writing points to InfluxDB");
    Ok(Arc::new(sink))
}

async fn cmd_run(
    inputs: &Inputs,
    session: SessionConfig,
    policy: ShutdownPolicy,
    influx: Option<InfluxConfig>,
    reset_db: bool,
) -> Result<SessionSummary> {
    let (config, source) = load_inputs(inputs)?;
    let sink = build_sink(influx, reset_db).await?;

    let api: Arc<dyn RegistryApi> = Arc::new(
        HttpRegistryApi::new(&config.api, &config.credentials)
            .context("Failed to create HTTP client")?,
    );
    let container: Arc<dyn ContainerTool> = Arc::new(DockerCli::new(
        &config.api.container_tool,
        config.api.container_timeout_secs,
    ));
    let metrics = Arc::new(MetricsAggregator::new(
        sink,
        AggregatorConfig {
            measurement: config.api.measurement.clone(),
            ..AggregatorConfig::default()
        },
    ));

    let runner = WorkflowRunner::new(
        api,
        container,
        metrics,
        CompletionSignal::new(),
        Arc::new(config),
    )
    .with_policy(policy);

    let session = LoadSession::new(Arc::new(source), Arc::new(runner), session);
    Ok(session.run().await)
}

fn print_summary(summary: &SessionSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!();
    println!("Clients:  {}", summary.clients);
    println!("Items:    {}", summary.items_issued);
    println!("Chains:   {}", summary.chains_completed);
    println!(
        "Steps:    {} succeeded, {} failed, {} skipped",
        summary.steps_succeeded, summary.steps_failed, summary.steps_skipped
    );
    println!("Duration: {}ms", summary.duration_ms);
    println!();

    if summary.operations.is_empty() {
        return Ok(());
    }
    println!(
        "  {:<24} {:>7} {:>7} {:>10} {:>10}",
        "operation", "total", "failed", "p95 (ms)", "p99 (ms)"
    );
    for (name, op) in &summary.operations {
        println!(
            "  {:<24} {:>7} {:>7} {:>10.1} {:>10.1}",
            name, op.total, op.failures, op.p95_ms, op.p99_ms
        );
    }
    Ok(())
}

fn cmd_check(inputs: &Inputs) -> Result<()> {
    let (config, source) = load_inputs(inputs)?;

    println!("Base URL:      {}", config.api.base_url);
    match config.api.resolve_registry_host() {
        Ok(host) => println!("Registry host: {host}"),
        Err(e) => println!("Registry host: ✗ {e}"),
    }
    match config.credentials.basic_auth() {
        Ok((user, _)) => println!("Credentials:   ✓ user {user}"),
        Err(e) => println!("Credentials:   ✗ {e}"),
    }
    println!("Dataset:       {} rows", source.loaded_count());
    println!();

    let missing = describe_steps(&config);
    for (step, problem) in &missing {
        match problem {
            None => println!("  ✓ {step}"),
            Some(problem) => println!("  ✗ {step} (will skip: {problem})"),
        }
    }
    let ready = missing.iter().filter(|(_, p)| p.is_none()).count();
    println!();
    println!("Summary: {ready}/{} steps configured", missing.len());
    Ok(())
}

/// Each chain step with the configuration it lacks, if any.
fn describe_steps(config: &LoadConfig) -> Vec<(&'static str, Option<String>)> {
    CHAIN
        .iter()
        .map(|descriptor| {
            let missing = descriptor.missing_config(config);
            let problem = (!missing.is_empty()).then(|| missing.join(", "));
            (descriptor.kind.name(), problem)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_defaults() {
        let cli = Cli::try_parse_from(["regload", "run", "--users", "5"]).unwrap();
        match cli.command {
            Commands::Run {
                inputs,
                users,
                spawn_rate,
                halt_in_flight,
                run_time_secs,
                ..
            } => {
                assert_eq!(users, 5);
                assert_eq!(spawn_rate, 1.0);
                assert!(!halt_in_flight);
                assert_eq!(run_time_secs, None);
                assert_eq!(inputs.requests_dir, PathBuf::from("requests"));
            }
            Commands::Check { .. } => panic!("expected run"),
        }
    }

    #[test]
    fn test_check_reports_missing_config() {
        use regload_core::{ApiConfig, Credentials, RequestTemplates};

        let config = LoadConfig {
            api: ApiConfig::new("https://acme.jfrog.io")
                .with_endpoint("create_repository", "/api/repositories"),
            credentials: Credentials::from_user_pass("admin", "pw"),
            templates: RequestTemplates::new()
                .with("create_repository", serde_json::json!({ "key": "" })),
        };

        let steps = describe_steps(&config);
        assert_eq!(steps.len(), 8);
        assert_eq!(steps[0], ("create_repository", None));
        assert_eq!(
            steps[1],
            ("validate_repository", Some("endpoint check_repository".to_string()))
        );
        assert_eq!(steps[2], ("push_image", None));
        assert_eq!(
            steps[3].1.as_deref(),
            Some("endpoint create_policy, request template create_policy")
        );
    }
}
