//! Workflow step definitions and per-step results.

use regload_metrics::Fields;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::api::Method;
use crate::config::LoadConfig;
use crate::error::StepFailure;
use crate::workflow::classify::{self, Classifier};
use crate::workflow::context::{Requirement, WorkflowContext};
use crate::workflow::template::fill;

/// The operations of one chain, in execution order.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// PUT the repository
    CreateRepository,
    /// GET the repository list and look for the key
    ValidateRepository,
    /// info, pull, inspect, tag, push
    PushImage,
    /// POST a security policy
    CreateSecurityPolicy,
    /// POST a watch over the repository with the policy assigned
    CreateWatch,
    /// POST the watch to existing content
    ApplyWatch,
    /// POST a scan-status query for the pushed manifest
    CheckScanStatus,
    /// POST a violations query filtered by watch and artifact
    VerifyViolations,
}

impl StepKind {
    /// Operation name used in logs and metric points.
    pub fn name(&self) -> &'static str {
        match self {
            StepKind::CreateRepository => "create_repository",
            StepKind::ValidateRepository => "validate_repository",
            StepKind::PushImage => "push_image",
            StepKind::CreateSecurityPolicy => "create_security_policy",
            StepKind::CreateWatch => "create_watch",
            StepKind::ApplyWatch => "apply_watch",
            StepKind::CheckScanStatus => "check_scan_status",
            StepKind::VerifyViolations => "verify_violations",
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Builds a request body from a template and the execution context.
pub type BodyBuilder = fn(&Value, &WorkflowContext) -> Result<Value, StepFailure>;

/// A JSON body filled from a named request template.
#[derive(Debug, Clone, Copy)]
pub struct BodySpec {
    /// Template name in the requests directory.
    pub template: &'static str,
    pub build: BodyBuilder,
}

/// An HTTP call against the registry API.
#[derive(Debug, Clone, Copy)]
pub struct HttpAction {
    pub method: Method,
    /// Endpoint key in `api_config.yml`.
    pub endpoint: &'static str,
    /// Append `/<repo>` to the endpoint path.
    pub append_repo: bool,
    pub body: Option<BodySpec>,
    pub classify: Classifier,
    /// Re-send while the classifier reports a pending verdict.
    pub polls: bool,
}

#[derive(Debug, Clone, Copy)]
pub enum Action {
    Http(HttpAction),
    PushImage,
}

/// One entry of the chain table.
#[derive(Debug, Clone, Copy)]
pub struct StepDescriptor {
    pub kind: StepKind,
    /// Identifiers that must be present for the step to run.
    pub requires: &'static [Requirement],
    pub action: Action,
}

impl StepDescriptor {
    /// `request_type` tag of the emitted point.
    pub fn request_type(&self) -> &'static str {
        match &self.action {
            Action::Http(http) => http.method.as_str(),
            Action::PushImage => "docker",
        }
    }

    /// Endpoint and template entries this step needs but `config` lacks.
    pub fn missing_config(&self, config: &LoadConfig) -> Vec<String> {
        let Action::Http(http) = &self.action else {
            return Vec::new();
        };
        let mut missing = Vec::new();
        if config.api.endpoint(http.endpoint).is_none() {
            missing.push(format!("endpoint {}", http.endpoint));
        }
        if let Some(body) = &http.body {
            if config.templates.get(body.template).is_none() {
                missing.push(format!("request template {}", body.template));
            }
        }
        missing
    }
}

const REPO: &[Requirement] = &[Requirement::Repository];
const POLICY: &[Requirement] = &[Requirement::Policy];
const WATCH: &[Requirement] = &[Requirement::Watch];
const WATCH_SETUP: &[Requirement] = &[
    Requirement::Watch,
    Requirement::Repository,
    Requirement::Policy,
];
const WATCH_AND_REPO: &[Requirement] = &[Requirement::Watch, Requirement::Repository];

/// The fixed chain executed for every work item.
pub const CHAIN: [StepDescriptor; 8] = [
    StepDescriptor {
        kind: StepKind::CreateRepository,
        requires: REPO,
        action: Action::Http(HttpAction {
            method: Method::Put,
            endpoint: "create_repository",
            append_repo: true,
            body: Some(BodySpec {
                template: "create_repository",
                build: repository_body,
            }),
            classify: classify::create_repository,
            polls: false,
        }),
    },
    StepDescriptor {
        kind: StepKind::ValidateRepository,
        requires: REPO,
        action: Action::Http(HttpAction {
            method: Method::Get,
            endpoint: "check_repository",
            append_repo: false,
            body: None,
            classify: classify::validate_repository,
            polls: false,
        }),
    },
    StepDescriptor {
        kind: StepKind::PushImage,
        requires: REPO,
        action: Action::PushImage,
    },
    StepDescriptor {
        kind: StepKind::CreateSecurityPolicy,
        requires: POLICY,
        action: Action::Http(HttpAction {
            method: Method::Post,
            endpoint: "create_policy",
            append_repo: false,
            body: Some(BodySpec {
                template: "create_policy",
                build: policy_body,
            }),
            classify: classify::create_resource,
            polls: false,
        }),
    },
    StepDescriptor {
        kind: StepKind::CreateWatch,
        requires: WATCH_SETUP,
        action: Action::Http(HttpAction {
            method: Method::Post,
            endpoint: "create_watch",
            append_repo: false,
            body: Some(BodySpec {
                template: "create_watch",
                build: watch_body,
            }),
            classify: classify::create_resource,
            polls: false,
        }),
    },
    StepDescriptor {
        kind: StepKind::ApplyWatch,
        requires: WATCH,
        action: Action::Http(HttpAction {
            method: Method::Post,
            endpoint: "apply_watch",
            append_repo: false,
            body: Some(BodySpec {
                template: "apply_watch",
                build: apply_watch_body,
            }),
            classify: classify::apply_watch,
            polls: false,
        }),
    },
    StepDescriptor {
        kind: StepKind::CheckScanStatus,
        requires: REPO,
        action: Action::Http(HttpAction {
            method: Method::Post,
            endpoint: "check_scan_status",
            append_repo: false,
            body: Some(BodySpec {
                template: "check_scan_status",
                build: scan_status_body,
            }),
            classify: classify::check_scan_status,
            polls: true,
        }),
    },
    StepDescriptor {
        kind: StepKind::VerifyViolations,
        requires: WATCH_AND_REPO,
        action: Action::Http(HttpAction {
            method: Method::Post,
            endpoint: "verify_violations",
            append_repo: false,
            body: Some(BodySpec {
                template: "verify_violations",
                build: violations_body,
            }),
            classify: classify::verify_violations,
            polls: false,
        }),
    },
];

fn identifier(ctx: &WorkflowContext, requirement: Requirement) -> Result<Value, StepFailure> {
    ctx.identifier(requirement)
        .map(|v| json!(v))
        .ok_or_else(|| StepFailure::Template(format!("{} is empty", requirement.column())))
}

fn repository_body(template: &Value, ctx: &WorkflowContext) -> Result<Value, StepFailure> {
    fill(template, vec![("/key", identifier(ctx, Requirement::Repository)?)])
}

fn policy_body(template: &Value, ctx: &WorkflowContext) -> Result<Value, StepFailure> {
    fill(template, vec![("/name", identifier(ctx, Requirement::Policy)?)])
}

fn watch_body(template: &Value, ctx: &WorkflowContext) -> Result<Value, StepFailure> {
    fill(
        template,
        vec![
            ("/general_data/name", identifier(ctx, Requirement::Watch)?),
            (
                "/project_resources/resources/0/name",
                identifier(ctx, Requirement::Repository)?,
            ),
            (
                "/assigned_policies/0/name",
                identifier(ctx, Requirement::Policy)?,
            ),
        ],
    )
}

fn apply_watch_body(template: &Value, ctx: &WorkflowContext) -> Result<Value, StepFailure> {
    let watch = identifier(ctx, Requirement::Watch)?;
    fill(template, vec![("/watch_names", json!([watch]))])
}

fn scan_status_body(template: &Value, ctx: &WorkflowContext) -> Result<Value, StepFailure> {
    fill(
        template,
        vec![
            ("/repo", identifier(ctx, Requirement::Repository)?),
            ("/path", json!(ctx.artifact_path)),
        ],
    )
}

fn violations_body(template: &Value, ctx: &WorkflowContext) -> Result<Value, StepFailure> {
    fill(
        template,
        vec![
            ("/filters/watch_name", identifier(ctx, Requirement::Watch)?),
            (
                "/filters/resources/artifacts/0/repo",
                identifier(ctx, Requirement::Repository)?,
            ),
            (
                "/filters/resources/artifacts/0/path",
                json!(ctx.artifact_path),
            ),
        ],
    )
}

/// Why a step did not execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    /// A required identifier is absent or empty in the work item.
    MissingIdentifier(&'static str),
    /// Endpoint or request template not configured.
    MissingConfig(String),
    /// Completion signal raised under the halt policy.
    Stopped,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::MissingIdentifier(column) => write!(f, "missing {column}"),
            SkipReason::MissingConfig(what) => write!(f, "missing configuration: {what}"),
            SkipReason::Stopped => f.write_str("stopped"),
        }
    }
}

/// Result of one executed step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepOutcome {
    pub success: bool,
    pub duration: Duration,
    pub request_type: &'static str,
    /// Extra point fields.
    pub detail: Fields,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StepState {
    Skipped { reason: SkipReason },
    Succeeded { outcome: StepOutcome },
    Failed { outcome: StepOutcome, error: String },
}

impl StepState {
    pub fn is_success(&self) -> bool {
        matches!(self, StepState::Succeeded { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StepState::Failed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, StepState::Skipped { .. })
    }

    /// Outcome of an executed step; `None` when skipped.
    pub fn outcome(&self) -> Option<&StepOutcome> {
        match self {
            StepState::Skipped { .. } => None,
            StepState::Succeeded { outcome } | StepState::Failed { outcome, .. } => Some(outcome),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            StepState::Skipped { .. } => "skipped",
            StepState::Succeeded { .. } => "succeeded",
            StepState::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
    pub kind: StepKind,
    #[serde(flatten)]
    pub state: StepState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainState {
    Pending,
    Running,
    Complete,
}

/// Everything one chain execution produced.
#[derive(Debug, Clone, Serialize)]
pub struct ChainReport {
    pub execution_id: String,
    pub repo: Option<String>,
    pub state: ChainState,
    pub steps: Vec<StepRecord>,
    pub duration_ms: u64,
}

impl ChainReport {
    pub fn new(ctx: &WorkflowContext) -> Self {
        Self {
            execution_id: ctx.execution_id.clone(),
            repo: ctx.repo().map(str::to_string),
            state: ChainState::Pending,
            steps: Vec::with_capacity(CHAIN.len()),
            duration_ms: 0,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.steps.iter().filter(|s| s.state.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.steps.iter().filter(|s| s.state.is_failed()).count()
    }

    pub fn skipped(&self) -> usize {
        self.steps.iter().filter(|s| s.state.is_skipped()).count()
    }

    /// State of `kind`, if the chain reached it.
    pub fn state_of(&self, kind: StepKind) -> Option<&StepState> {
        self.steps.iter().find(|s| s.kind == kind).map(|s| &s.state)
    }
}
