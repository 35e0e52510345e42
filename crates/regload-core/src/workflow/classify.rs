//! Response classification per operation.
//!
//! The phrases matched here are the upstream API's own response vocabulary
//! and must stay byte-for-byte as they are.

use regload_metrics::{FieldValue, Fields};
use serde_json::Value;

use crate::api::ApiResponse;
use crate::error::StepFailure;
use crate::workflow::context::WorkflowContext;

/// Fresh repository creation.
pub const REPOSITORY_CREATED: &str = "Successfully created repository";
/// Repository already present; counts as success.
pub const REPOSITORY_EXISTS: &str = "repository key already exists";
/// Policy or watch already present; counts as success.
pub const RESOURCE_EXISTS: &str = "already exists";
/// `overall.status` of a finished scan.
pub const SCAN_DONE: &str = "DONE";

/// Classification of a response the step accepts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Verdict {
    /// Extra point fields.
    pub detail: Fields,
    /// Set when the upstream accepted the request but the work is still in
    /// progress; carries the upstream status. A pending verdict is not a
    /// success.
    pub pending: Option<String>,
}

impl Verdict {
    pub fn accepted() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<FieldValue>) -> Self {
        self.detail.insert(key.to_string(), value.into());
        self
    }
}

/// Classifier signature shared by every HTTP step.
pub type Classifier = fn(&ApiResponse, &WorkflowContext) -> Result<Verdict, StepFailure>;

/// Scan state reported by the scan-status step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanState {
    /// `overall.status == "DONE"`
    Complete,
    /// HTTP 200 but scanning not finished; holds the upstream status.
    Accepted(String),
}

impl ScanState {
    pub fn label(&self) -> &'static str {
        match self {
            ScanState::Complete => "complete",
            ScanState::Accepted(_) => "accepted",
        }
    }
}

pub fn create_repository(
    response: &ApiResponse,
    _ctx: &WorkflowContext,
) -> Result<Verdict, StepFailure> {
    if response.body.contains(REPOSITORY_CREATED) {
        return Ok(Verdict::accepted().with("repository_state", "created"));
    }
    if response.body.contains(REPOSITORY_EXISTS) {
        return Ok(Verdict::accepted().with("repository_state", "already_exists"));
    }
    if response.status == 201 {
        return Ok(Verdict::accepted().with("repository_state", "created"));
    }
    Err(unexpected_status(response))
}

pub fn validate_repository(
    response: &ApiResponse,
    ctx: &WorkflowContext,
) -> Result<Verdict, StepFailure> {
    if response.status != 200 {
        return Err(unexpected_status(response));
    }
    let repo = ctx.repo().unwrap_or_default();
    let listing = parse(response)?;
    let repositories = listing
        .as_array()
        .ok_or_else(|| StepFailure::UnexpectedResponse("repository list is not an array".to_string()))?;

    let found = repositories
        .iter()
        .any(|r| r.get("key").and_then(Value::as_str) == Some(repo));
    if found {
        Ok(Verdict::accepted().with("repository_count", repositories.len() as u64))
    } else {
        Err(StepFailure::UnexpectedResponse(format!(
            "repository {repo} not found in the list"
        )))
    }
}

/// Policy and watch creation: any 2xx, or the idempotent "already exists".
pub fn create_resource(
    response: &ApiResponse,
    _ctx: &WorkflowContext,
) -> Result<Verdict, StepFailure> {
    if response.body.contains(RESOURCE_EXISTS) {
        return Ok(Verdict::accepted().with("resource_state", "already_exists"));
    }
    if response.is_success() {
        return Ok(Verdict::accepted().with("resource_state", "created"));
    }
    Err(unexpected_status(response))
}

pub fn apply_watch(response: &ApiResponse, _ctx: &WorkflowContext) -> Result<Verdict, StepFailure> {
    if response.is_success() {
        Ok(Verdict::accepted())
    } else {
        Err(unexpected_status(response))
    }
}

pub fn check_scan_status(
    response: &ApiResponse,
    _ctx: &WorkflowContext,
) -> Result<Verdict, StepFailure> {
    if response.status != 200 {
        return Err(unexpected_status(response));
    }
    let status = parse(response)?
        .pointer("/overall/status")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| StepFailure::UnexpectedResponse("missing overall.status".to_string()))?;

    let state = if status == SCAN_DONE {
        ScanState::Complete
    } else {
        ScanState::Accepted(status.clone())
    };

    let verdict = Verdict::accepted()
        .with("scan_status", state.label())
        .with("scan_state", status);
    Ok(match state {
        ScanState::Complete => verdict,
        ScanState::Accepted(status) => Verdict {
            pending: Some(status),
            ..verdict
        },
    })
}

pub fn verify_violations(
    response: &ApiResponse,
    _ctx: &WorkflowContext,
) -> Result<Verdict, StepFailure> {
    if response.status != 200 {
        return Err(unexpected_status(response));
    }
    let total = parse(response)?
        .get("total_violations")
        .and_then(Value::as_u64)
        .ok_or_else(|| {
            StepFailure::UnexpectedResponse("missing or invalid total_violations".to_string())
        })?;
    Ok(Verdict::accepted().with("violation_count", total))
}

fn parse(response: &ApiResponse) -> Result<Value, StepFailure> {
    response
        .json()
        .map_err(|e| StepFailure::UnexpectedResponse(format!("invalid JSON: {e}")))
}

fn unexpected_status(response: &ApiResponse) -> StepFailure {
    StepFailure::UnexpectedStatus {
        status: response.status,
        body: response.body.chars().take(300).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImageConfig;
    use crate::source::WorkItem;

    fn ctx() -> WorkflowContext {
        WorkflowContext::new(
            WorkItem::from_pairs([
                ("repo_name", "docker-local-1"),
                ("policy_name", "p1"),
                ("watch_name", "w1"),
            ]),
            &ImageConfig::default(),
        )
    }

    #[test]
    fn test_repository_exists_is_success_like_created() {
        let created = create_repository(
            &ApiResponse::new(200, "Successfully created repository 'docker-local-1'"),
            &ctx(),
        )
        .unwrap();
        let exists = create_repository(
            &ApiResponse::new(
                400,
                r#"{"errors":[{"status":400,"message":"Case insensitive repository key already exists"}]}"#,
            ),
            &ctx(),
        )
        .unwrap();

        assert!(created.pending.is_none());
        assert!(exists.pending.is_none());
        assert_eq!(exists.detail["repository_state"], FieldValue::from("already_exists"));
    }

    #[test]
    fn test_repository_other_error_fails() {
        let err = create_repository(&ApiResponse::new(403, "forbidden"), &ctx()).unwrap_err();
        assert!(matches!(err, StepFailure::UnexpectedStatus { status: 403, .. }));
    }

    #[test]
    fn test_validate_repository_finds_key() {
        let body = r#"[{"key":"other"},{"key":"docker-local-1","type":"LOCAL"}]"#;
        let verdict = validate_repository(&ApiResponse::new(200, body), &ctx()).unwrap();
        assert_eq!(verdict.detail["repository_count"], FieldValue::Int(2));

        let err = validate_repository(&ApiResponse::new(200, r#"[{"key":"other"}]"#), &ctx())
            .unwrap_err();
        assert!(err.to_string().contains("not found"));

        let err = validate_repository(&ApiResponse::new(200, "{}"), &ctx()).unwrap_err();
        assert!(matches!(err, StepFailure::UnexpectedResponse(_)));
    }

    #[test]
    fn test_create_resource_accepts_conflict_phrase() {
        assert!(create_resource(&ApiResponse::new(201, "{}"), &ctx()).is_ok());
        assert!(create_resource(
            &ApiResponse::new(409, r#"{"error":"Watch already exists"}"#),
            &ctx()
        )
        .is_ok());
        assert!(create_resource(&ApiResponse::new(500, "boom"), &ctx()).is_err());
    }

    #[test]
    fn test_scan_complete_vs_accepted() {
        let done = check_scan_status(
            &ApiResponse::new(200, r#"{"overall":{"status":"DONE","time":"2024-01-01"}}"#),
            &ctx(),
        )
        .unwrap();
        assert!(done.pending.is_none());
        assert_eq!(done.detail["scan_status"], FieldValue::from("complete"));

        let running = check_scan_status(
            &ApiResponse::new(200, r#"{"overall":{"status":"SCANNING"}}"#),
            &ctx(),
        )
        .unwrap();
        assert_eq!(running.pending.as_deref(), Some("SCANNING"));
        assert_eq!(running.detail["scan_status"], FieldValue::from("accepted"));
        assert_eq!(running.detail["scan_state"], FieldValue::from("SCANNING"));
    }

    #[test]
    fn test_scan_missing_status_is_unexpected() {
        let err = check_scan_status(&ApiResponse::new(200, "{}"), &ctx()).unwrap_err();
        assert!(matches!(err, StepFailure::UnexpectedResponse(_)));
    }

    #[test]
    fn test_violation_count() {
        let verdict = verify_violations(
            &ApiResponse::new(200, r#"{"total_violations":4,"violations":[]}"#),
            &ctx(),
        )
        .unwrap();
        assert_eq!(verdict.detail["violation_count"], FieldValue::Int(4));

        assert!(verify_violations(&ApiResponse::new(200, r#"{"violations":[]}"#), &ctx()).is_err());
        assert!(verify_violations(&ApiResponse::new(502, ""), &ctx()).is_err());
    }
}
