//! regload-core: dataset distribution, workflow chain and load session
//!
//! ## Key Components
//!
//! - `WorkItemSource`: loads the CSV dataset and hands every row to
//!   exactly one caller
//! - `WorkflowRunner`: runs the fixed registry/scanner chain for one work
//!   item with per-step failure isolation, recording into a
//!   `regload_metrics::MetricsAggregator`
//! - `CompletionSignal`: shared stop flag raised on dataset exhaustion
//! - `LoadSession`: virtual clients driving the runner until the signal
//!
//! The network and the container CLI sit behind the `RegistryApi` and
//! `ContainerTool` traits; `fakes` has in-memory versions of both.

pub mod api;
pub mod config;
pub mod container;
mod error;
pub mod fakes;
pub mod obs;
pub mod push;
pub mod session;
pub mod signal;
pub mod source;
pub mod telemetry;
pub mod workflow;

pub use api::{ApiRequest, ApiResponse, HttpRegistryApi, Method, RegistryApi};
pub use config::{ApiConfig, Credentials, ImageConfig, LoadConfig, RequestTemplates, ScanPollConfig};
pub use container::{CommandOutput, ContainerCommand, ContainerTool, DockerCli};
pub use error::{
    ConfigError, ConfigResult, ContainerError, SourceError, SourceResult, StepFailure,
    TransportError,
};
pub use obs::{
    emit_chain_complete, emit_chain_started, emit_client_stopped, emit_dataset_exhausted,
    emit_session_finished, emit_step_failed, emit_step_finished, emit_step_skipped, ChainSpan,
};
pub use push::{push_image, CredentialGuard, PushPlan, PushReport};
pub use session::{LoadSession, SessionConfig, SessionSummary, VirtualClient};
pub use signal::CompletionSignal;
pub use source::{WorkItem, WorkItemSource, REQUIRED_COLUMNS};
pub use workflow::{
    ChainReport, ChainState, ShutdownPolicy, SkipReason, StepDescriptor, StepKind, StepOutcome,
    StepState, WorkflowContext, WorkflowRunner, CHAIN,
};
