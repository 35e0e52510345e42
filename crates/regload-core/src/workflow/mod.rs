//! The per-item workflow: a fixed chain of dependent registry operations.
//!
//! - `context`: execution id and identifiers derived from a work item
//! - `template`: JSON request-template filling
//! - `classify`: response vocabulary and per-operation classifiers
//! - `step`: the chain table and per-step/per-chain results
//! - `runner`: executes the chain with per-step failure isolation

pub mod classify;
pub mod context;
pub mod runner;
pub mod step;
pub mod template;

pub use classify::{ScanState, Verdict};
pub use context::{Requirement, WorkflowContext};
pub use runner::{ShutdownPolicy, WorkflowRunner};
pub use step::{
    ChainReport, ChainState, SkipReason, StepDescriptor, StepKind, StepOutcome, StepRecord,
    StepState, CHAIN,
};
