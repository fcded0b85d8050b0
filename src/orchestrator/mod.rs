//! Application-level orchestration.
//!
//! This module owns the workflow state machine, the loop that executes its effects, and
//! post-results processing such as auto-save and exports. UI/CLI layers talk to it through
//! commands and snapshots.

mod controller;
mod post_process;
mod runtime;

pub(crate) use controller::{
    BatchOutcome, BatchResults, Command, Stage, WorkflowController, WorkflowSettings,
    WorkflowSnapshot,
};
pub(crate) use post_process::{process_batch_results, ProcessedBatch};
pub(crate) use runtime::{run_workflow, UiCommand, WorkflowEvent};
