//! `adw` library surface: the workflow composer and CLI plumbing shared by
//! the binary and its tests.

pub mod exit;
pub mod output;
pub mod root;
pub mod workflow;

pub use exit::{ErrorReport, RunExit};
pub use workflow::{DryRunPlan, RunRequest, Workflow, WorkflowError};
