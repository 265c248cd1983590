use std::path::{Path, PathBuf};

use adw_agent::AgentError;
use adw_core::{paths, AdwError};
use serde::Serialize;

use crate::workflow::WorkflowError;

// ---------------------------------------------------------------------------
// RunExit: typed non-zero exit codes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// Usage errors and anything without a typed cause.
    Unexpected,
    EnvironmentUnavailable,
    AgentTimeout,
    AgentProcess,
    Fatal,
}

impl RunExit {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunExit::Unexpected => 1,
            RunExit::EnvironmentUnavailable => 2,
            RunExit::AgentTimeout => 3,
            RunExit::AgentProcess => 4,
            RunExit::Fatal => 5,
        }
    }

    /// Classify an error by the first typed cause found in its chain.
    pub fn for_error(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(e) = cause.downcast_ref::<WorkflowError>() {
                return match e {
                    WorkflowError::Setup(core) | WorkflowError::Phase { source: core, .. } => {
                        Self::for_core(core)
                    }
                    WorkflowError::Agent { source, .. } => Self::for_agent(source),
                };
            }
            if let Some(e) = cause.downcast_ref::<AgentError>() {
                return Self::for_agent(e);
            }
            if let Some(e) = cause.downcast_ref::<AdwError>() {
                return Self::for_core(e);
            }
        }
        RunExit::Unexpected
    }

    fn for_core(err: &AdwError) -> Self {
        match err {
            AdwError::EnvironmentUnavailable(_) => RunExit::EnvironmentUnavailable,
            _ => RunExit::Fatal,
        }
    }

    fn for_agent(err: &AgentError) -> Self {
        match err {
            AgentError::Timeout { .. } => RunExit::AgentTimeout,
            AgentError::Process { .. } => RunExit::AgentProcess,
            AgentError::Core(core) => Self::for_core(core),
            _ => RunExit::Fatal,
        }
    }
}

// ---------------------------------------------------------------------------
// ErrorReport
// ---------------------------------------------------------------------------

/// Structured failure printed to stderr.
#[derive(Debug, Serialize)]
pub struct ErrorReport {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub paths: Vec<PathBuf>,
}

impl ErrorReport {
    pub fn from_error(err: &anyhow::Error, root: &Path) -> Self {
        let mut report = ErrorReport {
            kind: "unexpected".to_string(),
            message: format!("{err:#}"),
            run_id: None,
            paths: Vec::new(),
        };

        for cause in err.chain() {
            if let Some(e) = cause.downcast_ref::<WorkflowError>() {
                report.kind = e.kind().to_string();
                if let Some(run_id) = e.run_id() {
                    report.run_id = Some(run_id.to_string());
                    report.paths.push(paths::state_path(root, run_id));
                }
                if let WorkflowError::Agent { source, .. } = e {
                    report.paths.extend(source.raw_path().map(Path::to_path_buf));
                }
                break;
            }
            if let Some(e) = cause.downcast_ref::<AgentError>() {
                report.kind = e.kind().to_string();
                report.paths.extend(e.raw_path().map(Path::to_path_buf));
                break;
            }
            if let Some(e) = cause.downcast_ref::<AdwError>() {
                report.kind = e.kind().to_string();
                if let AdwError::StateCorrupt { path, .. } = e {
                    report.paths.push(path.clone());
                }
                break;
            }
        }
        report
    }

    pub fn print(&self, json: bool) {
        if json {
            match serde_json::to_string(self) {
                Ok(line) => eprintln!("{line}"),
                Err(_) => eprintln!("error: {}", self.message),
            }
            return;
        }
        eprintln!("error[{}]: {}", self.kind, self.message);
        if let Some(run_id) = &self.run_id {
            eprintln!("  run: {run_id}");
        }
        for path in &self.paths {
            eprintln!("  see: {}", path.display());
        }
    }
}
