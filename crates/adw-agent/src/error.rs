use adw_core::retry::{classify_text, Classification, Classify};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent timed out after {seconds}s (partial transcript: {})", .raw_path.display())]
    Timeout { seconds: u64, raw_path: PathBuf },

    #[error("agent process exited with {}: {stderr}", exit_label(*.code))]
    Process {
        code: Option<i32>,
        stderr: String,
        raw_path: PathBuf,
    },

    #[error("agent output has no JSON result object (transcript: {})", .raw_path.display())]
    OutputMalformed { raw_tail: String, raw_path: PathBuf },

    #[error("agent reported an error: {message}")]
    Reported { message: String, raw_path: PathBuf },

    #[error("agent executable unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Core(#[from] adw_core::AdwError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

fn exit_label(code: Option<i32>) -> String {
    match code {
        Some(c) => format!("code {c}"),
        None => "a signal".to_string(),
    }
}

impl AgentError {
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::Timeout { .. } => "agent_timeout",
            AgentError::Process { .. } => "agent_process_error",
            AgentError::OutputMalformed { .. } => "agent_output_malformed",
            AgentError::Reported { .. } => "agent_reported_error",
            AgentError::Unavailable(_) => "agent_unavailable",
            AgentError::Core(e) => e.kind(),
            AgentError::Io(_) => "io",
            AgentError::Json(_) => "json",
        }
    }

    /// Transcript written before the failure, when there is one.
    pub fn raw_path(&self) -> Option<&Path> {
        match self {
            AgentError::Timeout { raw_path, .. }
            | AgentError::Process { raw_path, .. }
            | AgentError::OutputMalformed { raw_path, .. }
            | AgentError::Reported { raw_path, .. } => Some(raw_path),
            _ => None,
        }
    }
}

impl Classify for AgentError {
    fn classify(&self) -> Classification {
        match self {
            AgentError::Timeout { .. } => Classification::Transient("timeout".to_string()),
            AgentError::Process { stderr, .. } => classify_text(stderr),
            AgentError::Reported { message, .. } => classify_text(message),
            AgentError::OutputMalformed { .. } => {
                Classification::Fatal("malformed output".to_string())
            }
            AgentError::Unavailable(_) => {
                Classification::Fatal("agent executable missing".to_string())
            }
            AgentError::Core(e) => Classification::Fatal(e.kind().to_string()),
            AgentError::Io(_) | AgentError::Json(_) => {
                Classification::Fatal("local I/O failure".to_string())
            }
        }
    }
}
