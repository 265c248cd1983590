use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdwError {
    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("run already exists: {0}")]
    RunExists(String),

    #[error("invalid run id '{0}': must be lowercase hex")]
    InvalidRunId(String),

    #[error("state file is corrupt: {path}: {reason}")]
    StateCorrupt { path: PathBuf, reason: String },

    #[error("state conflict for run {run_id}: expected revision {expected}, found {found}")]
    StateConflict {
        run_id: String,
        expected: u64,
        found: u64,
    },

    #[error("invalid transition for phase '{phase}' from {from} to {to}")]
    InvalidTransition {
        phase: String,
        from: String,
        to: String,
    },

    #[error("phase '{phase}' cannot start before '{blocking}' is done")]
    OutOfOrder { phase: String, blocking: String },

    #[error("unknown phase '{phase}' in run {run_id}")]
    UnknownPhase { run_id: String, phase: String },

    #[error("invalid workflow kind: {0}")]
    InvalidKind(String),

    #[error("invalid model: {0} (expected sonnet or opus)")]
    InvalidModel(String),

    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("template '{template}' is malformed: {reason}")]
    MalformedTemplate { template: String, reason: String },

    #[error("template '{template}' requires variable '{variable}'")]
    MissingVariable { template: String, variable: String },

    #[error("no isolated environment available: {0}")]
    EnvironmentUnavailable(String),

    #[error("version control command failed: {0}")]
    Vcs(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl AdwError {
    /// Stable snake_case tag used in structured error output and phase records.
    pub fn kind(&self) -> &'static str {
        match self {
            AdwError::RunNotFound(_) => "run_not_found",
            AdwError::RunExists(_) => "run_exists",
            AdwError::InvalidRunId(_) => "invalid_run_id",
            AdwError::StateCorrupt { .. } => "state_corrupt",
            AdwError::StateConflict { .. } => "state_conflict",
            AdwError::InvalidTransition { .. } => "invalid_transition",
            AdwError::OutOfOrder { .. } => "out_of_order",
            AdwError::UnknownPhase { .. } => "unknown_phase",
            AdwError::InvalidKind(_) => "invalid_kind",
            AdwError::InvalidModel(_) => "invalid_model",
            AdwError::TemplateNotFound(_) => "template_not_found",
            AdwError::MalformedTemplate { .. } => "malformed_template",
            AdwError::MissingVariable { .. } => "missing_variable",
            AdwError::EnvironmentUnavailable(_) => "environment_unavailable",
            AdwError::Vcs(_) => "vcs",
            AdwError::Io(_) => "io",
            AdwError::Yaml(_) => "yaml",
            AdwError::Json(_) => "json",
        }
    }
}

pub type Result<T> = std::result::Result<T, AdwError>;
