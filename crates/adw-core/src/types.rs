use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// PhaseStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl PhaseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::InProgress => "in_progress",
            PhaseStatus::Completed => "completed",
            PhaseStatus::Failed => "failed",
            PhaseStatus::Skipped => "skipped",
        }
    }

    /// `pending → in_progress → {completed|failed}`, and `pending → skipped`.
    pub fn can_transition_to(self, target: PhaseStatus) -> bool {
        matches!(
            (self, target),
            (PhaseStatus::Pending, PhaseStatus::InProgress)
                | (PhaseStatus::Pending, PhaseStatus::Skipped)
                | (PhaseStatus::InProgress, PhaseStatus::Completed)
                | (PhaseStatus::InProgress, PhaseStatus::Failed)
        )
    }

    /// Completed or skipped: the phase's work is done.
    pub fn is_done(self) -> bool {
        matches!(self, PhaseStatus::Completed | PhaseStatus::Skipped)
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RunOutcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Running,
    Completed,
    Failed,
}

impl RunOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            RunOutcome::Running => "running",
            RunOutcome::Completed => "completed",
            RunOutcome::Failed => "failed",
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// WorkflowKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowKind {
    Plan,
    Build,
    PlanBuild,
    PlanBuildReview,
    PlanBuildShip,
    Sdlc,
}

impl WorkflowKind {
    pub fn all() -> &'static [WorkflowKind] {
        &[
            WorkflowKind::Plan,
            WorkflowKind::Build,
            WorkflowKind::PlanBuild,
            WorkflowKind::PlanBuildReview,
            WorkflowKind::PlanBuildShip,
            WorkflowKind::Sdlc,
        ]
    }

    /// Ordered phase names for this pipeline. Each name is also the name of
    /// the prompt template used for that phase.
    pub fn phases(self) -> &'static [&'static str] {
        match self {
            WorkflowKind::Plan => &["plan"],
            WorkflowKind::Build => &["build"],
            WorkflowKind::PlanBuild => &["plan", "build"],
            WorkflowKind::PlanBuildReview => &["plan", "build", "review"],
            WorkflowKind::PlanBuildShip => &["plan", "build", "ship"],
            WorkflowKind::Sdlc => &["plan", "build", "test", "review", "document", "ship"],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowKind::Plan => "plan",
            WorkflowKind::Build => "build",
            WorkflowKind::PlanBuild => "plan-build",
            WorkflowKind::PlanBuildReview => "plan-build-review",
            WorkflowKind::PlanBuildShip => "plan-build-ship",
            WorkflowKind::Sdlc => "sdlc",
        }
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkflowKind {
    type Err = crate::error::AdwError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkflowKind::all()
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| crate::error::AdwError::InvalidKind(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// Model selector passed to the agent CLI as `--model <alias>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Model {
    Sonnet,
    Opus,
}

impl Model {
    pub fn as_str(self) -> &'static str {
        match self {
            Model::Sonnet => "sonnet",
            Model::Opus => "opus",
        }
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Model {
    type Err = crate::error::AdwError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sonnet" => Ok(Model::Sonnet),
            "opus" => Ok(Model::Opus),
            _ => Err(crate::error::AdwError::InvalidModel(s.to_string())),
        }
    }
}
