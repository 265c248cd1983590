//! The persisted shape of one workflow run and its phases.
//!
//! `WorkflowRun` has no public mutators for phase state: every transition
//! goes through [`crate::store::StateStore::mark_phase`], which calls the
//! crate-private [`WorkflowRun::apply`] and bumps the revision.

use crate::environment::IsolatedEnvironment;
use crate::error::{AdwError, Result};
use crate::types::{Model, PhaseStatus, RunOutcome, WorkflowKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Generate a short random run id (8 lowercase hex chars).
pub fn new_run_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

// ---------------------------------------------------------------------------
// Supporting types
// ---------------------------------------------------------------------------

/// Pointer from a phase to the agent call that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRef {
    pub output_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub attempts: u32,
    pub line_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseError {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    pub status: PhaseStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation: Option<InvocationRef>,
    #[serde(default)]
    pub error: Option<PhaseError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Phase {
    fn pending(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: PhaseStatus::Pending,
            started_at: None,
            ended_at: None,
            fingerprint: None,
            invocation: None,
            error: None,
            note: None,
        }
    }
}

/// A requested phase transition plus whatever the transition records.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseUpdate {
    pub status: PhaseStatus,
    pub invocation: Option<InvocationRef>,
    pub fingerprint: Option<String>,
    pub error: Option<PhaseError>,
    pub note: Option<String>,
    /// Recorded on the run as `last_reviewed_commit_sha`.
    pub reviewed_commit: Option<String>,
}

impl PhaseUpdate {
    pub fn status(status: PhaseStatus) -> Self {
        Self {
            status,
            invocation: None,
            fingerprint: None,
            error: None,
            note: None,
            reviewed_commit: None,
        }
    }

    pub fn started() -> Self {
        Self::status(PhaseStatus::InProgress)
    }

    pub fn completed(invocation: InvocationRef, fingerprint: Option<String>) -> Self {
        Self {
            invocation: Some(invocation),
            fingerprint,
            ..Self::status(PhaseStatus::Completed)
        }
    }

    pub fn failed(kind: &str, message: impl Into<String>) -> Self {
        Self {
            error: Some(PhaseError {
                kind: kind.to_string(),
                message: message.into(),
            }),
            ..Self::status(PhaseStatus::Failed)
        }
    }

    pub fn skipped(fingerprint: Option<String>, note: impl Into<String>) -> Self {
        Self {
            fingerprint,
            note: Some(note.into()),
            ..Self::status(PhaseStatus::Skipped)
        }
    }

    /// Carry an earlier run's invocation forward onto a skipped phase.
    pub fn with_invocation(mut self, invocation: Option<InvocationRef>) -> Self {
        self.invocation = invocation;
        self
    }

    pub fn with_reviewed_commit(mut self, sha: Option<String>) -> Self {
        self.reviewed_commit = sha;
        self
    }
}

// ---------------------------------------------------------------------------
// WorkflowRun
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    run_id: String,
    kind: WorkflowKind,
    task: String,
    model: Model,
    started_at: DateTime<Utc>,
    #[serde(default)]
    current_phase: Option<String>,
    outcome: RunOutcome,
    #[serde(default)]
    revision: u64,
    phases: Vec<Phase>,
    #[serde(default)]
    environment: Option<IsolatedEnvironment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    resumed_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_reviewed_commit_sha: Option<String>,
}

impl WorkflowRun {
    /// A fresh run with every phase of `kind` pending.
    pub fn new(
        run_id: impl Into<String>,
        kind: WorkflowKind,
        task: impl Into<String>,
        model: Model,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            kind,
            task: task.into(),
            model,
            started_at: Utc::now(),
            current_phase: None,
            outcome: RunOutcome::Running,
            revision: 0,
            phases: kind.phases().iter().copied().map(Phase::pending).collect(),
            environment: None,
            source_commit: None,
            resumed_from: None,
            last_reviewed_commit_sha: None,
        }
    }

    pub fn with_environment(mut self, env: IsolatedEnvironment) -> Self {
        self.environment = Some(env);
        self
    }

    pub fn with_source_commit(mut self, sha: Option<String>) -> Self {
        self.source_commit = sha;
        self
    }

    pub fn with_resumed_from(mut self, run_id: Option<String>) -> Self {
        self.resumed_from = run_id;
        self
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn kind(&self) -> WorkflowKind {
        self.kind
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn model(&self) -> Model {
        self.model
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn current_phase(&self) -> Option<&str> {
        self.current_phase.as_deref()
    }

    pub fn outcome(&self) -> RunOutcome {
        self.outcome
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn phase(&self, name: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.name == name)
    }

    pub fn environment(&self) -> Option<&IsolatedEnvironment> {
        self.environment.as_ref()
    }

    pub fn source_commit(&self) -> Option<&str> {
        self.source_commit.as_deref()
    }

    pub fn resumed_from(&self) -> Option<&str> {
        self.resumed_from.as_deref()
    }

    pub fn last_reviewed_commit_sha(&self) -> Option<&str> {
        self.last_reviewed_commit_sha.as_deref()
    }

    /// The last phase that failed, if any.
    pub fn failed_phase(&self) -> Option<&Phase> {
        self.phases
            .iter()
            .find(|p| p.status == PhaseStatus::Failed)
    }

    // -----------------------------------------------------------------------
    // Transitions (store-only)
    // -----------------------------------------------------------------------

    pub(crate) fn apply(&mut self, phase: &str, update: &PhaseUpdate) -> Result<()> {
        let idx = self
            .phases
            .iter()
            .position(|p| p.name == phase)
            .ok_or_else(|| AdwError::UnknownPhase {
                run_id: self.run_id.clone(),
                phase: phase.to_string(),
            })?;

        let from = self.phases[idx].status;
        if !from.can_transition_to(update.status) {
            return Err(AdwError::InvalidTransition {
                phase: phase.to_string(),
                from: from.to_string(),
                to: update.status.to_string(),
            });
        }

        // Leaving `pending` requires every earlier phase to be done.
        if from == PhaseStatus::Pending {
            if let Some(blocking) = self.phases[..idx].iter().find(|p| !p.status.is_done()) {
                return Err(AdwError::OutOfOrder {
                    phase: phase.to_string(),
                    blocking: blocking.name.clone(),
                });
            }
        }

        let now = Utc::now();
        let entry = &mut self.phases[idx];
        entry.status = update.status;
        match update.status {
            PhaseStatus::InProgress => entry.started_at = Some(now),
            _ => entry.ended_at = Some(now),
        }
        if update.invocation.is_some() {
            entry.invocation = update.invocation.clone();
        }
        if update.fingerprint.is_some() {
            entry.fingerprint = update.fingerprint.clone();
        }
        if update.error.is_some() {
            entry.error = update.error.clone();
        }
        if update.note.is_some() {
            entry.note = update.note.clone();
        }
        if update.reviewed_commit.is_some() {
            self.last_reviewed_commit_sha = update.reviewed_commit.clone();
        }

        self.current_phase = Some(phase.to_string());
        self.outcome = self.derive_outcome();
        Ok(())
    }

    pub(crate) fn bump_revision(&mut self) {
        self.revision += 1;
    }

    fn derive_outcome(&self) -> RunOutcome {
        if self.phases.iter().any(|p| p.status == PhaseStatus::Failed) {
            RunOutcome::Failed
        } else if self.phases.iter().all(|p| p.status.is_done()) {
            RunOutcome::Completed
        } else {
            RunOutcome::Running
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation() -> InvocationRef {
        InvocationRef {
            output_dir: PathBuf::from("/tmp/out"),
            session_id: Some("s1".into()),
            attempts: 1,
            line_count: 3,
        }
    }

    fn run() -> WorkflowRun {
        WorkflowRun::new("a1b2c3d4", WorkflowKind::PlanBuild, "add login", Model::Sonnet)
    }

    #[test]
    fn new_run_has_pending_phases() {
        let r = run();
        assert_eq!(r.phases().len(), 2);
        assert!(r.phases().iter().all(|p| p.status == PhaseStatus::Pending));
        assert_eq!(r.outcome(), RunOutcome::Running);
        assert_eq!(r.current_phase(), None);
    }

    #[test]
    fn run_ids_are_short_hex() {
        let id = new_run_id();
        assert_eq!(id.len(), 8);
        crate::paths::validate_run_id(&id).unwrap();
        assert_ne!(new_run_id(), new_run_id());
    }

    #[test]
    fn pending_to_completed_is_rejected() {
        let mut r = run();
        let err = r
            .apply("plan", &PhaseUpdate::completed(invocation(), None))
            .unwrap_err();
        assert!(matches!(err, AdwError::InvalidTransition { .. }));
        assert_eq!(r.phase("plan").unwrap().status, PhaseStatus::Pending);
    }

    #[test]
    fn full_lifecycle_completes_run() {
        let mut r = run();
        r.apply("plan", &PhaseUpdate::started()).unwrap();
        assert_eq!(r.current_phase(), Some("plan"));
        r.apply("plan", &PhaseUpdate::completed(invocation(), Some("abc".into())))
            .unwrap();
        r.apply("build", &PhaseUpdate::started()).unwrap();
        r.apply("build", &PhaseUpdate::completed(invocation(), None))
            .unwrap();

        assert_eq!(r.outcome(), RunOutcome::Completed);
        let plan = r.phase("plan").unwrap();
        assert!(plan.started_at.is_some() && plan.ended_at.is_some());
        assert_eq!(plan.fingerprint.as_deref(), Some("abc"));
    }

    #[test]
    fn failure_marks_run_failed() {
        let mut r = run();
        r.apply("plan", &PhaseUpdate::started()).unwrap();
        r.apply("plan", &PhaseUpdate::failed("agent_timeout", "took too long"))
            .unwrap();
        assert_eq!(r.outcome(), RunOutcome::Failed);
        assert_eq!(r.failed_phase().unwrap().name, "plan");
        assert_eq!(
            r.phase("plan").unwrap().error.as_ref().unwrap().kind,
            "agent_timeout"
        );
    }

    #[test]
    fn skipped_only_from_pending() {
        let mut r = run();
        r.apply("plan", &PhaseUpdate::skipped(Some("abc".into()), "cached"))
            .unwrap();
        assert_eq!(r.phase("plan").unwrap().status, PhaseStatus::Skipped);

        r.apply("build", &PhaseUpdate::started()).unwrap();
        let err = r
            .apply("build", &PhaseUpdate::skipped(None, "late"))
            .unwrap_err();
        assert!(matches!(err, AdwError::InvalidTransition { .. }));
    }

    #[test]
    fn skipped_phase_keeps_carried_invocation() {
        let mut r = run();
        let update = PhaseUpdate::skipped(Some("abc".into()), "cached")
            .with_invocation(Some(invocation()));
        r.apply("plan", &update).unwrap();
        let plan = r.phase("plan").unwrap();
        assert_eq!(plan.invocation, Some(invocation()));
        assert_eq!(plan.fingerprint.as_deref(), Some("abc"));
    }

    #[test]
    fn phases_start_in_order() {
        let mut r = run();
        let err = r.apply("build", &PhaseUpdate::started()).unwrap_err();
        assert!(matches!(err, AdwError::OutOfOrder { .. }));
    }

    #[test]
    fn unknown_phase_is_rejected() {
        let mut r = run();
        let err = r.apply("deploy", &PhaseUpdate::started()).unwrap_err();
        assert!(matches!(err, AdwError::UnknownPhase { .. }));
    }

    #[test]
    fn reviewed_commit_recorded_on_run() {
        let mut r = WorkflowRun::new("a1b2c3d4", WorkflowKind::Plan, "t", Model::Opus);
        r.apply("plan", &PhaseUpdate::started()).unwrap();
        r.apply(
            "plan",
            &PhaseUpdate::completed(invocation(), None).with_reviewed_commit(Some("deadbeef".into())),
        )
        .unwrap();
        assert_eq!(r.last_reviewed_commit_sha(), Some("deadbeef"));
    }
}
