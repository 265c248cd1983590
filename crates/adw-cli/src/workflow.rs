//! Workflow composer: runs the phases of a workflow kind in order.
//!
//! ```text
//! prepare environment ─► create run ─► for each phase:
//!     fingerprint matches resumed run? ─► skipped
//!     in_progress ─► compose prompt ─► invoke (with retry) ─► completed | failed
//! ─► teardown (unless kept)
//! ```
//!
//! Every phase transition goes through `StateStore::mark_phase` with the
//! revision returned by the previous write.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use adw_agent::{AgentError, AgentInvocation, AgentInvoker, InvocationRequest};
use adw_core::environment::{EnvironmentPreparer, IsolatedEnvironment, Vcs};
use adw_core::retry::{run_with_retry, RetryPolicy};
use adw_core::run::{new_run_id, InvocationRef, PhaseUpdate, WorkflowRun};
use adw_core::store::StateStore;
use adw_core::template::PromptComposer;
use adw_core::types::{Model, WorkflowKind};
use adw_core::{paths, AdwError};
use serde::Serialize;
use thiserror::Error;

/// Phase whose completion records `last_reviewed_commit_sha`.
const REVIEW_PHASE: &str = "review";
const DRY_RUN_PREVIOUS_RESULT: &str = "<output of the previous phase>";

// ---------------------------------------------------------------------------
// Request / errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub task: String,
    pub kind: WorkflowKind,
    pub model: Model,
    pub timeout: Duration,
    /// Run whose completed phases may be skipped.
    pub resume: Option<String>,
    pub keep_environment: bool,
    /// Fixed id instead of a generated one.
    pub run_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Failure before the run was recorded.
    #[error(transparent)]
    Setup(#[from] AdwError),

    #[error("run {run_id}: phase '{phase}' failed")]
    Phase {
        run_id: String,
        phase: String,
        #[source]
        source: AdwError,
    },

    #[error("run {run_id}: phase '{phase}' failed after {attempts} attempt(s)")]
    Agent {
        run_id: String,
        phase: String,
        attempts: u32,
        exhausted: bool,
        #[source]
        source: AgentError,
    },
}

impl WorkflowError {
    pub fn run_id(&self) -> Option<&str> {
        match self {
            WorkflowError::Setup(_) => None,
            WorkflowError::Phase { run_id, .. } | WorkflowError::Agent { run_id, .. } => {
                Some(run_id)
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowError::Setup(e) | WorkflowError::Phase { source: e, .. } => e.kind(),
            WorkflowError::Agent { source, .. } => source.kind(),
        }
    }
}

// ---------------------------------------------------------------------------
// Dry-run plan
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct PlannedPhase {
    pub name: String,
    pub variables: Vec<String>,
    pub prompt: String,
}

#[derive(Debug, Serialize)]
pub struct DryRunPlan {
    pub run_id: String,
    pub kind: WorkflowKind,
    pub model: Model,
    pub working_dir: PathBuf,
    pub command: Vec<String>,
    pub phases: Vec<PlannedPhase>,
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

pub struct Workflow<S: StateStore, A: AgentInvoker, V: Vcs> {
    root: PathBuf,
    store: S,
    invoker: A,
    preparer: EnvironmentPreparer<V>,
    composer: PromptComposer,
    retry: RetryPolicy,
}

impl<S: StateStore, A: AgentInvoker, V: Vcs> Workflow<S, A, V> {
    pub fn new(
        root: &Path,
        store: S,
        invoker: A,
        preparer: EnvironmentPreparer<V>,
        composer: PromptComposer,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            root: root.to_path_buf(),
            store,
            invoker,
            preparer,
            composer,
            retry,
        }
    }

    /// Compose every phase prompt without allocating, writing or spawning.
    pub fn plan(&self, request: &RunRequest) -> Result<DryRunPlan, WorkflowError> {
        let run_id = request.run_id.clone().unwrap_or_else(new_run_id);
        let env = self.preparer.preview(&run_id);
        let mut phases = Vec::new();
        for &phase in request.kind.phases() {
            let vars = variables(request, &run_id, phase, &env, DRY_RUN_PREVIOUS_RESULT);
            phases.push(PlannedPhase {
                name: phase.to_string(),
                variables: self.composer.required_variables(phase)?,
                prompt: self.composer.compose(phase, &vars)?,
            });
        }
        Ok(DryRunPlan {
            run_id,
            kind: request.kind,
            model: request.model,
            working_dir: env.path,
            command: self.invoker.command_line(request.model),
            phases,
        })
    }

    pub async fn run(&self, request: &RunRequest) -> Result<WorkflowRun, WorkflowError> {
        let run_id = request.run_id.clone().unwrap_or_else(new_run_id);
        paths::validate_run_id(&run_id)?;
        let source_commit = self.preparer.vcs().head_commit(self.preparer.repo())?;
        let previous = match &request.resume {
            Some(prev) => Some(self.store.load(prev)?),
            None => None,
        };

        let env = match self.resume_base(previous.as_ref())? {
            Some(base) => self.preparer.prepare_from(&run_id, &base)?,
            None => self.preparer.prepare(&run_id)?,
        };

        let run = WorkflowRun::new(&run_id, request.kind, &request.task, request.model)
            .with_environment(env.clone())
            .with_source_commit(source_commit)
            .with_resumed_from(request.resume.clone());
        if let Err(e) = self.store.create(&run) {
            self.release(&env);
            return Err(e.into());
        }
        tracing::info!(
            run_id = %run_id,
            kind = %request.kind,
            model = %request.model,
            worktree = %env.path.display(),
            "workflow started"
        );

        let result = self.execute(run, &env, request, previous.as_ref()).await;

        if request.keep_environment {
            tracing::info!(run_id = %run_id, path = %env.path.display(), "keeping environment");
        } else {
            self.release(&env);
        }
        let run = result?;
        tracing::info!(run_id = %run_id, outcome = %run.outcome(), "workflow finished");
        Ok(run)
    }

    /// A kept branch of the resumed run carries its commits forward.
    fn resume_base(&self, previous: Option<&WorkflowRun>) -> Result<Option<String>, WorkflowError> {
        let Some(branch) = previous.and_then(|p| p.environment()).map(|e| e.branch.clone()) else {
            return Ok(None);
        };
        if self.preparer.vcs().branch_exists(self.preparer.repo(), &branch)? {
            Ok(Some(branch))
        } else {
            Ok(None)
        }
    }

    fn release(&self, env: &IsolatedEnvironment) {
        if let Err(e) = self.preparer.teardown(env) {
            tracing::warn!(run_id = %env.run_id, error = %e, "environment teardown failed");
        }
    }

    async fn execute(
        &self,
        run: WorkflowRun,
        env: &IsolatedEnvironment,
        request: &RunRequest,
        previous: Option<&WorkflowRun>,
    ) -> Result<WorkflowRun, WorkflowError> {
        let run_id = run.run_id().to_string();
        let source_commit = run.source_commit().map(str::to_string);
        let mut revision = run.revision();
        let mut current = run;
        let mut handoff = String::new();

        for &phase in request.kind.phases() {
            let phase_err = |source: AdwError| WorkflowError::Phase {
                run_id: run_id.clone(),
                phase: phase.to_string(),
                source,
            };

            if let Some(cached) = self.cached_phase(previous, phase, source_commit.as_deref()) {
                let note = format!("cached from run {} at the same commit", cached.run_id);
                let update = PhaseUpdate::skipped(source_commit.clone(), note)
                    .with_invocation(cached.invocation);
                current = self
                    .store
                    .mark_phase(&run_id, revision, phase, &update)
                    .map_err(phase_err)?;
                revision = current.revision();
                handoff = cached.handoff;
                tracing::info!(run_id = %run_id, phase, resumed_from = %cached.run_id, "phase skipped");
                continue;
            }

            revision = self
                .store
                .mark_phase(&run_id, revision, phase, &PhaseUpdate::started())
                .map_err(phase_err)?
                .revision();
            tracing::info!(run_id = %run_id, phase, "phase started");

            let vars = variables(request, &run_id, phase, env, &handoff);
            let prompt = match self.composer.compose(phase, &vars) {
                Ok(p) => p,
                Err(e) => {
                    self.store
                        .mark_phase(
                            &run_id,
                            revision,
                            phase,
                            &PhaseUpdate::failed(e.kind(), e.to_string()),
                        )
                        .map_err(phase_err)?;
                    return Err(phase_err(e));
                }
            };

            match self.invoke_with_retry(&run_id, phase, prompt, env, request).await {
                Ok((invocation, attempts)) => {
                    let reference = InvocationRef {
                        output_dir: invocation.output_dir.clone(),
                        session_id: invocation.session_id.clone(),
                        attempts,
                        line_count: invocation.line_count,
                    };
                    let mut update = PhaseUpdate::completed(reference, source_commit.clone());
                    if phase == REVIEW_PHASE {
                        let reviewed = self
                            .preparer
                            .vcs()
                            .head_commit(&env.path)
                            .ok()
                            .flatten()
                            .or_else(|| source_commit.clone());
                        update = update.with_reviewed_commit(reviewed);
                    }
                    current = self
                        .store
                        .mark_phase(&run_id, revision, phase, &update)
                        .map_err(phase_err)?;
                    revision = current.revision();
                    handoff = invocation.handoff_text();
                    tracing::info!(run_id = %run_id, phase, attempts, "phase completed");
                }
                Err((error, attempts, exhausted)) => {
                    let message = if exhausted {
                        format!("gave up after {attempts} attempt(s): {error}")
                    } else {
                        error.to_string()
                    };
                    self.store
                        .mark_phase(
                            &run_id,
                            revision,
                            phase,
                            &PhaseUpdate::failed(error.kind(), message),
                        )
                        .map_err(phase_err)?;
                    tracing::error!(run_id = %run_id, phase, attempts, error = %error, "phase failed");
                    return Err(WorkflowError::Agent {
                        run_id,
                        phase: phase.to_string(),
                        attempts,
                        exhausted,
                        source: error,
                    });
                }
            }
        }

        Ok(current)
    }

    /// The resumed run's record of `phase`, when that run completed or
    /// itself skipped it against the current source commit.
    fn cached_phase(
        &self,
        previous: Option<&WorkflowRun>,
        phase: &str,
        source_commit: Option<&str>,
    ) -> Option<CachedPhase> {
        let previous = previous?;
        let commit = source_commit?;
        let recorded = previous.phase(phase)?;
        if !recorded.status.is_done() || recorded.fingerprint.as_deref() != Some(commit) {
            return None;
        }
        let handoff = recorded
            .invocation
            .as_ref()
            .and_then(|inv| read_handoff(&inv.output_dir))
            .unwrap_or_default();
        Some(CachedPhase {
            run_id: previous.run_id().to_string(),
            invocation: recorded.invocation.clone(),
            handoff,
        })
    }

    async fn invoke_with_retry(
        &self,
        run_id: &str,
        phase: &str,
        prompt: String,
        env: &IsolatedEnvironment,
        request: &RunRequest,
    ) -> Result<(AgentInvocation, u32), (AgentError, u32, bool)> {
        let invoker = &self.invoker;
        let root = &self.root;
        let prompt = &prompt;
        let outcome = run_with_retry(&self.retry, move |attempt| {
            let req = InvocationRequest {
                prompt: prompt.clone(),
                model: request.model,
                working_dir: env.path.clone(),
                timeout: request.timeout,
                output_dir: paths::invocation_dir(root, run_id, phase, attempt),
                attempt,
                env: env.env_vars(),
            };
            async move { invoker.invoke(&req).await }
        })
        .await;

        match outcome {
            Ok(done) => Ok((done.value, done.attempts)),
            Err(failure) => {
                let attempts = failure.attempts();
                let exhausted = failure.is_exhausted();
                Err((failure.into_error(), attempts, exhausted))
            }
        }
    }
}

/// A phase reused from the resumed run.
struct CachedPhase {
    run_id: String,
    /// The agent call that originally produced the phase, carried forward so
    /// later resumes can still read its result.
    invocation: Option<InvocationRef>,
    handoff: String,
}

fn variables(
    request: &RunRequest,
    run_id: &str,
    phase: &str,
    env: &IsolatedEnvironment,
    previous_result: &str,
) -> HashMap<String, String> {
    [
        ("task", request.task.clone()),
        ("run_id", run_id.to_string()),
        ("phase", phase.to_string()),
        ("branch", env.branch.clone()),
        ("working_dir", env.path.display().to_string()),
        ("backend_port", env.ports.backend.to_string()),
        ("frontend_port", env.ports.frontend.to_string()),
        ("previous_result", previous_result.to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

fn read_handoff(output_dir: &Path) -> Option<String> {
    let text = std::fs::read_to_string(output_dir.join(paths::RESULT_FILE)).ok()?;
    let value: serde_json::Value = serde_json::from_str(&text).ok()?;
    match value.get("result") {
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        _ => Some(value.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use adw_core::config::{PortsConfig, WorktreeConfig};
    use adw_core::store::FileStateStore;
    use adw_core::types::{PhaseStatus, RunOutcome};
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use tempfile::TempDir;

    // ----- doubles -----

    /// Plain directories instead of git worktrees, with a fixed HEAD.
    struct DirVcs {
        head: Option<String>,
    }

    impl Vcs for DirVcs {
        fn create_worktree(&self, _repo: &Path, path: &Path, _b: &str, _r: &str) -> adw_core::Result<()> {
            std::fs::create_dir_all(path)?;
            Ok(())
        }

        fn remove_worktree(&self, _repo: &Path, path: &Path) -> adw_core::Result<()> {
            std::fs::remove_dir_all(path)?;
            Ok(())
        }

        fn delete_branch(&self, _repo: &Path, _branch: &str) -> adw_core::Result<()> {
            Ok(())
        }

        fn branch_exists(&self, _repo: &Path, _branch: &str) -> adw_core::Result<bool> {
            Ok(false)
        }

        fn head_commit(&self, _path: &Path) -> adw_core::Result<Option<String>> {
            Ok(self.head.clone())
        }
    }

    enum Scripted {
        Ok(&'static str),
        Timeout,
        RateLimited,
        BadKey,
    }

    /// Replays scripted outcomes; succeeds with `{"result":"hello"}` once
    /// the script runs out.
    struct StubInvoker {
        script: RefCell<VecDeque<Scripted>>,
        calls: Cell<u32>,
        prompts: RefCell<Vec<String>>,
    }

    impl StubInvoker {
        fn new(script: Vec<Scripted>) -> Self {
            Self {
                script: RefCell::new(script.into()),
                calls: Cell::new(0),
                prompts: RefCell::new(Vec::new()),
            }
        }
    }

    impl AgentInvoker for StubInvoker {
        async fn invoke(&self, request: &InvocationRequest) -> adw_agent::Result<AgentInvocation> {
            self.calls.set(self.calls.get() + 1);
            self.prompts.borrow_mut().push(request.prompt.clone());
            adw_core::io::ensure_dir(&request.output_dir)?;
            let raw_path = request.output_dir.join(paths::RAW_OUTPUT_FILE);
            let next = self.script.borrow_mut().pop_front();
            let text = match next.unwrap_or(Scripted::Ok("hello")) {
                Scripted::Ok(text) => text,
                Scripted::Timeout => {
                    return Err(AgentError::Timeout {
                        seconds: 1,
                        raw_path,
                    })
                }
                Scripted::RateLimited => {
                    return Err(AgentError::Process {
                        code: Some(1),
                        stderr: "API Error: 429 rate limit exceeded".into(),
                        raw_path,
                    })
                }
                Scripted::BadKey => {
                    return Err(AgentError::Process {
                        code: Some(1),
                        stderr: "Invalid API key".into(),
                        raw_path,
                    })
                }
            };
            let result = serde_json::json!({ "result": text });
            let summary = serde_json::json!({ "excerpt": text });
            std::fs::write(&raw_path, format!("{result}\n"))?;
            adw_agent::invoker::write_records(&request.output_dir, &result, &summary)?;
            Ok(AgentInvocation {
                prompt: request.prompt.clone(),
                model: request.model,
                output_dir: request.output_dir.clone(),
                raw_path,
                line_count: 1,
                result,
                summary,
                session_id: None,
                attempt: request.attempt,
            })
        }

        fn command_line(&self, model: Model) -> Vec<String> {
            vec!["stub".to_string(), model.to_string()]
        }
    }

    // ----- helpers -----

    fn instant_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::ZERO,
            multiplier: 2.0,
            max_delay: Duration::ZERO,
        }
    }

    fn workflow(
        dir: &TempDir,
        invoker: StubInvoker,
        head: Option<&str>,
    ) -> Workflow<FileStateStore, StubInvoker, DirVcs> {
        let ports = PortsConfig {
            slots: 3,
            probe: false,
            ..PortsConfig::default()
        };
        let preparer = EnvironmentPreparer::new(
            dir.path(),
            ports,
            &WorktreeConfig::default(),
            DirVcs {
                head: head.map(str::to_string),
            },
        );
        Workflow::new(
            dir.path(),
            FileStateStore::new(dir.path()),
            invoker,
            preparer,
            PromptComposer::new(dir.path()),
            instant_retry(),
        )
    }

    fn request(kind: WorkflowKind, run_id: &str) -> RunRequest {
        RunRequest {
            task: "echo hello".to_string(),
            kind,
            model: Model::Sonnet,
            timeout: Duration::from_secs(5),
            resume: None,
            keep_environment: false,
            run_id: Some(run_id.to_string()),
        }
    }

    fn override_template(dir: &TempDir, name: &str, body: &str) {
        let path = paths::template_path(dir.path(), name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    fn no_slots_held(dir: &TempDir) -> bool {
        !paths::ports_dir(dir.path()).exists()
            || std::fs::read_dir(paths::ports_dir(dir.path()))
                .unwrap()
                .next()
                .is_none()
    }

    // ----- tests -----

    #[tokio::test]
    async fn single_phase_end_to_end() {
        let dir = TempDir::new().unwrap();
        override_template(&dir, "plan", "Run the task exactly as written.");
        let wf = workflow(&dir, StubInvoker::new(vec![]), Some("c0ffee"));

        let run = wf
            .run(&request(WorkflowKind::Plan, "aaaa0001"))
            .await
            .unwrap();
        assert_eq!(run.outcome(), RunOutcome::Completed);

        let stored = FileStateStore::new(dir.path()).load("aaaa0001").unwrap();
        assert_eq!(stored.phases().len(), 1);
        let plan = stored.phase("plan").unwrap();
        assert_eq!(plan.status, PhaseStatus::Completed);
        assert_eq!(plan.fingerprint.as_deref(), Some("c0ffee"));
        let inv = plan.invocation.as_ref().unwrap();
        assert_eq!(inv.attempts, 1);
        assert_eq!(
            inv.output_dir,
            paths::invocation_dir(dir.path(), "aaaa0001", "plan", 1)
        );
        assert!(inv.output_dir.join(paths::RESULT_FILE).exists());

        // environment released
        assert!(!stored.environment().unwrap().path.exists());
        assert!(no_slots_held(&dir));
    }

    #[tokio::test]
    async fn previous_result_is_handed_to_next_phase() {
        let dir = TempDir::new().unwrap();
        override_template(&dir, "plan", "plan {{ task }}");
        override_template(&dir, "build", "build using: {{ previous_result }}");
        let wf = workflow(
            &dir,
            StubInvoker::new(vec![Scripted::Ok("the plan")]),
            Some("c0ffee"),
        );

        wf.run(&request(WorkflowKind::PlanBuild, "aaaa0002"))
            .await
            .unwrap();
        let prompts = wf.invoker.prompts.borrow();
        assert_eq!(prompts[0], "plan echo hello");
        assert_eq!(prompts[1], "build using: the plan");
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let dir = TempDir::new().unwrap();
        let wf = workflow(
            &dir,
            StubInvoker::new(vec![Scripted::RateLimited, Scripted::Timeout]),
            None,
        );

        let run = wf
            .run(&request(WorkflowKind::Plan, "aaaa0003"))
            .await
            .unwrap();
        let plan = run.phase("plan").unwrap();
        assert_eq!(plan.status, PhaseStatus::Completed);
        assert_eq!(plan.invocation.as_ref().unwrap().attempts, 3);
        assert_eq!(wf.invoker.calls.get(), 3);
        assert!(paths::invocation_dir(dir.path(), "aaaa0003", "plan", 2).is_dir());
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_run() {
        let dir = TempDir::new().unwrap();
        let wf = workflow(
            &dir,
            StubInvoker::new(vec![Scripted::Timeout, Scripted::Timeout, Scripted::Timeout]),
            None,
        );

        let err = wf
            .run(&request(WorkflowKind::PlanBuild, "aaaa0004"))
            .await
            .unwrap_err();
        match &err {
            WorkflowError::Agent {
                phase,
                attempts,
                exhausted,
                source,
                ..
            } => {
                assert_eq!(phase, "plan");
                assert_eq!(*attempts, 3);
                assert!(*exhausted);
                assert!(matches!(source, AgentError::Timeout { .. }));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(wf.invoker.calls.get(), 3);

        let stored = FileStateStore::new(dir.path()).load("aaaa0004").unwrap();
        assert_eq!(stored.outcome(), RunOutcome::Failed);
        let plan = stored.phase("plan").unwrap();
        assert_eq!(plan.status, PhaseStatus::Failed);
        assert_eq!(plan.error.as_ref().unwrap().kind, "agent_timeout");
        assert_eq!(stored.phase("build").unwrap().status, PhaseStatus::Pending);
        assert!(no_slots_held(&dir));
    }

    #[tokio::test]
    async fn fatal_error_is_not_retried() {
        let dir = TempDir::new().unwrap();
        let wf = workflow(&dir, StubInvoker::new(vec![Scripted::BadKey]), None);
        let err = wf
            .run(&request(WorkflowKind::Plan, "aaaa0005"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Agent {
                attempts: 1,
                exhausted: false,
                ..
            }
        ));
        assert_eq!(wf.invoker.calls.get(), 1);
    }

    #[tokio::test]
    async fn missing_variable_fails_phase_without_invoking() {
        let dir = TempDir::new().unwrap();
        override_template(&dir, "plan", "needs {{ ticket_url }}");
        let wf = workflow(&dir, StubInvoker::new(vec![]), None);

        let err = wf
            .run(&request(WorkflowKind::Plan, "aaaa0006"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "missing_variable");
        assert_eq!(wf.invoker.calls.get(), 0);
        let stored = FileStateStore::new(dir.path()).load("aaaa0006").unwrap();
        assert_eq!(stored.phase("plan").unwrap().status, PhaseStatus::Failed);
    }

    #[tokio::test]
    async fn resume_skips_phases_completed_at_same_commit() {
        let dir = TempDir::new().unwrap();
        let first = workflow(&dir, StubInvoker::new(vec![]), Some("c0ffee"));
        first
            .run(&request(WorkflowKind::PlanBuild, "aaaa0007"))
            .await
            .unwrap();

        override_template(&dir, "review", "review: {{ previous_result }}");
        let second = workflow(&dir, StubInvoker::new(vec![]), Some("c0ffee"));
        let mut req = request(WorkflowKind::PlanBuildReview, "aaaa0008");
        req.resume = Some("aaaa0007".to_string());
        let run = second.run(&req).await.unwrap();

        assert_eq!(run.phase("plan").unwrap().status, PhaseStatus::Skipped);
        assert_eq!(run.phase("build").unwrap().status, PhaseStatus::Skipped);
        assert_eq!(run.phase("review").unwrap().status, PhaseStatus::Completed);
        assert_eq!(run.resumed_from(), Some("aaaa0007"));
        assert_eq!(run.last_reviewed_commit_sha(), Some("c0ffee"));
        assert_eq!(run.outcome(), RunOutcome::Completed);
        assert_eq!(second.invoker.calls.get(), 1);
        assert_eq!(second.invoker.prompts.borrow()[0], "review: hello");
    }

    #[tokio::test]
    async fn chained_resume_reuses_skipped_phases() {
        let dir = TempDir::new().unwrap();
        override_template(&dir, "build", "build from: {{ previous_result }}");
        let first = workflow(
            &dir,
            StubInvoker::new(vec![Scripted::Ok("the plan")]),
            Some("c0ffee"),
        );
        first
            .run(&request(WorkflowKind::Plan, "aaaa0011"))
            .await
            .unwrap();

        let second = workflow(&dir, StubInvoker::new(vec![]), Some("c0ffee"));
        let mut req = request(WorkflowKind::Plan, "aaaa0012");
        req.resume = Some("aaaa0011".to_string());
        let run = second.run(&req).await.unwrap();
        let skipped = run.phase("plan").unwrap();
        assert_eq!(skipped.status, PhaseStatus::Skipped);
        assert_eq!(
            skipped.invocation.as_ref().unwrap().output_dir,
            paths::invocation_dir(dir.path(), "aaaa0011", "plan", 1)
        );
        assert_eq!(second.invoker.calls.get(), 0);

        let third = workflow(&dir, StubInvoker::new(vec![]), Some("c0ffee"));
        let mut req = request(WorkflowKind::PlanBuild, "aaaa0013");
        req.resume = Some("aaaa0012".to_string());
        let run = third.run(&req).await.unwrap();
        assert_eq!(run.phase("plan").unwrap().status, PhaseStatus::Skipped);
        assert_eq!(run.phase("build").unwrap().status, PhaseStatus::Completed);
        assert_eq!(third.invoker.calls.get(), 1);
        assert_eq!(third.invoker.prompts.borrow()[0], "build from: the plan");
    }

    #[tokio::test]
    async fn resume_reruns_when_commit_changed() {
        let dir = TempDir::new().unwrap();
        let first = workflow(&dir, StubInvoker::new(vec![]), Some("c0ffee"));
        first
            .run(&request(WorkflowKind::Plan, "aaaa0009"))
            .await
            .unwrap();

        let second = workflow(&dir, StubInvoker::new(vec![]), Some("decade"));
        let mut req = request(WorkflowKind::Plan, "aaaa000a");
        req.resume = Some("aaaa0009".to_string());
        let run = second.run(&req).await.unwrap();
        assert_eq!(run.phase("plan").unwrap().status, PhaseStatus::Completed);
        assert_eq!(second.invoker.calls.get(), 1);
    }

    #[tokio::test]
    async fn resume_of_unknown_run_fails_before_allocating() {
        let dir = TempDir::new().unwrap();
        let wf = workflow(&dir, StubInvoker::new(vec![]), None);
        let mut req = request(WorkflowKind::Plan, "aaaa000b");
        req.resume = Some("ffff0000".to_string());
        let err = wf.run(&req).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Setup(AdwError::RunNotFound(_))));
        assert!(no_slots_held(&dir));
    }

    #[tokio::test]
    async fn keep_environment_leaves_worktree() {
        let dir = TempDir::new().unwrap();
        let wf = workflow(&dir, StubInvoker::new(vec![]), None);
        let mut req = request(WorkflowKind::Plan, "aaaa000c");
        req.keep_environment = true;
        let run = wf.run(&req).await.unwrap();
        assert!(run.environment().unwrap().path.is_dir());
        assert!(!no_slots_held(&dir));
    }

    #[test]
    fn dry_run_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let wf = workflow(&dir, StubInvoker::new(vec![]), None);
        let plan = wf
            .plan(&request(WorkflowKind::Sdlc, "aaaa000d"))
            .unwrap();

        assert_eq!(plan.phases.len(), 6);
        assert_eq!(plan.command, vec!["stub", "sonnet"]);
        assert!(plan.phases[0].prompt.contains("echo hello"));
        assert!(plan.phases[1].prompt.contains(DRY_RUN_PREVIOUS_RESULT));
        assert!(!dir.path().join(paths::ADW_DIR).exists());
        assert_eq!(wf.invoker.calls.get(), 0);
    }
}
