//! Persistence for workflow runs.
//!
//! One JSON document per run at `.adw/runs/<run_id>/state.json`. Writes go
//! through [`crate::io::atomic_write`], so a concurrent reader always sees a
//! complete document. A single writer per run is assumed; `mark_phase`
//! additionally checks the caller's expected revision so a second writer
//! surfaces as [`AdwError::StateConflict`] instead of a lost update.

use crate::error::{AdwError, Result};
use crate::paths;
use crate::run::{PhaseUpdate, WorkflowRun};
use std::path::{Path, PathBuf};

pub trait StateStore {
    /// Persist a brand-new run. Fails if the run id is already taken.
    fn create(&self, run: &WorkflowRun) -> Result<()>;

    fn load(&self, run_id: &str) -> Result<WorkflowRun>;

    /// Atomically overwrite the stored document.
    fn save(&self, run: &WorkflowRun) -> Result<()>;

    /// The single mutation entrypoint for phase state. Loads the stored run,
    /// checks `expected_revision`, applies the transition, bumps the revision
    /// and saves. Returns the updated run.
    fn mark_phase(
        &self,
        run_id: &str,
        expected_revision: u64,
        phase: &str,
        update: &PhaseUpdate,
    ) -> Result<WorkflowRun>;

    fn list(&self) -> Result<Vec<WorkflowRun>>;
}

// ---------------------------------------------------------------------------
// FileStateStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn state_path(&self, run_id: &str) -> PathBuf {
        paths::state_path(&self.root, run_id)
    }
}

impl StateStore for FileStateStore {
    fn create(&self, run: &WorkflowRun) -> Result<()> {
        paths::validate_run_id(run.run_id())?;
        if self.state_path(run.run_id()).exists() {
            return Err(AdwError::RunExists(run.run_id().to_string()));
        }
        self.save(run)
    }

    fn load(&self, run_id: &str) -> Result<WorkflowRun> {
        paths::validate_run_id(run_id)?;
        let path = self.state_path(run_id);
        let data = match std::fs::read_to_string(&path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AdwError::RunNotFound(run_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&data).map_err(|e| AdwError::StateCorrupt {
            path,
            reason: e.to_string(),
        })
    }

    fn save(&self, run: &WorkflowRun) -> Result<()> {
        paths::validate_run_id(run.run_id())?;
        crate::io::write_json(&self.state_path(run.run_id()), run)
    }

    fn mark_phase(
        &self,
        run_id: &str,
        expected_revision: u64,
        phase: &str,
        update: &PhaseUpdate,
    ) -> Result<WorkflowRun> {
        let mut run = self.load(run_id)?;
        if run.revision() != expected_revision {
            return Err(AdwError::StateConflict {
                run_id: run_id.to_string(),
                expected: expected_revision,
                found: run.revision(),
            });
        }
        run.apply(phase, update)?;
        run.bump_revision();
        self.save(&run)?;
        tracing::debug!(
            run_id,
            phase,
            status = %update.status,
            revision = run.revision(),
            "phase state saved"
        );
        Ok(run)
    }

    fn list(&self) -> Result<Vec<WorkflowRun>> {
        let dir = paths::runs_dir(&self.root);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut runs = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let run_id = entry.file_name().to_string_lossy().into_owned();
            match self.load(&run_id) {
                Ok(run) => runs.push(run),
                Err(AdwError::RunNotFound(_)) | Err(AdwError::InvalidRunId(_)) => {}
                Err(AdwError::StateCorrupt { path, reason }) => {
                    tracing::warn!(path = %path.display(), %reason, "skipping corrupt state file");
                }
                Err(e) => return Err(e),
            }
        }
        runs.sort_by_key(|r| r.started_at());
        Ok(runs)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
