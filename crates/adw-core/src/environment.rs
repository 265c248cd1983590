//! Isolated environments: one git worktree plus a reserved port pair per run.
//!
//! Ports come from a fixed pool of slots; slot `i` owns
//! `(backend_base + i, frontend_base + i)`. A slot is held by a marker file
//! `.adw/ports/slot-<i>.lock` created with create-new semantics and holding
//! the owning run id. The marker is re-read after the claim so a racing
//! claimer is detected and the scan moves on.

use crate::config::{PortsConfig, WorktreeConfig};
use crate::error::{AdwError, Result};
use crate::paths;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortPair {
    pub backend: u16,
    pub frontend: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolatedEnvironment {
    pub run_id: String,
    pub path: PathBuf,
    pub branch: String,
    /// Checkout the worktree was branched from; git teardown runs there.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<PathBuf>,
    pub ports: PortPair,
    pub slot: u16,
    pub created_at: DateTime<Utc>,
}

impl IsolatedEnvironment {
    /// Variables handed to the agent process so it binds to its own ports.
    pub fn env_vars(&self) -> Vec<(String, String)> {
        vec![
            ("ADW_RUN_ID".to_string(), self.run_id.clone()),
            ("BACKEND_PORT".to_string(), self.ports.backend.to_string()),
            ("FRONTEND_PORT".to_string(), self.ports.frontend.to_string()),
        ]
    }

    fn ports_env_file(&self) -> String {
        format!(
            "BACKEND_PORT={}\nFRONTEND_PORT={}\nVITE_BACKEND_URL=http://localhost:{}\n",
            self.ports.backend, self.ports.frontend, self.ports.backend
        )
    }
}

// ---------------------------------------------------------------------------
// Vcs
// ---------------------------------------------------------------------------

/// Version-control operations the preparer consumes as opaque commands.
pub trait Vcs {
    fn create_worktree(&self, repo: &Path, path: &Path, branch: &str, base_ref: &str)
        -> Result<()>;
    fn remove_worktree(&self, repo: &Path, path: &Path) -> Result<()>;
    fn delete_branch(&self, repo: &Path, branch: &str) -> Result<()>;
    fn branch_exists(&self, repo: &Path, branch: &str) -> Result<bool>;
    /// Commit at `HEAD` of the checkout at `path`, or `None` outside a repo.
    fn head_commit(&self, path: &Path) -> Result<Option<String>>;
}

/// [`Vcs`] backed by the `git` executable.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitCli;

impl GitCli {
    fn git(dir: &Path, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .map_err(|e| AdwError::Vcs(format!("failed to run git: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AdwError::Vcs(format!(
                "git {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl Vcs for GitCli {
    fn create_worktree(
        &self,
        repo: &Path,
        path: &Path,
        branch: &str,
        base_ref: &str,
    ) -> Result<()> {
        let path_str = path.to_string_lossy();
        Self::git(repo, &["worktree", "add", "-b", branch, &path_str, base_ref])?;
        Ok(())
    }

    fn remove_worktree(&self, repo: &Path, path: &Path) -> Result<()> {
        let path_str = path.to_string_lossy();
        Self::git(repo, &["worktree", "remove", "--force", &path_str])?;
        Ok(())
    }

    fn delete_branch(&self, repo: &Path, branch: &str) -> Result<()> {
        Self::git(repo, &["branch", "-D", branch])?;
        Ok(())
    }

    fn branch_exists(&self, repo: &Path, branch: &str) -> Result<bool> {
        let refname = format!("refs/heads/{branch}");
        match Self::git(repo, &["rev-parse", "--verify", "--quiet", &refname]) {
            Ok(_) => Ok(true),
            Err(AdwError::Vcs(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn head_commit(&self, path: &Path) -> Result<Option<String>> {
        match Self::git(path, &["rev-parse", "HEAD"]) {
            Ok(sha) if !sha.is_empty() => Ok(Some(sha)),
            Ok(_) => Ok(None),
            Err(AdwError::Vcs(msg)) => {
                tracing::debug!(path = %path.display(), %msg, "no HEAD commit");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// EnvironmentPreparer
// ---------------------------------------------------------------------------

pub struct EnvironmentPreparer<V: Vcs = GitCli> {
    root: PathBuf,
    /// Checkout worktrees branch from. Defaults to `root`.
    repo: PathBuf,
    trees_dir: PathBuf,
    base_ref: String,
    ports: PortsConfig,
    vcs: V,
}

impl<V: Vcs> EnvironmentPreparer<V> {
    pub fn new(root: &Path, ports: PortsConfig, worktrees: &WorktreeConfig, vcs: V) -> Self {
        Self {
            root: root.to_path_buf(),
            repo: root.to_path_buf(),
            trees_dir: root.join(&worktrees.dir),
            base_ref: worktrees.base_ref.clone(),
            ports,
            vcs,
        }
    }

    pub fn with_repo(mut self, repo: &Path) -> Self {
        self.repo = repo.to_path_buf();
        self
    }

    pub fn repo(&self) -> &Path {
        &self.repo
    }

    pub fn vcs(&self) -> &V {
        &self.vcs
    }

    pub fn worktree_path(&self, run_id: &str) -> PathBuf {
        self.trees_dir.join(run_id)
    }

    pub fn ports_for(&self, slot: u16) -> PortPair {
        PortPair {
            backend: self.ports.backend_base.saturating_add(slot),
            frontend: self.ports.frontend_base.saturating_add(slot),
        }
    }

    /// What `prepare` would most likely hand out, without claiming anything.
    pub fn preview(&self, run_id: &str) -> IsolatedEnvironment {
        let slot = if self.ports.slots == 0 {
            0
        } else {
            start_slot(run_id, self.ports.slots)
        };
        IsolatedEnvironment {
            run_id: run_id.to_string(),
            path: self.worktree_path(run_id),
            branch: format!("adw-{run_id}"),
            repo: Some(self.repo.clone()),
            ports: self.ports_for(slot),
            slot,
            created_at: Utc::now(),
        }
    }

    /// Allocate a port slot and a fresh worktree for `run_id` branched from
    /// the configured base ref.
    pub fn prepare(&self, run_id: &str) -> Result<IsolatedEnvironment> {
        self.prepare_from(run_id, &self.base_ref)
    }

    /// Like [`prepare`](Self::prepare) but branching from `base_ref`.
    pub fn prepare_from(&self, run_id: &str, base_ref: &str) -> Result<IsolatedEnvironment> {
        paths::validate_run_id(run_id)?;
        let path = self.worktree_path(run_id);
        if path.exists() {
            return Err(AdwError::EnvironmentUnavailable(format!(
                "worktree path {} is already in use",
                path.display()
            )));
        }

        let (slot, ports) = self.claim_slot(run_id)?;
        let branch = format!("adw-{run_id}");

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if let Err(e) = self
            .vcs
            .create_worktree(&self.repo, &path, &branch, base_ref)
        {
            self.release_slot(slot, run_id)?;
            return Err(e);
        }

        let env = IsolatedEnvironment {
            run_id: run_id.to_string(),
            path,
            branch,
            repo: Some(self.repo.clone()),
            ports,
            slot,
            created_at: Utc::now(),
        };
        if let Err(e) = crate::io::atomic_write(
            &env.path.join(paths::PORTS_ENV_FILE),
            env.ports_env_file().as_bytes(),
        ) {
            if let Err(cleanup) = self.teardown(&env) {
                tracing::warn!(run_id, error = %cleanup, "teardown after failed prepare failed");
            }
            return Err(e);
        }

        tracing::info!(
            run_id,
            path = %env.path.display(),
            branch = %env.branch,
            backend_port = ports.backend,
            frontend_port = ports.frontend,
            "environment prepared"
        );
        Ok(env)
    }

    /// Remove the worktree and branch and free the port slot. Safe to call
    /// more than once. Git commands run in the checkout recorded on `env`.
    pub fn teardown(&self, env: &IsolatedEnvironment) -> Result<()> {
        let repo = env.repo.as_deref().unwrap_or(&self.repo);
        if env.path.exists() {
            if let Err(e) = self.vcs.remove_worktree(repo, &env.path) {
                tracing::warn!(path = %env.path.display(), error = %e, "worktree remove failed, deleting directory");
                std::fs::remove_dir_all(&env.path)?;
            }
        }
        match self.vcs.branch_exists(repo, &env.branch) {
            Ok(true) => {
                if let Err(e) = self.vcs.delete_branch(repo, &env.branch) {
                    tracing::warn!(branch = %env.branch, repo = %repo.display(), error = %e, "branch delete failed");
                }
            }
            Ok(false) => tracing::debug!(branch = %env.branch, "branch already gone"),
            Err(e) => tracing::warn!(branch = %env.branch, error = %e, "branch lookup failed"),
        }
        self.release_slot(env.slot, &env.run_id)?;
        tracing::info!(run_id = %env.run_id, "environment released");
        Ok(())
    }

    /// Free every port slot held by `run_id`. Returns the number released.
    pub fn release_ports(&self, run_id: &str) -> Result<usize> {
        let mut released = 0;
        for (slot, owner) in self.held_slots()? {
            if owner == run_id && self.release_slot(slot, run_id)? {
                released += 1;
            }
        }
        Ok(released)
    }

    /// Every currently claimed slot and the run id that owns it.
    pub fn held_slots(&self) -> Result<Vec<(u16, String)>> {
        let mut held = Vec::new();
        for slot in 0..self.ports.slots {
            let marker = paths::slot_marker(&self.root, slot);
            match std::fs::read_to_string(&marker) {
                Ok(owner) => held.push((slot, owner.trim().to_string())),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(held)
    }

    // -----------------------------------------------------------------------
    // Port slots
    // -----------------------------------------------------------------------

    fn claim_slot(&self, run_id: &str) -> Result<(u16, PortPair)> {
        let slots = self.ports.slots;
        if slots == 0 {
            return Err(AdwError::EnvironmentUnavailable(
                "port pool is empty".to_string(),
            ));
        }
        crate::io::ensure_dir(&paths::ports_dir(&self.root))?;

        let start = start_slot(run_id, slots);
        for offset in 0..slots {
            let slot = (start + offset) % slots;
            let marker = paths::slot_marker(&self.root, slot);
            if marker.exists() {
                continue;
            }

            let ports = self.ports_for(slot);
            if self.ports.probe && !(port_is_free(ports.backend) && port_is_free(ports.frontend)) {
                tracing::debug!(slot, ?ports, "port busy, skipping slot");
                continue;
            }

            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&marker)
            {
                Ok(mut f) => {
                    f.write_all(run_id.as_bytes())?;
                    f.sync_all()?;
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }

            // Re-check on claim.
            let owner = std::fs::read_to_string(&marker).unwrap_or_default();
            if owner.trim() != run_id {
                tracing::warn!(slot, owner = owner.trim(), run_id, "lost port slot race");
                continue;
            }
            return Ok((slot, ports));
        }

        Err(AdwError::EnvironmentUnavailable(format!(
            "all {slots} port slots starting at {} are taken",
            self.ports.backend_base
        )))
    }

    /// Remove the marker for `slot` if `run_id` still owns it.
    fn release_slot(&self, slot: u16, run_id: &str) -> Result<bool> {
        let marker = paths::slot_marker(&self.root, slot);
        let owner = match std::fs::read_to_string(&marker) {
            Ok(o) => o,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if owner.trim() != run_id {
            tracing::debug!(slot, owner = owner.trim(), run_id, "slot held by another run");
            return Ok(false);
        }
        crate::io::remove_file_if_exists(&marker)
    }
}

/// Deterministic first slot for a run, so retries of the same id tend to
/// land on the same ports.
fn start_slot(run_id: &str, slots: u16) -> u16 {
    let prefix = &run_id[..run_id.len().min(8)];
    let n = u64::from_str_radix(prefix, 16).unwrap_or(0);
    (n % u64::from(slots)) as u16
}

fn port_is_free(port: u16) -> bool {
    std::net::TcpListener::bind(("127.0.0.1", port)).is_ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
