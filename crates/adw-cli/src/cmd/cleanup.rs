use anyhow::Context;
use adw_core::config::Config;
use adw_core::environment::{EnvironmentPreparer, GitCli};
use adw_core::store::{FileStateStore, StateStore};
use adw_core::{paths, AdwError};
use std::path::Path;

use adw_cli::output::print_json;

/// Tear down a run's worktree and free its port slot. Works for runs whose
/// state file is gone as long as a slot marker names them.
pub fn run(root: &Path, run_id: &str, json: bool) -> anyhow::Result<()> {
    paths::validate_run_id(run_id)?;
    let config = Config::load(root).context("failed to load config")?;
    let preparer = EnvironmentPreparer::new(root, config.ports, &config.worktrees, GitCli);

    let mut removed = None;
    match FileStateStore::new(root).load(run_id) {
        Ok(run) => {
            if let Some(env) = run.environment() {
                preparer
                    .teardown(env)
                    .with_context(|| format!("failed to tear down run '{run_id}'"))?;
                removed = Some(env.path.clone());
            }
        }
        Err(AdwError::RunNotFound(_)) => {
            let orphan = preparer.preview(run_id);
            if orphan.path.exists() {
                preparer
                    .teardown(&orphan)
                    .with_context(|| format!("failed to remove {}", orphan.path.display()))?;
                removed = Some(orphan.path);
            } else {
                tracing::debug!(run_id, "no state file, releasing ports only");
            }
        }
        Err(e) => return Err(e).context(format!("failed to load run '{run_id}'")),
    }
    let released = preparer
        .release_ports(run_id)
        .context("failed to release port slots")?;

    if json {
        return print_json(&serde_json::json!({
            "run_id": run_id,
            "worktree_removed": removed,
            "slots_released": released,
        }));
    }
    match &removed {
        Some(path) => println!("Removed worktree {}", path.display()),
        None => println!("No worktree recorded for {run_id}"),
    }
    if released > 0 {
        println!("Released {released} port slot(s)");
    }
    Ok(())
}
