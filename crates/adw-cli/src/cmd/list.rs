use anyhow::Context;
use adw_core::store::{FileStateStore, StateStore};
use std::path::Path;

use adw_cli::output::{print_json, print_table};

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let runs = FileStateStore::new(root)
        .list()
        .context("failed to list runs")?;

    if json {
        let summaries: Vec<_> = runs
            .iter()
            .map(|r| {
                serde_json::json!({
                    "run_id": r.run_id(),
                    "kind": r.kind(),
                    "outcome": r.outcome(),
                    "current_phase": r.current_phase(),
                    "started_at": r.started_at(),
                    "task": r.task(),
                })
            })
            .collect();
        return print_json(&summaries);
    }

    if runs.is_empty() {
        println!("No runs yet.");
        return Ok(());
    }

    let rows = runs
        .iter()
        .map(|r| {
            vec![
                r.run_id().to_string(),
                r.kind().to_string(),
                r.outcome().to_string(),
                r.current_phase().unwrap_or("-").to_string(),
                r.started_at().format("%Y-%m-%d %H:%M").to_string(),
                truncate(r.task(), 48),
            ]
        })
        .collect();
    print_table(&["RUN", "KIND", "OUTCOME", "PHASE", "STARTED", "TASK"], rows);
    Ok(())
}

fn truncate(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() <= max {
        return line.to_string();
    }
    let cut: String = line.chars().take(max.saturating_sub(3)).collect();
    format!("{cut}...")
}
