use anyhow::Context;
use adw_core::run::WorkflowRun;
use adw_core::store::{FileStateStore, StateStore};
use std::path::Path;

use adw_cli::output::{print_fields, print_json, print_table};

pub fn run(root: &Path, run_id: &str, json: bool) -> anyhow::Result<()> {
    let run = FileStateStore::new(root)
        .load(run_id)
        .with_context(|| format!("failed to load run '{run_id}'"))?;

    if json {
        return print_json(&run);
    }
    show(&run);
    Ok(())
}

fn show(run: &WorkflowRun) {
    let mut fields = vec![
        ("Run", run.run_id().to_string()),
        ("Kind", run.kind().to_string()),
        ("Model", run.model().to_string()),
        ("Outcome", run.outcome().to_string()),
        ("Started", run.started_at().format("%Y-%m-%d %H:%M:%S").to_string()),
        ("Task", run.task().to_string()),
    ];
    if let Some(sha) = run.source_commit() {
        fields.push(("Commit", sha.to_string()));
    }
    if let Some(prev) = run.resumed_from() {
        fields.push(("Resumed", prev.to_string()));
    }
    if let Some(env) = run.environment() {
        fields.push(("Worktree", env.path.display().to_string()));
        fields.push(("Branch", env.branch.clone()));
        fields.push((
            "Ports",
            format!("backend {} / frontend {}", env.ports.backend, env.ports.frontend),
        ));
    }
    if let Some(sha) = run.last_reviewed_commit_sha() {
        fields.push(("Reviewed", sha.to_string()));
    }
    print_fields(&fields);

    println!();
    let rows = run
        .phases()
        .iter()
        .map(|p| {
            let attempts = p
                .invocation
                .as_ref()
                .map(|i| i.attempts.to_string())
                .unwrap_or_default();
            let detail = match (&p.error, &p.note) {
                (Some(err), _) => format!("{}: {}", err.kind, err.message),
                (None, Some(note)) => note.clone(),
                (None, None) => p
                    .invocation
                    .as_ref()
                    .map(|i| i.output_dir.display().to_string())
                    .unwrap_or_default(),
            };
            vec![p.name.clone(), p.status.to_string(), attempts, detail]
        })
        .collect();
    print_table(&["PHASE", "STATUS", "ATTEMPTS", "DETAIL"], rows);
}
