use anyhow::Context;
use adw_agent::ClaudeCli;
use adw_core::config::{Config, WarnLevel};
use adw_core::environment::{EnvironmentPreparer, GitCli};
use adw_core::run::WorkflowRun;
use adw_core::store::FileStateStore;
use adw_core::template::PromptComposer;
use adw_core::types::{Model, WorkflowKind};
use std::path::{Path, PathBuf};
use std::time::Duration;

use adw_cli::output::{print_json, print_table};
use adw_cli::workflow::{DryRunPlan, RunRequest, Workflow};

pub struct RunArgs {
    pub task: String,
    pub kind: WorkflowKind,
    pub model: Option<Model>,
    pub working_dir: Option<PathBuf>,
    pub dry_run: bool,
    pub resume: Option<String>,
    pub keep_environment: bool,
    pub timeout: Option<u64>,
}

pub fn run(root: &Path, args: RunArgs, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let warnings = config.validate();
    for w in &warnings {
        match w.level {
            WarnLevel::Error => tracing::error!("config: {}", w.message),
            WarnLevel::Warning => tracing::warn!("config: {}", w.message),
        }
    }
    if Config::has_errors(&warnings) {
        anyhow::bail!("invalid configuration in {}", adw_core::paths::config_path(root).display());
    }

    let repo = match &args.working_dir {
        Some(dir) => dir
            .canonicalize()
            .with_context(|| format!("working directory {} not found", dir.display()))?,
        None => root.to_path_buf(),
    };
    let request = RunRequest {
        task: args.task,
        kind: args.kind,
        model: args.model.unwrap_or(config.agent.default_model),
        timeout: args
            .timeout
            .map(Duration::from_secs)
            .unwrap_or_else(|| config.agent.timeout()),
        resume: args.resume,
        keep_environment: args.keep_environment,
        run_id: None,
    };

    let preparer =
        EnvironmentPreparer::new(root, config.ports.clone(), &config.worktrees, GitCli).with_repo(&repo);
    let workflow = Workflow::new(
        root,
        FileStateStore::new(root),
        ClaudeCli::new(config.agent.clone()),
        preparer,
        PromptComposer::new(root),
        config.retry.policy(),
    );

    if args.dry_run {
        let plan = workflow.plan(&request)?;
        return if json {
            print_json(&plan)
        } else {
            show_plan(&plan);
            Ok(())
        };
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let run = runtime.block_on(workflow.run(&request))?;

    if json {
        return print_json(&run);
    }
    show_summary(&run);
    Ok(())
}

fn show_plan(plan: &DryRunPlan) {
    println!("Dry run {} ({}, {})", plan.run_id, plan.kind, plan.model);
    println!("Worktree: {}", plan.working_dir.display());
    println!("Command:  {}", plan.command.join(" "));
    for phase in &plan.phases {
        println!("\n=== {} [{}] ===", phase.name, phase.variables.join(", "));
        println!("{}", phase.prompt.trim_end());
    }
}

fn show_summary(run: &WorkflowRun) {
    println!("Run {} {}", run.run_id(), run.outcome());
    let rows = run
        .phases()
        .iter()
        .map(|p| {
            vec![
                p.name.clone(),
                p.status.to_string(),
                p.invocation
                    .as_ref()
                    .map(|i| i.output_dir.display().to_string())
                    .unwrap_or_default(),
            ]
        })
        .collect();
    print_table(&["PHASE", "STATUS", "OUTPUT"], rows);
}
