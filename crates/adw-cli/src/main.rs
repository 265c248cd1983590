mod cmd;

use adw_cli::{root, ErrorReport, RunExit};
use adw_core::types::{Model, WorkflowKind};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "adw",
    about = "AI developer workflow orchestrator: run plan/build/review phases through a coding agent in isolated worktrees",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .adw/ or .git/)
    #[arg(long, global = true, env = "ADW_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow for a task
    Run {
        /// What the agent should accomplish
        task: String,

        /// Workflow kind: plan, build, plan-build, plan-build-review, plan-build-ship, sdlc
        #[arg(long, default_value = "plan-build")]
        kind: WorkflowKind,

        /// Model alias (default: agent.default_model from config)
        #[arg(long)]
        model: Option<Model>,

        /// Checkout to branch the worktree from (default: project root)
        #[arg(long)]
        working_dir: Option<PathBuf>,

        /// Print the composed prompts and agent command without running anything
        #[arg(long)]
        dry_run: bool,

        /// Skip phases a previous run completed at the same commit
        #[arg(long, value_name = "RUN_ID")]
        resume: Option<String>,

        /// Leave the worktree and port slot in place afterwards
        #[arg(long)]
        keep_environment: bool,

        /// Per-invocation agent timeout in seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },

    /// Show a run's persisted state
    Status { run_id: String },

    /// List runs
    List,

    /// Remove a run's worktree and release its ports
    Cleanup { run_id: String },

    /// Write .adw/ and a default config.yaml
    Init,
}

fn main() {
    // clap's own usage exit code (2) would collide with EnvironmentUnavailable.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            std::process::exit(if e.use_stderr() { 1 } else { 0 });
        }
    };

    let default_level = match &cli.command {
        Commands::Run { dry_run: false, .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Run {
            task,
            kind,
            model,
            working_dir,
            dry_run,
            resume,
            keep_environment,
            timeout,
        } => cmd::run::run(
            &root,
            cmd::run::RunArgs {
                task,
                kind,
                model,
                working_dir,
                dry_run,
                resume,
                keep_environment,
                timeout,
            },
            cli.json,
        ),
        Commands::Status { run_id } => cmd::status::run(&root, &run_id, cli.json),
        Commands::List => cmd::list::run(&root, cli.json),
        Commands::Cleanup { run_id } => cmd::cleanup::run(&root, &run_id, cli.json),
        Commands::Init => cmd::init::run(&root),
    };

    if let Err(e) = result {
        ErrorReport::from_error(&e, &root).print(cli.json);
        std::process::exit(RunExit::for_error(&e).exit_code());
    }
}
