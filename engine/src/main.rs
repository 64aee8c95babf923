//! Command-line front end for the plan execution engine.
//!
//! `plan-engine run` executes a plan document (a dry run unless `--execute` is
//! given) with interactive sudo and failure prompts on the terminal;
//! `plan-engine validate` only checks the document.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;

use plan_engine::core::execution::ExecutionResult;
use plan_engine::core::types::{Mode, Plan, Step};
use plan_engine::exit_codes;
use plan_engine::io::config::{DEFAULT_SETTINGS_FILE, EngineSettings, load_settings};
use plan_engine::io::executor::ShellRunner;
use plan_engine::io::plan_store::{load_plan, write_report};
use plan_engine::io::stream::{LineSink, StreamKind};
use plan_engine::io::terminal::TerminalPrompt;
use plan_engine::logging;
use plan_engine::report::render_summary;
use plan_engine::runner::{PlanRunner, RunHooks, RunnerConfig};

#[derive(Parser)]
#[command(
    name = "plan-engine",
    version,
    about = "Run install-and-start plans step by step"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a plan. Without `--execute` nothing is spawned.
    Run(RunArgs),
    /// Check a plan document without running it.
    Validate {
        /// Path to the plan JSON.
        plan: PathBuf,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// Path to the plan JSON.
    plan: PathBuf,

    /// Actually spawn the step commands.
    #[arg(long)]
    execute: bool,

    /// Base directory for step `cwd` values. Defaults to the current directory.
    #[arg(long)]
    workdir: Option<PathBuf>,

    /// Settings file. Defaults to `plan-engine.toml` in the working directory.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Do not prompt on failures; failed steps stay failed and the run continues.
    #[arg(short, long)]
    yes: bool,

    /// Run sudo steps without asking.
    #[arg(long)]
    allow_sudo: bool,

    /// Default per-step timeout in seconds.
    #[arg(long, value_name = "SECS")]
    step_timeout: Option<u64>,

    /// Budget for the whole run in seconds (0 = unbounded).
    #[arg(long, value_name = "SECS")]
    global_timeout: Option<u64>,

    /// Do not mirror step output.
    #[arg(short, long)]
    quiet: bool,

    /// Also write the execution report as JSON.
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => cmd_run(args),
        Command::Validate { plan } => cmd_validate(&plan),
    }
}

fn cmd_validate(plan_path: &Path) -> Result<i32> {
    let plan = load_plan(plan_path)?;
    println!("plan ok: {} steps", plan.steps.len());
    Ok(exit_codes::OK)
}

fn cmd_run(args: RunArgs) -> Result<i32> {
    let plan = load_plan(&args.plan)?;
    let workdir = match &args.workdir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("resolve current directory")?,
    };
    let settings_path = args
        .config
        .clone()
        .unwrap_or_else(|| workdir.join(DEFAULT_SETTINGS_FILE));
    let settings = apply_overrides(load_settings(&settings_path)?, &args);
    settings
        .validate()
        .context("validate settings with command-line overrides")?;
    debug!(settings = ?settings, "resolved settings");

    let mode = if args.execute { Mode::Execute } else { Mode::DryRun };
    let stream_output = settings.stream_output;
    let mut config = settings.into_runner_config(mode, workdir);
    config.hooks = terminal_hooks(mode, stream_output);

    let report = run_plan(&config, &plan);

    print!("{}", render_summary(&report));
    if let Some(path) = &args.report {
        write_report(path, &report)?;
    }
    Ok(exit_codes::for_report(&report))
}

fn run_plan(config: &RunnerConfig, plan: &Plan) -> ExecutionResult {
    let shell = ShellRunner::new();
    let prompt = TerminalPrompt::stdio();
    PlanRunner::new(&shell, config)
        .with_sudo_policy(&prompt)
        .with_failure_policy(&prompt)
        .run(plan)
}

fn apply_overrides(mut settings: EngineSettings, args: &RunArgs) -> EngineSettings {
    if args.yes {
        settings.auto_yes = true;
    }
    if args.allow_sudo {
        settings.allow_sudo = true;
    }
    if let Some(secs) = args.step_timeout {
        settings.step_timeout_secs = secs;
    }
    if let Some(secs) = args.global_timeout {
        settings.global_timeout_secs = secs;
    }
    if args.quiet {
        settings.stream_output = false;
    }
    settings
}

fn terminal_hooks(mode: Mode, stream_output: bool) -> RunHooks {
    let on_step_start = Arc::new(move |step: &Step| {
        let prefix = if mode == Mode::DryRun { "[dry-run] " } else { "" };
        println!("==> {prefix}{}: {}", step.id, step.label());
        if step.label() != step.cmd {
            println!("    $ {}", step.cmd);
        }
    });
    let on_output: Option<LineSink> = stream_output.then(|| {
        let sink: LineSink = Arc::new(|kind: StreamKind, line: &str| match kind {
            StreamKind::Stdout => println!("    {line}"),
            StreamKind::Stderr => eprintln!("    {line}"),
        });
        sink
    });
    RunHooks {
        on_step_start: Some(on_step_start),
        on_step_complete: None,
        on_output,
    }
}
