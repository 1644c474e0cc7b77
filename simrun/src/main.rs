//! Simulation job runner.
//!
//! Runs a plan of subject × configuration jobs through an external tool with
//! bounded concurrency and fail-fast abort.

use std::io::{self, BufRead};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use simrun::core::classifier::classify;
use simrun::core::line::sanitize_line;
use simrun::exit_codes;
use simrun::io::config::{RunConfig, load_config};
use simrun::io::plan::{RunPlan, load_plan};
use simrun::observer::ConsoleObserver;
use simrun::run::{exit_code, plan_paths, run_plan};

const DEFAULT_CONFIG: &str = "simrun.toml";

#[derive(Parser)]
#[command(
    name = "simrun",
    version,
    about = "Run simulation jobs with bounded concurrency and fail-fast abort"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute every job in the plan.
    Run {
        #[command(flatten)]
        inputs: Inputs,
        /// Override `max_concurrency` from the config file.
        #[arg(long)]
        max_concurrency: Option<usize>,
        /// Override `escalate_after_secs` from the config file.
        #[arg(long)]
        escalate_after_secs: Option<u64>,
    },
    /// Validate config and plan, and print where each job would write.
    Check {
        #[command(flatten)]
        inputs: Inputs,
    },
    /// Classify output lines (stdin when none are given).
    Classify { lines: Vec<String> },
}

#[derive(clap::Args)]
struct Inputs {
    /// JSON plan with `subjects` and `configs`.
    #[arg(long)]
    plan: PathBuf,
    /// Project root containing `sub-<subject>` directories.
    #[arg(long)]
    root: PathBuf,
    /// Config file; defaults are used when it does not exist.
    #[arg(long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,
}

impl Inputs {
    fn load(&self) -> Result<(RunPlan, RunConfig)> {
        let config = load_config(&self.config)?;
        let plan = load_plan(&self.plan)?;
        Ok((plan, config))
    }
}

fn main() {
    simrun::logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            inputs,
            max_concurrency,
            escalate_after_secs,
        } => cmd_run(&inputs, max_concurrency, escalate_after_secs),
        Command::Check { inputs } => cmd_check(&inputs),
        Command::Classify { lines } => cmd_classify(&lines),
    }
}

fn cmd_run(
    inputs: &Inputs,
    max_concurrency: Option<usize>,
    escalate_after_secs: Option<u64>,
) -> Result<i32> {
    let (plan, config) = inputs.load()?;
    let config = config
        .with_overrides(max_concurrency, escalate_after_secs)
        .context("invalid command-line override")?;
    let mut observer = ConsoleObserver::stdout();
    let summary = run_plan(&inputs.root, &plan, &config, &mut observer)?;
    Ok(exit_code(&summary))
}

fn cmd_check(inputs: &Inputs) -> Result<i32> {
    let (plan, config) = inputs.load()?;
    println!(
        "max_concurrency={} escalate_after_secs={} tool={}",
        config.max_concurrency,
        config.escalate_after_secs,
        config.tool.command.join(" ")
    );
    for paths in plan_paths(&inputs.root, &plan) {
        println!(
            "{}\twork={}\toutput={}",
            paths.job_id,
            paths.work_dir.display(),
            paths.output_dir.display()
        );
    }
    Ok(exit_codes::OK)
}

fn cmd_classify(lines: &[String]) -> Result<i32> {
    if !lines.is_empty() {
        for line in lines {
            print_classified(line);
        }
        return Ok(exit_codes::OK);
    }
    for line in io::stdin().lock().lines() {
        print_classified(&line.context("read stdin")?);
    }
    Ok(exit_codes::OK)
}

fn print_classified(raw: &str) {
    if let Some(line) = sanitize_line(raw) {
        println!("{}\t{}", classify(&line), line);
    }
}
