//! Sweep Runner Binary
//!
//! Expands YAML parameter sweeps and dispatches them to a backtesting
//! endpoint.
//!
//! # Usage
//!
//! ```bash
//! sweep-runner expand --in sweeps/pmm_dynamic_2_sweep.yml --out payloads.json
//! sweep-runner dispatch --file payloads.json --workers 4
//! sweep-runner run --sweeps sweeps/ --controller-type market_making
//! sweep-runner lint sweeps/
//! ```
//!
//! # Environment Variables
//!
//! - `HB_API`, `HB_USER`, `HB_PASS`: endpoint base URL and credentials
//! - `HB_SCHEMA`: controller blueprint for schema validation
//! - `HB_DETAIL_DIR`: detail packet root
//! - `RUST_LOG`: log filter (default: `sweep_runner=info`)
//!
//! # Exit Codes
//!
//! - 0: batch finished (individual configurations may have failed)
//! - 1: fatal error
//! - 2: `lint` found invalid sweep files

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use sweep_runner::config::{RunnerConfig, load_config, validate_config};
use sweep_runner::dispatch::{BatchReport, DispatchOptions, Dispatcher, HttpBacktestClient};
use sweep_runner::metrics::{MetricsConfig, init_metrics};
use sweep_runner::sweep::{
    Expander, GeneratedConfiguration, ParamMap, SweepDefinition, discover_sweep_files, lint_paths,
    load_meta_overrides, load_sweeps, read_payloads, write_payloads,
};
use sweep_runner::telemetry::{TelemetryConfig, init_telemetry};

/// Exit code when `lint` finds invalid files.
const LINT_FAILURE: u8 = 2;

#[derive(Debug, Parser)]
#[command(name = "sweep-runner", version, about = "Expand parameter sweeps and run them as backtests")]
struct Cli {
    /// Runner config file (default: runner.yaml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Expand one sweep file into a payload file
    Expand(ExpandArgs),
    /// Dispatch a payload file
    Dispatch(DispatchArgs),
    /// Expand sweep files and dispatch them as one batch
    Run(RunArgs),
    /// Expand sweep files without dispatching and report problems
    Lint {
        /// Sweep files or directories
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

#[derive(Debug, Args)]
struct ExpandArgs {
    /// Sweep definition
    #[arg(long = "in")]
    input: PathBuf,
    /// Payload file to write
    #[arg(long)]
    out: PathBuf,
    /// Meta overrides merged before expansion
    #[arg(long)]
    meta_file: Option<PathBuf>,
    /// Skip blueprint validation
    #[arg(long)]
    no_schema: bool,
    /// Sweep name used in labels
    #[arg(long)]
    name: Option<String>,
}

#[derive(Debug, Args)]
struct BatchArgs {
    /// Maximum requests in flight
    #[arg(long)]
    workers: Option<usize>,
    /// Retries after the first attempt
    #[arg(long)]
    retries: Option<u32>,
    /// Summary CSV
    #[arg(long)]
    outfile: Option<PathBuf>,
    /// Run identifier (default: <mode>_<YYYY-MM-DD_HHMMSS>)
    #[arg(long)]
    run_id: Option<String>,
    /// Only the first configuration of each sweep
    #[arg(long)]
    single_run: bool,
}

#[derive(Debug, Args)]
struct DispatchArgs {
    /// Payload file written by `expand`
    #[arg(long)]
    file: PathBuf,
    #[command(flatten)]
    batch: BatchArgs,
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Directory of sweep files
    #[arg(long, conflicts_with = "input", required_unless_present = "input")]
    sweeps: Option<PathBuf>,
    /// Sweep files
    #[arg(long = "in", num_args = 1..)]
    input: Vec<PathBuf>,
    /// Keep only sweeps whose base.controller_type matches
    #[arg(long)]
    controller_type: Option<String>,
    /// Meta overrides merged before expansion
    #[arg(long)]
    meta_file: Option<PathBuf>,
    /// Run mode, used in the default run identifier
    #[arg(long, default_value = "run")]
    mode: String,
    /// Skip blueprint validation
    #[arg(long)]
    no_schema: bool,
    #[command(flatten)]
    batch: BatchArgs,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let _ = dotenvy::dotenv();
    let _telemetry = init_telemetry(&TelemetryConfig::from_env());

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = format!("{e:#}"), "Fatal error");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = load_config(cli.config.as_deref()).context("loading runner config")?;

    match cli.command {
        Command::Expand(args) => expand_command(&config, args),
        Command::Dispatch(args) => {
            let configurations = read_payloads(&args.file)
                .with_context(|| format!("reading payloads from {}", args.file.display()))?;
            dispatch_batch(config, configurations, &args.batch, "dispatch").await
        }
        Command::Run(args) => {
            let configurations = expand_for_run(&config, &args)?;
            dispatch_batch(config, configurations, &args.batch, &args.mode).await
        }
        Command::Lint { paths } => lint_command(&config, &paths),
    }
}

fn meta_overrides(path: Option<&Path>) -> anyhow::Result<Option<ParamMap>> {
    path.map(|p| {
        load_meta_overrides(p).with_context(|| format!("reading meta file {}", p.display()))
    })
    .transpose()
}

fn expand_command(config: &RunnerConfig, args: ExpandArgs) -> anyhow::Result<ExitCode> {
    let mut definition = SweepDefinition::from_path(&args.input)?;
    if let Some(name) = args.name {
        definition.name = name;
    }
    if let Some(overrides) = meta_overrides(args.meta_file.as_deref())? {
        definition.apply_overrides(&overrides)?;
    }

    let options = config.expand_options(!args.no_schema)?;
    let configurations = Expander::new(options).expand(&definition)?;
    write_payloads(&args.out, &configurations)?;

    tracing::info!(
        sweep = %definition.name,
        configurations = configurations.len(),
        out = %args.out.display(),
        "Wrote payloads"
    );
    println!("{} configurations written to {}", configurations.len(), args.out.display());
    Ok(ExitCode::SUCCESS)
}

fn expand_for_run(config: &RunnerConfig, args: &RunArgs) -> anyhow::Result<Vec<GeneratedConfiguration>> {
    let paths = match &args.sweeps {
        Some(dir) => discover_sweep_files(dir)?,
        None => args.input.clone(),
    };
    let overrides = meta_overrides(args.meta_file.as_deref())?;
    let definitions = load_sweeps(&paths, overrides.as_ref(), args.controller_type.as_deref())?;
    if definitions.is_empty() {
        bail!("no sweep files selected");
    }

    let mut expander = Expander::new(config.expand_options(!args.no_schema)?);
    let mut configurations = Vec::new();
    for definition in &definitions {
        let expanded = expander.expand(definition)?;
        tracing::info!(sweep = %definition.name, configurations = expanded.len(), "Expanded sweep");
        configurations.extend(expanded);
    }
    Ok(configurations)
}

fn lint_command(config: &RunnerConfig, paths: &[PathBuf]) -> anyhow::Result<ExitCode> {
    let reports = lint_paths(paths, &config.expand_options(true)?)?;

    let mut failures = 0usize;
    for report in &reports {
        match &report.outcome {
            Ok(count) => println!("ok    {} ({count} configurations)", report.path.display()),
            Err(e) => {
                failures += 1;
                println!("FAIL  {}: {e}", report.path.display());
            }
        }
    }
    println!("{} files checked, {failures} failed", reports.len());

    Ok(if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(LINT_FAILURE)
    })
}

/// Keep the first configuration of each sweep.
fn first_of_each_sweep(configurations: Vec<GeneratedConfiguration>) -> Vec<GeneratedConfiguration> {
    configurations.into_iter().filter(|c| c.ordinal == 1).collect()
}

fn default_run_id(mode: &str, now: DateTime<Utc>) -> String {
    format!("{mode}_{}", now.format("%Y-%m-%d_%H%M%S"))
}

async fn dispatch_batch(
    mut config: RunnerConfig,
    configurations: Vec<GeneratedConfiguration>,
    batch: &BatchArgs,
    mode: &str,
) -> anyhow::Result<ExitCode> {
    if let Some(workers) = batch.workers {
        config.dispatch.workers = workers;
    }
    if let Some(retries) = batch.retries {
        config.retry.max_attempts = retries.saturating_add(1);
    }
    if let Some(outfile) = &batch.outfile {
        config.output.summary_path.clone_from(outfile);
    }
    validate_config(&config)?;

    let configurations = if batch.single_run {
        first_of_each_sweep(configurations)
    } else {
        configurations
    };

    if config.observability.metrics_port > 0 {
        init_metrics(&MetricsConfig::with_port(config.observability.metrics_port))?;
    }

    let run_id = batch
        .run_id
        .clone()
        .unwrap_or_else(|| default_run_id(mode, Utc::now()));
    let client = HttpBacktestClient::new(&config.endpoint)?;
    let dispatcher = Dispatcher::new(Arc::new(client), DispatchOptions::from_config(&config, &run_id));

    let cancel = dispatcher.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling batch");
            cancel.cancel();
        }
    });

    let report = dispatcher
        .dispatch(configurations, config.dispatch.workers)
        .await?;
    print_report(&report, &config);
    Ok(ExitCode::SUCCESS)
}

fn print_report(report: &BatchReport, config: &RunnerConfig) {
    println!("run {}", report.run_id);
    println!(
        "  {} configurations: {} succeeded, {} failed, {} cancelled ({:.1}% success) in {:.1}s",
        report.results.len(),
        report.succeeded(),
        report.failed(),
        report.cancelled_count(),
        report.success_rate() * 100.0,
        report.total_time_ms as f64 / 1000.0
    );
    if let Some(best) = report.best_by_net_pnl() {
        println!(
            "  best net_pnl: {} ({})",
            best.kpis.get("net_pnl").unwrap_or_default(),
            best.label
        );
    }
    for failed in report.failed_results() {
        println!(
            "  failed: {} ({})",
            failed.label,
            failed.error.as_deref().unwrap_or("unknown error")
        );
    }
    println!("  summary: {}", config.output.summary_path.display());
    println!(
        "  detail packets: {}",
        config.output.detail_dir.join(&report.run_id).display()
    );
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "sweep-runner",
            "run",
            "--sweeps",
            "sweeps",
            "--controller-type",
            "market_making",
            "--retries",
            "2",
            "--single-run",
        ])
        .unwrap();

        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.sweeps, Some(PathBuf::from("sweeps")));
        assert_eq!(args.batch.retries, Some(2));
        assert!(args.batch.single_run);
        assert_eq!(args.mode, "run");
    }

    #[test]
    fn test_run_requires_a_source() {
        assert!(Cli::try_parse_from(["sweep-runner", "run"]).is_err());
        assert!(Cli::try_parse_from(["sweep-runner", "run", "--sweeps", "d", "--in", "a.yml"]).is_err());
    }

    #[test]
    fn test_default_run_id() {
        let now = Utc.with_ymd_and_hms(2024, 3, 11, 9, 5, 7).unwrap();
        assert_eq!(default_run_id("sweep", now), "sweep_2024-03-11_090507");
    }

    #[test]
    fn test_single_run_keeps_first_of_each_sweep() {
        let mut expander = Expander::new(sweep_runner::sweep::ExpandOptions::raw());
        let mut configurations = Vec::new();
        for (name, yaml) in [
            ("a", "base: {x: 0}\nsweep: {x: [1, 2, 3]}"),
            ("b", "base: {y: 0}\ngrid: {y: [1, 2]}"),
        ] {
            let def = SweepDefinition::from_yaml_str(yaml, Some(name)).unwrap();
            configurations.extend(expander.expand(&def).unwrap());
        }

        let kept = first_of_each_sweep(configurations);
        let labels: Vec<&str> = kept.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["a#1#x=1", "b#1#y=1"]);
    }
}
