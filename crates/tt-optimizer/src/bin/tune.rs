use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tt_optimizer::{HarnessConfig, SearchReport, StrategyKind};

#[derive(Parser)]
#[command(
    name = "tt-tune",
    version,
    about = "Search strategy engine constants by repeated build, run and measure"
)]
struct Cli {
    /// Harness config (TOML). Built-in defaults are used when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level, including captured process output.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the search and write the best parameters back.
    Run {
        #[arg(long)]
        iterations: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
        /// random, grid or perturbation
        #[arg(long)]
        strategy: Option<String>,
        /// Print the full run report as JSON after the summary.
        #[arg(long)]
        json: bool,
    },
    /// Validate the config and show each parameter's current value.
    Check,
    /// Print the default config as TOML.
    Init,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Init => {
            print!("{}", HarnessConfig::default().to_toml()?);
            Ok(())
        }
        Command::Check => check(&load(cli.config.as_deref())?),
        Command::Run {
            iterations,
            seed,
            strategy,
            json,
        } => {
            let mut config = load(cli.config.as_deref())?;
            if let Some(iterations) = iterations {
                config.search.iterations = iterations;
            }
            if seed.is_some() {
                config.search.seed = seed;
            }
            if let Some(strategy) = strategy {
                config.search.strategy = strategy.parse::<StrategyKind>()?;
            }
            run(&config, json)
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stdout)
        .init();
}

fn load(path: Option<&Path>) -> Result<HarnessConfig> {
    match path {
        Some(path) => HarnessConfig::load(path)
            .with_context(|| format!("failed loading harness config {}", path.display())),
        None => Ok(HarnessConfig::default()),
    }
}

fn check(config: &HarnessConfig) -> Result<()> {
    let values = config
        .inspect_target()
        .with_context(|| format!("failed inspecting {}", config.target.path.display()))?;

    println!("Target: {}", config.target.path.display());
    let mut missing = 0;
    for (spec, value) in &values {
        match value {
            Some(value) => println!(
                "  {:<20} {:>12}   [{}, {}]",
                spec.name, value, spec.low, spec.high
            ),
            None => {
                missing += 1;
                println!(
                    "  {:<20} {:>12}   [{}, {}]",
                    spec.name, "MISSING", spec.low, spec.high
                );
            }
        }
    }
    if missing > 0 {
        println!("{missing} parameter(s) have no declaration and would not be applied");
    }
    Ok(())
}

fn run(config: &HarnessConfig, json: bool) -> Result<()> {
    let mut driver = config.build_driver()?;
    let report = driver.run()?;
    print_summary(&report, &config.metric.unit);
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

fn print_summary(report: &SearchReport, unit: &str) {
    println!("\n{}", "=".repeat(60));
    println!("OPTIMIZATION COMPLETE");
    println!(
        "Trials: {} succeeded, {} failed",
        report.status.trials_completed, report.status.trials_failed
    );
    match (&report.best.candidate, report.best.trial_number) {
        (Some(candidate), Some(trial)) => {
            let source = match trial {
                0 => "baseline".to_string(),
                n => format!("trial {n}"),
            };
            println!("Best metric: {:.4} {} ({})", report.best.metric, unit, source);
            println!("Best parameters:");
            for (name, value) in candidate.iter() {
                println!("  {name}: {value}");
            }
            if let Some(err) = &report.restore_error {
                println!("WARNING: best parameters were not written back: {err}");
            }
            if report.final_build_succeeded == Some(false) {
                println!("WARNING: final rebuild with the best parameters failed");
            }
        }
        _ => println!("No improving configuration found; nothing restored"),
    }
}
