//! Pipeline-only daemon.
//!
//! Keeps thumbnails and the statistics snapshot current without serving
//! anything, for hosts where the API runs elsewhere or not at all.
//!
//! ## Usage
//!
//! ```bash
//! sitewatch-daemon              # Run on the configured interval
//! sitewatch-daemon --once       # Run both jobs once and exit
//! ```

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use sitewatch::archive::ArchiveIndex;
use sitewatch::config::Config;
use sitewatch::jobs::{JobRunner, RunOutcome};
use sitewatch::logging;
use sitewatch::pipeline::{Pipeline, Placeholder};

#[derive(Default)]
struct DaemonArgs {
    /// Run once and exit
    once: bool,
    /// Overrides `schedule.interval_minutes`
    interval_minutes: Option<u64>,
    config_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let args = match parse_args(&argv) {
        Ok(Invocation::Run(args)) => args,
        Ok(Invocation::Help) => {
            print_help();
            return Ok(());
        }
        Ok(Invocation::Version) => {
            println!("sitewatch-daemon {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Err(message) => {
            eprintln!("Error: {}", message);
            print_help();
            std::process::exit(1);
        }
    };

    let logged = if args.once {
        logging::init_stderr()
    } else {
        logging::init(Some(Config::config_dir().join("logs")))
    };
    if let Err(e) = logged {
        eprintln!("Logging unavailable: {:#}", e);
    }

    info!("sitewatch daemon starting...");

    let config_path = args.config_path.unwrap_or_else(Config::config_path);
    let mut config = Config::load_or_default(&config_path)?;
    if let Some(minutes) = args.interval_minutes {
        config.schedule.interval_minutes = minutes;
    }

    let index = Arc::new(ArchiveIndex::new(&config.archive));
    let placeholder = Placeholder::from_config(&config.thumbnails)
        .context("Failed to prepare placeholder image")?;
    let pipeline = Pipeline::from_config(&config, index, placeholder)?;
    let runner = JobRunner::from_config(pipeline.jobs(), &config.schedule);

    if args.once {
        info!("Running in single-shot mode");
        run_once(&runner).await?;
    } else {
        info!(
            "Running in daemon mode every {} minutes",
            config.schedule.interval_minutes.max(1)
        );
        let handle = runner.start();
        tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
        info!("Shutdown requested");
        handle.stop().await;
    }

    info!("sitewatch daemon stopped");
    Ok(())
}

async fn run_once(runner: &JobRunner) -> Result<()> {
    let mut failed = 0;

    for (name, outcome) in runner.run_all().await {
        match outcome {
            RunOutcome::Completed { summary, elapsed } => {
                info!("{}: {} ({:.1?})", name, summary, elapsed)
            }
            RunOutcome::Failed { error } => {
                error!("{}: {}", name, error);
                failed += 1;
            }
            RunOutcome::Skipped => warn!("{}: skipped", name),
        }
    }

    if failed > 0 {
        bail!("{} job(s) failed", failed);
    }
    Ok(())
}

enum Invocation {
    Run(DaemonArgs),
    Help,
    Version,
}

/// Parse `args` (without the program name).
fn parse_args(args: &[String]) -> Result<Invocation, String> {
    let mut parsed = DaemonArgs::default();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--once" | "-1" => {
                parsed.once = true;
            }
            "--interval" | "-i" => {
                let value = iter.next().ok_or("--interval requires a number of minutes")?;
                let minutes = value
                    .parse()
                    .map_err(|_| format!("--interval expects whole minutes, got {}", value))?;
                parsed.interval_minutes = Some(minutes);
            }
            "--config" | "-c" => {
                let value = iter.next().ok_or("--config requires a path argument")?;
                parsed.config_path = Some(PathBuf::from(value));
            }
            "--version" | "-V" => return Ok(Invocation::Version),
            "--help" | "-h" => return Ok(Invocation::Help),
            other => return Err(format!("Unknown argument: {}", other)),
        }
    }

    Ok(Invocation::Run(parsed))
}

fn print_help() {
    println!(
        r#"sitewatch-daemon - thumbnail and statistics jobs without the API

USAGE:
    sitewatch-daemon [OPTIONS]

OPTIONS:
    --once, -1          Run both jobs once and exit (non-zero if either fails)
    --interval, -i N    Interval in minutes (default: from config, 10)
    --config, -c PATH   Path to config file
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    SITEWATCH_CONFIG    Path to config file (overrides default location)
    SITEWATCH_LOG       Log filter (trace, debug, info, warn, error)

A missing config file is not created; the daemon runs on defaults.
"#
    );
}
