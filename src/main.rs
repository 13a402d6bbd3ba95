use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use sitewatch::access::UserDirectory;
use sitewatch::archive::ArchiveIndex;
use sitewatch::config::Config;
use sitewatch::jobs::JobRunner;
use sitewatch::pipeline::{Pipeline, Placeholder};
use sitewatch::{logging, server};

fn parse_args() -> Option<PathBuf> {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("sitewatch {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    config_path
}

fn print_help() {
    println!(
        r#"sitewatch - camera site monitor and read API

USAGE:
    sitewatch [OPTIONS]

Runs the thumbnail and statistics jobs on their schedule and serves the
archive, thumbnails and snapshot over HTTP.

OPTIONS:
    --config, -c PATH   Path to config file
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    SITEWATCH_CONFIG    Path to config file (overrides default location)
    SITEWATCH_LOG       Log filter (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/sitewatch/config.toml

See also: sitewatch-daemon --help"#
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = parse_args();

    // Journald on Linux, file fallback otherwise
    if let Err(e) = logging::init(Some(Config::config_dir().join("logs"))) {
        eprintln!("Logging unavailable: {:#}", e);
    }

    let config = match config_path {
        Some(path) => Config::load_or_create(&path)?,
        None => Config::load()?,
    };
    info!(
        "sitewatch {} starting, archive at {}",
        env!("CARGO_PKG_VERSION"),
        config.archive.root.display()
    );

    let index = Arc::new(ArchiveIndex::new(&config.archive));
    let placeholder = Placeholder::from_config(&config.thumbnails)
        .context("Failed to prepare placeholder image")?;
    let pipeline = Pipeline::from_config(&config, Arc::clone(&index), placeholder.clone())?;
    let users = Arc::new(UserDirectory::load(&config.identity.users_file)?);

    let runner = JobRunner::from_config(pipeline.jobs(), &config.schedule);
    let handle = runner.start();

    let state = server::AppState::new(&config, index, placeholder, users);
    let result = server::serve(config.server.bind, server::router(state), shutdown_signal()).await;

    handle.stop().await;
    info!("sitewatch stopped");
    result
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
