mod cli;

use clap::Parser;
use cli::{Cli, Commands, ConfigArgs};
use leaseworker::config::Config;
use leaseworker::observability::init_tracing;
use leaseworker::shutdown;
use leaseworker::worker::Worker;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

type AnyError = Box<dyn std::error::Error + Send + Sync>;

fn config_path(args: ConfigArgs) -> PathBuf {
    args.config.unwrap_or_else(Config::default_path)
}

async fn run(args: ConfigArgs) -> Result<(), AnyError> {
    let path = config_path(args);
    let config = Config::load_from_path(path.clone())?;
    let _log_guard = init_tracing(&config.logging, &config.worker.id)?;

    if path.exists() {
        info!(path = %path.display(), "Loaded configuration file");
    } else {
        warn!(
            path = %path.display(),
            "Configuration file not found, using defaults and environment overrides"
        );
    }

    info!(
        worker_id = %config.worker.id,
        queue = %config.queue.base_url,
        temp_dir = %config.worker.temp_dir.display(),
        "Starting worker"
    );

    let mut worker = Worker::from_config(&config)?;

    let shutdown_token = CancellationToken::new();
    shutdown::install(shutdown_token.clone());

    worker.run(shutdown_token).await;
    Ok(())
}

fn check_config(args: ConfigArgs) -> Result<(), AnyError> {
    let config = Config::load_from_path(config_path(args))?;
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), AnyError> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run(args).await?,
        Commands::CheckConfig(args) => check_config(args)?,
    }

    Ok(())
}
