use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "leaseworker")]
#[command(about = "Leased-task video generation worker", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Poll the queue and process tasks until SIGINT/SIGTERM
    Run(ConfigArgs),

    /// Load and validate the configuration, then print it (token omitted)
    CheckConfig(ConfigArgs),
}

#[derive(clap::Args, Debug)]
pub struct ConfigArgs {
    /// Configuration file (defaults to $LEASEWORKER_CONFIG or config/leaseworker.toml)
    #[arg(long, short)]
    pub config: Option<PathBuf>,
}
