use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "complik")]
#[command(about = "Kubernetes tenant compliance scanner and threat-review pipeline")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Display application version
    Version,

    /// Check cluster connectivity and permissions
    Check,

    /// Start the process scanner, plugin pipeline, operator API and metrics endpoint
    Run {
        /// Path to the YAML configuration file
        #[arg(long, default_value = "config.yaml")]
        config: PathBuf,
    },
}
