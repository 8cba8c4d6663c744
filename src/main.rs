use clap::Parser;
use complik::cli::{Cli, Commands};
use complik::commands;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Version => commands::version::run()?,
        Commands::Check => commands::check::run().await?,
        Commands::Run { config } => commands::run::run(config).await?,
    }

    Ok(())
}
