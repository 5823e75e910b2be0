use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tributary::app::AppContext;
use tributary::cli::{commands, Cli, Commands};
use tributary::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tributary=info")))
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(workers) = cli.workers {
        config.scheduler.workers = workers.max(1);
    }
    let ctx = AppContext::new(config)?;

    match cli.command {
        Commands::Run { tick } => {
            commands::run(Arc::new(ctx), tick).await?;
        }
        Commands::Check { destination } => {
            commands::check(&ctx, destination).await?;
        }
        Commands::Status => {
            commands::status(&ctx)?;
        }
        Commands::Parsers => {
            commands::parsers(&ctx)?;
        }
    }

    Ok(())
}
