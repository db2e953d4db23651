use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use stash::app::AppContext;
use stash::cli::{commands, Cli, Commands};
use stash::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let mut ctx = AppContext::new(config)?;

    match cli.command {
        Commands::Save { url, title } => {
            commands::save_item(&ctx, &url, title)?;
        }
        Commands::Remove { url } => {
            commands::remove_item(&ctx, &url).await?;
        }
        Commands::List => {
            commands::list_items(&ctx)?;
        }
        Commands::Sync => {
            commands::sync_items(&mut ctx).await?;
        }
        Commands::Watch => {
            commands::watch_items(&mut ctx).await?;
        }
    }

    Ok(())
}
