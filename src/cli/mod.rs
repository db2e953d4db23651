pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "stash")]
#[command(about = "Keep saved articles readable offline", long_about = None)]
pub struct Cli {
    /// Config file (default: ~/.config/stash/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Save an article for offline reading
    Save {
        /// URL of the article
        url: String,
        /// Title shown in listings
        #[arg(short, long)]
        title: Option<String>,
    },
    /// Remove a saved article and everything cached for it
    Remove {
        /// URL of the article
        url: String,
    },
    /// List saved articles with their offline state
    List,
    /// Download everything that is not yet available offline
    Sync,
    /// Keep downloading as articles are saved, until Ctrl-C
    Watch,
}
