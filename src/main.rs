use std::path::PathBuf;

use clap::{Parser, Subcommand};
use vault_index::{Result, VaultError};
use vault_index::commands::{build_scope, index_vault, search_vault, show_stats, vacuum_index};
use vault_index::config::{Config, get_config_dir, run_interactive_config, show_config};

#[derive(Parser)]
#[command(name = "vault-index")]
#[command(about = "Incremental vector index and semantic search over a vault of markdown notes")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml and the index snapshot
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure the embedding provider
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Index new and changed notes and drop deleted ones
    Index {
        /// Vault directory to index
        #[arg(long, default_value = ".")]
        vault: PathBuf,
        /// Discard the existing index for the model and rebuild it
        #[arg(long)]
        all: bool,
    },
    /// Search the index with a natural language query
    Search {
        query: String,
        /// Restrict results to a folder (repeatable)
        #[arg(long)]
        folder: Vec<String>,
        /// Restrict results to a file (repeatable)
        #[arg(long)]
        file: Vec<String>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        min_similarity: Option<f32>,
    },
    /// Show per-model statistics of the index
    Stats,
    /// Compact the index database
    Vacuum,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let base_dir = match cli.base_dir {
        Some(dir) => dir,
        None => get_config_dir().map_err(|e| VaultError::Config(e.to_string()))?,
    };

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&Config::load(&base_dir)?)?;
            } else {
                run_interactive_config(&base_dir)?;
            }
        }
        Commands::Index { vault, all } => {
            index_vault(&Config::load(&base_dir)?, &vault, all).await?;
        }
        Commands::Search {
            query,
            folder,
            file,
            limit,
            min_similarity,
        } => {
            let scope = build_scope(file, folder);
            search_vault(
                &Config::load(&base_dir)?,
                &query,
                scope,
                limit,
                min_similarity,
            )
            .await?;
        }
        Commands::Stats => {
            show_stats(&Config::load(&base_dir)?).await?;
        }
        Commands::Vacuum => {
            vacuum_index(&Config::load(&base_dir)?).await?;
        }
    }

    Ok(())
}
