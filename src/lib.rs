use thiserror::Error;

pub type Result<T> = std::result::Result<T, VaultError>;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    /// The embedded engine could not start in this runtime. Retrying will not help;
    /// the application has to be updated.
    #[error(
        "The index database could not be initialized by this version of the application ({0}). Please update to the latest version."
    )]
    RuntimeOutdated(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    /// The embedding provider is misconfigured (missing or rejected API key, missing base URL).
    #[error("{0}. Please check the embedding settings in config.toml and run the index again.")]
    EmbeddingConfig(String),

    #[error("Every chunk in an embedding batch failed, aborting the indexing run: {0}")]
    BatchFailed(String),

    #[error("Failed to process {0} file(s) and no previous index exists for this model")]
    AllFilesFailed(usize),

    #[error("An indexing run is already in progress")]
    IndexingInProgress,

    #[error("Vault error: {0}")]
    Host(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod indexer;
pub mod scheduler;
pub mod search;
pub mod vault;
