// Configuration management module
// TOML-backed settings for the embedding provider, indexing and search

pub mod interactive;
pub mod settings;


use anyhow::{Context, Result};

pub use interactive::run_interactive_config;
pub use settings::{
    API_KEY_ENV_VAR, Config, ConfigError, EmbeddingConfig, EmbeddingProvider, IndexingConfig,
    RetryConfig, SearchConfig,
};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::default_base_dir()
}

/// Render the effective configuration as TOML with the API key masked
#[inline]
pub fn render_config(config: &Config) -> Result<String> {
    let mut shown = config.clone();
    if shown.embedding.api_key.is_some() {
        shown.embedding.api_key = Some("********".to_string());
    }
    toml::to_string_pretty(&shown).context("Failed to serialize config to TOML")
}

#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    println!("# {}", config.config_file_path().display());
    println!("{}", render_config(config)?);
    if config.embedding.api_key.is_none() && config.embedding.resolved_api_key().is_some() {
        println!("# API key provided by {}", API_KEY_ENV_VAR);
    }
    Ok(())
}
