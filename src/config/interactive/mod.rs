
use std::path::Path;

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Select};

use super::{Config, ConfigError, EmbeddingConfig, EmbeddingProvider};

#[inline]
pub fn run_interactive_config(base_dir: &Path) -> Result<()> {
    eprintln!("{}", style("Vault Index Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config(base_dir)?;

    eprintln!("{}", style("Embedding Provider").bold().yellow());
    eprintln!("Configure the service that turns note chunks into vectors.");
    eprintln!();

    configure_embedding(&mut config.embedding)?;

    eprintln!();
    eprintln!("{}", style("Testing configuration...").yellow());

    if test_provider_connection(&config.embedding) {
        eprintln!("{}", style("Embedding provider is reachable").green());
    } else {
        eprintln!(
            "{}",
            style("Warning: could not reach the embedding provider").yellow()
        );
        eprintln!("You can continue, but make sure it is running before indexing.");
    }

    eprintln!();
    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("Configuration saved").green());
        eprintln!(
            "Configuration saved to: {}",
            style(config.config_file_path().display()).cyan()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

fn load_existing_config(base_dir: &Path) -> Result<Config> {
    if base_dir.join("config.toml").exists() {
        let config = Config::load(base_dir)?;
        eprintln!("{}", style("Found existing configuration.").green());
        Ok(config)
    } else {
        eprintln!(
            "{}",
            style("No existing configuration found. Using defaults.").yellow()
        );
        Config::load(base_dir)
    }
}

fn configure_embedding(embedding: &mut EmbeddingConfig) -> Result<()> {
    let providers = [EmbeddingProvider::Ollama, EmbeddingProvider::OpenAi];
    let labels = ["ollama", "openai"];
    let default_index = providers
        .iter()
        .position(|&p| p == embedding.provider)
        .unwrap_or(0);

    let provider_index = Select::new()
        .with_prompt("Embedding provider")
        .default(default_index)
        .items(&labels)
        .interact()?;

    let base_url: String = Input::new()
        .with_prompt("Provider base URL")
        .default(embedding.base_url.clone().unwrap_or_default())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            url::Url::parse(input).map_err(|_| ConfigError::InvalidUrl(input.clone()))?;
            Ok(())
        })
        .interact_text()?;

    let model: String = Input::new()
        .with_prompt("Embedding model")
        .default(embedding.model.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let dimension: u32 = Input::new()
        .with_prompt("Embedding dimension")
        .default(embedding.dimension)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if (1..=8192).contains(input) {
                Ok(())
            } else {
                Err("Dimension must be between 1 and 8192")
            }
        })
        .interact_text()?;

    embedding.provider = providers.get(provider_index).copied().unwrap_or_default();
    embedding.set_base_url(base_url)?;
    embedding.set_model(model)?;
    embedding.set_dimension(dimension)?;

    Ok(())
}

/// Any HTTP answer from the base URL counts as reachable
fn test_provider_connection(embedding: &EmbeddingConfig) -> bool {
    let Ok(Some(url)) = embedding.base_url() else {
        return false;
    };

    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(std::time::Duration::from_secs(5)))
        .build()
        .into();

    match agent.get(url.as_str()).call() {
        Ok(_) | Err(ureq::Error::StatusCode(_)) => true,
        Err(_) => false,
    }
}
