// Embeddings module
// Embedding model contract, the HTTP client for Ollama and OpenAI-compatible
// providers, and markdown chunking

pub mod chunking;
pub mod client;


use async_trait::async_trait;
use thiserror::Error;

use crate::VaultError;

pub use chunking::{ChunkOptions, Chunker, MarkdownChunker, TextChunk};
pub use client::HttpEmbeddingClient;

/// Failure of a single embedding request, classified for the retry policy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmbeddingError {
    #[error("Rate limited by the embedding provider: {0}")]
    RateLimited(String),
    #[error("No API key configured for the {0} embedding provider")]
    MissingApiKey(String),
    #[error("The embedding provider rejected the API key: {0}")]
    InvalidApiKey(String),
    #[error("No base URL configured for the embedding provider")]
    MissingBaseUrl,
    #[error("Temporary embedding failure: {0}")]
    Transient(String),
    #[error("Embedding request failed: {0}")]
    Other(String),
}

impl EmbeddingError {
    /// Rate limits and temporary failures are worth another attempt
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::Transient(_))
    }

    #[inline]
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }

    /// Provider misconfiguration; no chunk can succeed until the user fixes it
    #[inline]
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::MissingApiKey(_) | Self::InvalidApiKey(_) | Self::MissingBaseUrl
        )
    }
}

impl From<EmbeddingError> for VaultError {
    #[inline]
    fn from(error: EmbeddingError) -> Self {
        if error.is_config_error() {
            Self::EmbeddingConfig(error.to_string())
        } else {
            Self::Embedding(error.to_string())
        }
    }
}

/// A text embedding model. Implementations must be safe to call concurrently.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Model identifier stored with every chunk
    fn id(&self) -> &str;

    /// Expected vector length
    fn dimension(&self) -> usize;

    async fn get_embedding(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}
