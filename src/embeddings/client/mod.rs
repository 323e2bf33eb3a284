
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::config::{EmbeddingConfig, EmbeddingProvider};
use crate::embeddings::{EmbeddingError, EmbeddingModel};
use crate::{Result, VaultError};

/// Embedding client for Ollama and OpenAI-compatible HTTP endpoints.
///
/// Each call is a single attempt; retry and backoff belong to the indexing pipeline.
#[derive(Debug, Clone)]
pub struct HttpEmbeddingClient {
    provider: EmbeddingProvider,
    base_url: Option<Url>,
    api_key: Option<String>,
    model: String,
    dimension: usize,
    agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

/// Every response shape the supported providers return
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EmbedResponse {
    /// `{"embedding": [..]}`
    Single { embedding: Vec<f32> },
    /// `{"embeddings": [[..]]}`, Ollama `/api/embed`
    Batch { embeddings: Vec<Vec<f32>> },
    /// `{"data": [{"embedding": [..]}]}`, OpenAI-compatible
    Data { data: Vec<EmbeddingData> },
    /// `{"embedding": {"values": [..]}}`
    Values { embedding: EmbeddingValues },
    /// `{"error": ..}` with a string or an object body
    Failure { error: serde_json::Value },
    Unknown(serde_json::Value),
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

impl EmbedResponse {
    fn into_vector(self) -> std::result::Result<Vec<f32>, EmbeddingError> {
        let vector = match self {
            Self::Single { embedding } => Some(embedding),
            Self::Values { embedding } => Some(embedding.values),
            Self::Batch { embeddings } => embeddings.into_iter().next(),
            Self::Data { data } => data.into_iter().next().map(|d| d.embedding),
            Self::Failure { error } => {
                let message = error
                    .as_str()
                    .or_else(|| error.get("message").and_then(serde_json::Value::as_str))
                    .map_or_else(|| error.to_string(), str::to_string);
                return Err(EmbeddingError::Other(format!(
                    "Provider returned an error: {}",
                    message
                )));
            }
            Self::Unknown(value) => {
                let keys = value
                    .as_object()
                    .map(|object| object.keys().cloned().collect::<Vec<_>>().join(", "))
                    .unwrap_or_default();
                return Err(EmbeddingError::Other(format!(
                    "Unrecognized embedding response (fields: [{}])",
                    keys
                )));
            }
        };

        vector
            .filter(|vector| !vector.is_empty())
            .ok_or_else(|| EmbeddingError::Other("Provider returned an empty embedding".to_string()))
    }
}

impl HttpEmbeddingClient {
    #[inline]
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let base_url = config
            .base_url()
            .map_err(|e| VaultError::Config(e.to_string()))?;

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_seconds)))
            .build()
            .into();

        Ok(Self {
            provider: config.provider,
            base_url,
            api_key: config.resolved_api_key(),
            model: config.model.clone(),
            dimension: config.dimension as usize,
            agent,
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        self
    }

    /// Endpoint for the configured provider, relative to the base URL's path
    fn endpoint(&self) -> std::result::Result<Url, EmbeddingError> {
        let mut base = self.base_url.clone().ok_or(EmbeddingError::MissingBaseUrl)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let relative = match self.provider {
            EmbeddingProvider::Ollama => "api/embed",
            EmbeddingProvider::OpenAi => "embeddings",
        };
        base.join(relative)
            .map_err(|e| EmbeddingError::Other(format!("Failed to build embedding URL: {}", e)))
    }

    fn authorization(&self) -> std::result::Result<Option<String>, EmbeddingError> {
        match (&self.api_key, self.provider) {
            (Some(key), _) => Ok(Some(format!("Bearer {}", key))),
            (None, EmbeddingProvider::OpenAi) => {
                Err(EmbeddingError::MissingApiKey(self.provider.to_string()))
            }
            (None, EmbeddingProvider::Ollama) => Ok(None),
        }
    }
}

#[async_trait]
impl EmbeddingModel for HttpEmbeddingClient {
    #[inline]
    fn id(&self) -> &str {
        &self.model
    }

    #[inline]
    fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    async fn get_embedding(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
        let url = self.endpoint()?;
        let authorization = self.authorization()?;
        let body = serde_json::to_string(&EmbedRequest {
            model: &self.model,
            input: text,
        })
        .map_err(|e| EmbeddingError::Other(format!("Failed to serialize request: {}", e)))?;

        debug!("Requesting embedding for {} chars from {}", text.len(), url);

        let agent = self.agent.clone();
        let response_text = tokio::task::spawn_blocking(move || {
            post_json(&agent, &url, authorization.as_deref(), &body)
        })
        .await
        .map_err(|e| EmbeddingError::Other(format!("Embedding task failed: {}", e)))??;

        let response: EmbedResponse = serde_json::from_str(&response_text).map_err(|e| {
            EmbeddingError::Other(format!("Failed to parse embedding response: {}", e))
        })?;
        let vector = response.into_vector()?;

        if vector.len() != self.dimension {
            return Err(EmbeddingError::Other(format!(
                "Model {} returned {} dimensions, expected {}",
                self.model,
                vector.len(),
                self.dimension
            )));
        }

        Ok(vector)
    }
}

fn post_json(
    agent: &ureq::Agent,
    url: &Url,
    authorization: Option<&str>,
    body: &str,
) -> std::result::Result<String, EmbeddingError> {
    let mut request = agent
        .post(url.as_str())
        .header("Content-Type", "application/json");
    if let Some(authorization) = authorization {
        request = request.header("Authorization", authorization);
    }

    request
        .send(body)
        .and_then(|mut response| response.body_mut().read_to_string())
        .map_err(classify_error)
}

/// Map a transport or status failure onto the retry policy's categories
fn classify_error(error: ureq::Error) -> EmbeddingError {
    match error {
        ureq::Error::StatusCode(429) => {
            warn!("Embedding provider is rate limiting requests");
            EmbeddingError::RateLimited("HTTP 429".to_string())
        }
        ureq::Error::StatusCode(status @ (401 | 403)) => {
            EmbeddingError::InvalidApiKey(format!("HTTP {}", status))
        }
        ureq::Error::StatusCode(status) if status == 408 || status >= 500 => {
            EmbeddingError::Transient(format!("Server error: HTTP {}", status))
        }
        ureq::Error::StatusCode(status) => {
            EmbeddingError::Other(format!("Client error: HTTP {}", status))
        }
        ureq::Error::ConnectionFailed
        | ureq::Error::HostNotFound
        | ureq::Error::Timeout(_)
        | ureq::Error::Io(_) => EmbeddingError::Transient(format!("Transport error: {}", error)),
        other => EmbeddingError::Other(format!("Request error: {}", other)),
    }
}
