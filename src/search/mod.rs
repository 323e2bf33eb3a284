// Search module
// Query path: embed the query text, then rank stored chunks by similarity


use tracing::debug;

use crate::Result;
use crate::config::SearchConfig;
use crate::database::models::{SearchOptions, SearchResult, SearchScope};
use crate::database::repository::VectorRepository;
use crate::embeddings::EmbeddingModel;

/// Search options with the configured defaults and an optional scope
#[inline]
pub fn search_options(config: &SearchConfig, scope: Option<SearchScope>) -> SearchOptions {
    SearchOptions {
        min_similarity: config.min_similarity,
        limit: config.limit,
        scope: scope.filter(|scope| !scope.is_empty()),
    }
}

/// Similarity search over the chunks of one embedding model
pub struct VaultSearch<'a> {
    repository: &'a VectorRepository,
    model: &'a dyn EmbeddingModel,
}

impl<'a> VaultSearch<'a> {
    #[inline]
    pub fn new(repository: &'a VectorRepository, model: &'a dyn EmbeddingModel) -> Self {
        Self { repository, model }
    }

    /// Embed `query` with the model and return the best matching chunks, best first
    #[inline]
    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchResult>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Searching for {:?} with model {}", query, self.model.id());
        let vector = self.model.get_embedding(query).await?;
        self.search_vector(&vector, options).await
    }

    #[inline]
    pub async fn search_vector(
        &self,
        vector: &[f32],
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        self.repository
            .perform_similarity_search(vector, self.model.id(), options)
            .await
    }
}
