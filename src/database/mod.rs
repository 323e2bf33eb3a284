// Database module
// The embedded engine (SQLite with the sqlite-vec extension), its snapshot lifecycle
// and the repository over the embeddings table

pub mod engine;
pub mod models;
pub mod repository;

pub use engine::DatabaseManager;
pub use models::{
    ChunkMetadata, EmbeddingChunk, EmbeddingStats, NewEmbeddingChunk, SearchOptions,
    SearchResult, SearchScope,
};
pub use repository::VectorRepository;
