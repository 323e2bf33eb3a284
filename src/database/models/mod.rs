
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;

/// Source line range of a chunk, kept for result attribution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    pub start_line: u32,
    pub end_line: u32,
}

/// A chunk ready to be written to the `embeddings` table
#[derive(Debug, Clone, PartialEq)]
pub struct NewEmbeddingChunk {
    pub path: String,
    pub mtime: i64,
    pub content: String,
    pub model: String,
    pub dimension: u32,
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
}

/// A stored chunk, without its vector
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct EmbeddingChunk {
    pub id: i64,
    pub path: String,
    pub mtime: i64,
    pub content: String,
    pub model: String,
    pub dimension: i64,
    pub metadata: Json<ChunkMetadata>,
    pub created_at: String,
}

/// One row of a similarity search, best match first
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct SearchResult {
    pub id: i64,
    pub path: String,
    pub mtime: i64,
    pub content: String,
    pub model: String,
    pub metadata: Json<ChunkMetadata>,
    /// Cosine similarity in `[-1, 1]`
    pub similarity: f64,
}

/// Restricts a similarity search to explicit files and/or folder prefixes.
/// A row matches when it matches any listed file or folder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchScope {
    pub files: Vec<String>,
    pub folders: Vec<String>,
}

impl SearchScope {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.folders.is_empty()
    }

    /// Folder prefixes with a single trailing `/`, so `notes` never matches `notes-archive/`
    #[inline]
    pub fn folder_prefixes(&self) -> Vec<String> {
        self.folders
            .iter()
            .map(|folder| folder.trim_matches('/'))
            .filter(|folder| !folder.is_empty())
            .map(|folder| format!("{folder}/"))
            .collect()
    }

    /// True when the whole vault is in scope, i.e. one of the folders is the root
    #[inline]
    pub fn covers_root(&self) -> bool {
        self.folders
            .iter()
            .any(|folder| folder.trim_matches('/').is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    pub min_similarity: f32,
    pub limit: usize,
    pub scope: Option<SearchScope>,
}

impl Default for SearchOptions {
    #[inline]
    fn default() -> Self {
        Self {
            min_similarity: 0.0,
            limit: 10,
            scope: None,
        }
    }
}

/// Aggregate counts for one (model, dimension) pair
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct EmbeddingStats {
    pub model: String,
    pub dimension: i64,
    pub row_count: i64,
    pub file_count: i64,
    pub data_bytes: i64,
}

/// Removes null bytes, which the engine refuses in TEXT columns
#[inline]
pub fn sanitize_content(content: &str) -> String {
    content.replace('\0', "")
}

/// Encode a vector in the little-endian f32 layout read by `vec_distance_cosine`
#[inline]
pub fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|value| value.to_le_bytes()).collect()
}
