#[cfg(test)]
mod tests;

use std::collections::{HashMap, HashSet};

use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::{debug, info};

use crate::database::models::{
    EmbeddingChunk, EmbeddingStats, NewEmbeddingChunk, SearchOptions, SearchResult,
    sanitize_content, vector_to_blob,
};
use crate::{Result, VaultError};

/// Paths bound per DELETE statement, well below SQLite's host parameter limit
const DELETE_PATHS_PER_STATEMENT: usize = 500;

/// Vector repository over the `embeddings` table.
///
/// This is the only type that issues queries against the embedded engine. It shares the
/// connection pool owned by [`crate::database::DatabaseManager`].
#[derive(Debug, Clone)]
pub struct VectorRepository {
    pool: SqlitePool,
}

impl VectorRepository {
    #[inline]
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Latest indexed mtime for every path of a model, in one aggregate query
    #[inline]
    pub async fn get_file_mtimes(&self, model: &str) -> Result<HashMap<String, i64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT path, MAX(mtime) FROM embeddings WHERE model = ? GROUP BY path",
        )
        .bind(model)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| VaultError::Database(format!("Failed to read indexed mtimes: {}", e)))?;

        Ok(rows.into_iter().collect())
    }

    /// Insert a set of chunks in a single transaction.
    ///
    /// Every chunk is validated before anything is written; if any row fails, none are kept.
    #[inline]
    pub async fn insert_vectors(&self, chunks: &[NewEmbeddingChunk]) -> Result<usize> {
        if chunks.is_empty() {
            debug!("No chunks to insert");
            return Ok(0);
        }

        let mut rows = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            if chunk.embedding.len() != chunk.dimension as usize {
                return Err(VaultError::Database(format!(
                    "Chunk of {} declares dimension {} but its vector has {} values",
                    chunk.path,
                    chunk.dimension,
                    chunk.embedding.len()
                )));
            }

            let content = sanitize_content(&chunk.content);
            if content.is_empty() {
                return Err(VaultError::Database(format!(
                    "Chunk of {} has no content",
                    chunk.path
                )));
            }

            let metadata = serde_json::to_string(&chunk.metadata).map_err(|e| {
                VaultError::Database(format!("Failed to serialize chunk metadata: {}", e))
            })?;

            rows.push((chunk, content, metadata));
        }

        let mut transaction =
            self.pool.begin().await.map_err(|e| {
                VaultError::Database(format!("Failed to begin transaction: {}", e))
            })?;

        let created_at = chrono::Utc::now().to_rfc3339();
        for (chunk, content, metadata) in &rows {
            sqlx::query(
                "INSERT INTO embeddings (path, mtime, content, model, dimension, embedding, metadata, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&chunk.path)
            .bind(chunk.mtime)
            .bind(content)
            .bind(&chunk.model)
            .bind(i64::from(chunk.dimension))
            .bind(vector_to_blob(&chunk.embedding))
            .bind(metadata)
            .bind(&created_at)
            .execute(&mut *transaction)
            .await
            .map_err(|e| {
                VaultError::Database(format!("Failed to insert chunk of {}: {}", chunk.path, e))
            })?;
        }

        transaction
            .commit()
            .await
            .map_err(|e| VaultError::Database(format!("Failed to commit chunk insert: {}", e)))?;

        debug!("Inserted {} chunks", rows.len());
        Ok(rows.len())
    }

    /// Remove every chunk of the given paths for one model
    #[inline]
    pub async fn delete_vectors_for_multiple_files(
        &self,
        paths: &[String],
        model: &str,
    ) -> Result<u64> {
        if paths.is_empty() {
            return Ok(0);
        }

        let mut transaction =
            self.pool.begin().await.map_err(|e| {
                VaultError::Database(format!("Failed to begin transaction: {}", e))
            })?;

        let mut deleted = 0;
        for group in paths.chunks(DELETE_PATHS_PER_STATEMENT) {
            let mut query: QueryBuilder<'_, Sqlite> =
                QueryBuilder::new("DELETE FROM embeddings WHERE model = ");
            query.push_bind(model).push(" AND path IN (");
            let mut separated = query.separated(", ");
            for path in group {
                separated.push_bind(path);
            }
            separated.push_unseparated(")");

            deleted += query
                .build()
                .execute(&mut *transaction)
                .await
                .map_err(|e| VaultError::Database(format!("Failed to delete chunks: {}", e)))?
                .rows_affected();
        }

        transaction
            .commit()
            .await
            .map_err(|e| VaultError::Database(format!("Failed to commit chunk delete: {}", e)))?;

        debug!("Deleted {} chunks for {} files", deleted, paths.len());
        Ok(deleted)
    }

    /// Remove every chunk of a model, used before a full rebuild
    #[inline]
    pub async fn clear_all_vectors(&self, model: &str) -> Result<u64> {
        let deleted = sqlx::query("DELETE FROM embeddings WHERE model = ?")
            .bind(model)
            .execute(&self.pool)
            .await
            .map_err(|e| VaultError::Database(format!("Failed to clear chunks: {}", e)))?
            .rows_affected();

        info!("Cleared {} chunks for model {}", deleted, model);
        Ok(deleted)
    }

    #[inline]
    pub async fn get_indexed_file_paths(&self, model: &str) -> Result<HashSet<String>> {
        let paths: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT path FROM embeddings WHERE model = ?")
                .bind(model)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| {
                    VaultError::Database(format!("Failed to list indexed files: {}", e))
                })?;

        Ok(paths.into_iter().collect())
    }

    #[inline]
    pub async fn has_vectors_for_model(&self, model: &str) -> Result<bool> {
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM embeddings WHERE model = ?)")
            .bind(model)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| VaultError::Database(format!("Failed to check for chunks: {}", e)))
    }

    /// Stored chunks of one file, ordered by position in the document
    #[inline]
    pub async fn get_chunks_for_file(
        &self,
        path: &str,
        model: &str,
    ) -> Result<Vec<EmbeddingChunk>> {
        sqlx::query_as(
            "SELECT id, path, mtime, content, model, dimension, metadata, created_at
             FROM embeddings
             WHERE path = ? AND model = ?
             ORDER BY json_extract(metadata, '$.startLine'), id",
        )
        .bind(path)
        .bind(model)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| VaultError::Database(format!("Failed to read chunks of {}: {}", path, e)))
    }

    /// Up to `limit` chunks with cosine similarity of at least `min_similarity`, best first.
    ///
    /// Only rows of `model` whose dimension matches the query vector take part.
    #[inline]
    pub async fn perform_similarity_search(
        &self,
        query_vector: &[f32],
        model: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        if query_vector.is_empty() || options.limit == 0 {
            return Ok(Vec::new());
        }

        debug!(
            "Searching {} with limit {} and min similarity {}",
            model, options.limit, options.min_similarity
        );

        let mut query: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
            "SELECT id, path, mtime, content, model, metadata, similarity FROM (
                 SELECT id, path, mtime, content, model, metadata,
                        1.0 - vec_distance_cosine(embedding, ",
        );
        query
            .push_bind(vector_to_blob(query_vector))
            .push(") AS similarity FROM embeddings WHERE model = ")
            .push_bind(model)
            .push(" AND dimension = ")
            .push_bind(query_vector.len() as i64);

        if let Some(scope) = options.scope.as_ref().filter(|scope| !scope.covers_root()) {
            let prefixes = scope.folder_prefixes();
            if !scope.is_empty() {
                query.push(" AND (");
                let mut conditions = query.separated(" OR ");
                for file in &scope.files {
                    conditions.push("path = ");
                    conditions.push_bind_unseparated(file);
                }
                for prefix in prefixes {
                    // substr counts characters, not bytes
                    conditions.push("substr(path, 1, ");
                    conditions.push_bind_unseparated(prefix.chars().count() as i64);
                    conditions.push_unseparated(") = ");
                    conditions.push_bind_unseparated(prefix);
                }
                query.push(")");
            }
        }

        query
            .push(") WHERE similarity >= ")
            .push_bind(f64::from(options.min_similarity))
            .push(" ORDER BY similarity DESC LIMIT ")
            .push_bind(options.limit as i64);

        let results = query
            .build_query_as::<SearchResult>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| VaultError::Database(format!("Failed to execute search: {}", e)))?;

        debug!("Similarity search returned {} rows", results.len());
        Ok(results)
    }

    /// Row, file and byte counts per model
    #[inline]
    pub async fn get_embedding_stats(&self) -> Result<Vec<EmbeddingStats>> {
        sqlx::query_as(
            "SELECT model,
                    dimension,
                    COUNT(*) AS row_count,
                    COUNT(DISTINCT path) AS file_count,
                    COALESCE(SUM(length(embedding) + length(content) + length(metadata)), 0) AS data_bytes
             FROM embeddings
             GROUP BY model, dimension
             ORDER BY model",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| VaultError::Database(format!("Failed to read embedding stats: {}", e)))
    }
}
