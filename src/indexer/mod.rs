// Indexer module
// Incremental indexing of a vault: change detection, chunking, batched embedding
// with retry and progress reporting

pub mod progress;
pub mod retry;


use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::database::DatabaseManager;
use crate::database::models::{ChunkMetadata, NewEmbeddingChunk, sanitize_content};
use crate::embeddings::{ChunkOptions, Chunker, EmbeddingError, EmbeddingModel, MarkdownChunker};
use crate::scheduler::Scheduler;
use crate::vault::{DocumentHost, DocumentInfo, PathFilter};
use crate::{Result, VaultError};

pub use progress::{
    ChannelProgressSink, FileCounts, FolderProgress, IndexProgress, LogProgressSink, NoopProgressSink,
    ProgressSink, ProgressTracker,
};
pub use retry::{RetryPolicy, retry_with_backoff};

const SCAN_YIELD_INTERVAL: usize = 50;
const CHUNK_YIELD_INTERVAL: usize = 10;

/// Shared flag to stop a running index update between batches
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    /// Drop every chunk of the model and index all eligible documents again
    pub reindex_all: bool,
    pub cancellation: Option<CancellationFlag>,
}

impl UpdateOptions {
    fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationFlag::is_cancelled)
    }
}

/// A document that could not be read or chunked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub path: String,
    pub error: String,
}

/// A chunk whose embedding failed for good
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFailure {
    pub path: String,
    pub metadata: ChunkMetadata,
    pub error: String,
}

/// Outcome of one index update
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexReport {
    /// Eligible documents after filtering
    pub files_scanned: usize,
    /// Documents without chunks for the model, or every document on a full rebuild
    pub files_new: usize,
    /// Documents whose mtime moved past the indexed one
    pub files_updated: usize,
    /// Documents whose chunks were removed because they are gone or no longer eligible
    pub files_removed: usize,
    /// Documents with at least one chunk stored in this run
    pub files_indexed: usize,
    pub chunks_indexed: usize,
    pub file_failures: Vec<FileFailure>,
    pub chunk_failures: Vec<ChunkFailure>,
    pub cancelled: bool,
}

impl IndexReport {
    #[inline]
    pub fn has_failures(&self) -> bool {
        !self.file_failures.is_empty() || !self.chunk_failures.is_empty()
    }
}

/// A document picked for (re)indexing. New documents carry the content read while scanning.
#[derive(Debug, Clone)]
struct SelectedDocument {
    info: DocumentInfo,
    content: Option<String>,
}

/// A chunk waiting for its embedding
#[derive(Debug, Clone)]
struct PendingChunk {
    path: String,
    mtime: i64,
    content: String,
    metadata: ChunkMetadata,
}

/// Clears the "currently indexing" flag when the run ends, however it ends
struct IndexingGuard<'a>(&'a AtomicBool);

impl<'a> IndexingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| VaultError::IndexingInProgress)?;
        Ok(Self(flag))
    }
}

impl Drop for IndexingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Keeps the vector index of one vault in sync with its documents
pub struct VaultIndexer {
    host: Arc<dyn DocumentHost>,
    chunker: Arc<dyn Chunker>,
    scheduler: Arc<dyn Scheduler>,
    filter: PathFilter,
    chunk_options: ChunkOptions,
    batch_size: usize,
    retry_policy: RetryPolicy,
    indexing: AtomicBool,
}

impl VaultIndexer {
    #[inline]
    pub fn new(
        host: Arc<dyn DocumentHost>,
        chunker: Arc<dyn Chunker>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            host,
            chunker,
            scheduler,
            filter: PathFilter::default(),
            chunk_options: ChunkOptions::default(),
            batch_size: 100,
            retry_policy: RetryPolicy::default(),
            indexing: AtomicBool::new(false),
        }
    }

    /// Indexer with the markdown chunker and the configured filters, sizes and retry policy
    #[inline]
    pub fn from_config(
        config: &Config,
        host: Arc<dyn DocumentHost>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self> {
        Ok(Self::new(host, Arc::new(MarkdownChunker), scheduler)
            .with_filter(PathFilter::from_config(&config.indexing)?)
            .with_chunk_options(ChunkOptions::new(config.indexing.chunk_size))
            .with_batch_size(config.indexing.batch_size)
            .with_retry_policy(RetryPolicy::from_config(&config.retry)))
    }

    #[inline]
    pub fn with_filter(mut self, filter: PathFilter) -> Self {
        self.filter = filter;
        self
    }

    #[inline]
    pub fn with_chunk_options(mut self, chunk_options: ChunkOptions) -> Self {
        self.chunk_options = chunk_options;
        self
    }

    #[inline]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[inline]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    #[inline]
    pub fn is_indexing(&self) -> bool {
        self.indexing.load(Ordering::SeqCst)
    }

    /// Bring the index for `model` up to date with the vault.
    ///
    /// Only one update may run at a time per indexer; a concurrent call fails with
    /// [`VaultError::IndexingInProgress`]. The engine is saved exactly once when the run
    /// ends, whether it succeeded, failed or was cancelled.
    #[inline]
    pub async fn update_vault_index(
        &self,
        database: &DatabaseManager,
        model: &dyn EmbeddingModel,
        options: &UpdateOptions,
        progress_sink: &dyn ProgressSink,
    ) -> Result<IndexReport> {
        let _guard = IndexingGuard::acquire(&self.indexing)?;
        info!(
            "Updating vault index for model {} (full rebuild: {})",
            model.id(),
            options.reindex_all
        );

        let tracker = ProgressTracker::new(progress_sink);
        let result = self.run_update(database, model, options, &tracker).await;

        database.save().await;

        match &result {
            Ok(report) => {
                log_failures(report);
                info!(
                    "Index update finished: {} files indexed, {} chunks stored, {} files removed{}",
                    report.files_indexed,
                    report.chunks_indexed,
                    report.files_removed,
                    if report.cancelled { " (cancelled)" } else { "" }
                );
            }
            Err(e) => error!("Index update failed: {}", e),
        }

        result
    }

    async fn run_update(
        &self,
        database: &DatabaseManager,
        model: &dyn EmbeddingModel,
        options: &UpdateOptions,
        tracker: &ProgressTracker<'_>,
    ) -> Result<IndexReport> {
        let mut report = IndexReport::default();

        let selected = self
            .select_documents(database, model.id(), options, &mut report)
            .await?;
        tracker.start(
            selected.iter().map(|document| document.info.path.as_str()),
            FileCounts {
                new_files: report.files_new,
                updated_files: report.files_updated,
                removed_files: report.files_removed,
            },
        );

        let pending = self
            .chunk_documents(&selected, options, tracker, &mut report)
            .await;

        if report.cancelled {
            info!("Index update cancelled while chunking");
            return Ok(report);
        }

        if pending.is_empty() {
            if !report.file_failures.is_empty()
                && !database
                    .repository()
                    .has_vectors_for_model(model.id())
                    .await?
            {
                return Err(VaultError::AllFilesFailed(report.file_failures.len()));
            }
            debug!("No chunks to embed");
            return Ok(report);
        }

        self.embed_and_store(database, model, &pending, options, tracker, &mut report)
            .await?;
        Ok(report)
    }

    /// Decide which documents need (re)indexing and drop chunks of documents that are gone
    async fn select_documents(
        &self,
        database: &DatabaseManager,
        model_id: &str,
        options: &UpdateOptions,
        report: &mut IndexReport,
    ) -> Result<Vec<SelectedDocument>> {
        let repository = database.repository();

        let eligible: Vec<DocumentInfo> = self
            .host
            .list_documents()
            .await?
            .into_iter()
            .filter(|document| self.filter.is_included(&document.path))
            .collect();
        report.files_scanned = eligible.len();

        if options.reindex_all {
            repository.clear_all_vectors(model_id).await?;
            let mut selected = Vec::with_capacity(eligible.len());
            for (index, document) in eligible.into_iter().enumerate() {
                if index > 0 && index % SCAN_YIELD_INTERVAL == 0 {
                    self.scheduler.yield_now().await;
                }
                selected.extend(self.load_new_document(document).await);
            }
            info!("Rebuilding index for all {} documents", selected.len());
            report.files_new = selected.len();
            return Ok(selected);
        }

        let indexed_mtimes: HashMap<String, i64> = repository.get_file_mtimes(model_id).await?;
        let eligible_paths: HashSet<&str> = eligible.iter().map(|d| d.path.as_str()).collect();

        let removed: Vec<String> = indexed_mtimes
            .keys()
            .filter(|path| !eligible_paths.contains(path.as_str()))
            .cloned()
            .collect();
        if !removed.is_empty() {
            repository
                .delete_vectors_for_multiple_files(&removed, model_id)
                .await?;
            info!("Removed chunks of {} deleted or excluded files", removed.len());
        }
        report.files_removed = removed.len();

        let mut selected = Vec::new();
        let mut updated = Vec::new();
        for (index, document) in eligible.into_iter().enumerate() {
            if index > 0 && index % SCAN_YIELD_INTERVAL == 0 {
                self.scheduler.yield_now().await;
            }

            match indexed_mtimes.get(&document.path) {
                None => selected.extend(self.load_new_document(document).await),
                Some(&indexed) if document.mtime > indexed => {
                    updated.push(document.path.clone());
                    selected.push(SelectedDocument {
                        info: document,
                        content: None,
                    });
                }
                Some(_) => {}
            }
        }

        if !updated.is_empty() {
            repository
                .delete_vectors_for_multiple_files(&updated, model_id)
                .await?;
        }

        report.files_new = selected.len() - updated.len();
        report.files_updated = updated.len();
        info!(
            "{} documents to index ({} new, {} changed)",
            selected.len(),
            report.files_new,
            report.files_updated
        );
        Ok(selected)
    }

    /// Read a new document up front; blank documents are skipped rather than selected
    async fn load_new_document(&self, document: DocumentInfo) -> Option<SelectedDocument> {
        match self.host.read_document(&document.path).await {
            Ok(raw) => {
                let content = sanitize_content(&raw);
                if content.trim().is_empty() {
                    debug!("Skipping empty document {}", document.path);
                    return None;
                }
                Some(SelectedDocument {
                    info: document,
                    content: Some(content),
                })
            }
            // Read again while chunking, where the failure is recorded
            Err(e) => {
                debug!("Could not read {} while scanning: {}", document.path, e);
                Some(SelectedDocument {
                    info: document,
                    content: None,
                })
            }
        }
    }

    /// Read and split every selected document; failures are recorded and contribute no chunks
    async fn chunk_documents(
        &self,
        documents: &[SelectedDocument],
        options: &UpdateOptions,
        tracker: &ProgressTracker<'_>,
        report: &mut IndexReport,
    ) -> Vec<PendingChunk> {
        let mut pending = Vec::new();

        for (index, document) in documents.iter().enumerate() {
            if index % CHUNK_YIELD_INTERVAL == 0 {
                self.scheduler.yield_now().await;
            }
            if options.is_cancelled() {
                report.cancelled = true;
                return pending;
            }

            let chunks = match self.chunk_document(document).await {
                Ok(chunks) => chunks,
                Err(e) => {
                    warn!("Failed to chunk {}: {}", document.info.path, e);
                    report.file_failures.push(FileFailure {
                        path: document.info.path.clone(),
                        error: e.to_string(),
                    });
                    Vec::new()
                }
            };

            tracker.file_chunked(&document.info.path, chunks.len());
            pending.extend(chunks);
        }

        debug!(
            "Chunked {} documents into {} chunks",
            documents.len(),
            pending.len()
        );
        pending
    }

    async fn chunk_document(&self, document: &SelectedDocument) -> Result<Vec<PendingChunk>> {
        let info = &document.info;
        let content = match &document.content {
            Some(content) => Cow::Borrowed(content.as_str()),
            None => Cow::Owned(sanitize_content(
                &self.host.read_document(&info.path).await?,
            )),
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let chunks = self.chunker.split(&content, &self.chunk_options)?;
        Ok(chunks
            .into_iter()
            .filter(|chunk| !chunk.content.trim().is_empty())
            .map(|chunk| PendingChunk {
                path: info.path.clone(),
                mtime: info.mtime,
                content: chunk.content,
                metadata: ChunkMetadata {
                    start_line: chunk.start_line,
                    end_line: chunk.end_line,
                },
            })
            .collect())
    }

    async fn embed_and_store(
        &self,
        database: &DatabaseManager,
        model: &dyn EmbeddingModel,
        pending: &[PendingChunk],
        options: &UpdateOptions,
        tracker: &ProgressTracker<'_>,
        report: &mut IndexReport,
    ) -> Result<()> {
        let repository = database.repository();
        let mut indexed_paths = HashSet::new();
        let batch_count = pending.len().div_ceil(self.batch_size);

        for (batch_index, batch) in pending.chunks(self.batch_size).enumerate() {
            if options.is_cancelled() {
                info!(
                    "Index update cancelled after {}/{} batches",
                    batch_index, batch_count
                );
                report.cancelled = true;
                break;
            }
            self.scheduler.yield_now().await;

            debug!(
                "Embedding batch {}/{} ({} chunks)",
                batch_index + 1,
                batch_count,
                batch.len()
            );

            let results = join_all(batch.iter().map(|chunk| {
                retry_with_backoff(
                    &self.retry_policy,
                    || model.get_embedding(&chunk.content),
                    |error: &EmbeddingError| {
                        if error.is_rate_limit() {
                            tracker.set_waiting_for_rate_limit(true);
                        }
                    },
                )
            }))
            .await;

            if let Some(config_error) = results
                .iter()
                .filter_map(|result| result.as_ref().err())
                .find(|error| error.is_config_error())
            {
                return Err(config_error.clone().into());
            }

            let mut rows = Vec::with_capacity(batch.len());
            let mut first_error = None;
            for (chunk, result) in batch.iter().zip(results) {
                match result {
                    Ok(embedding) => rows.push(NewEmbeddingChunk {
                        path: chunk.path.clone(),
                        mtime: chunk.mtime,
                        content: chunk.content.clone(),
                        model: model.id().to_string(),
                        dimension: embedding.len() as u32,
                        embedding,
                        metadata: chunk.metadata,
                    }),
                    Err(e) => {
                        first_error.get_or_insert_with(|| e.to_string());
                        report.chunk_failures.push(ChunkFailure {
                            path: chunk.path.clone(),
                            metadata: chunk.metadata,
                            error: e.to_string(),
                        });
                    }
                }
            }

            if rows.is_empty() {
                return Err(VaultError::BatchFailed(
                    first_error.unwrap_or_else(|| "no embeddings returned".to_string()),
                ));
            }

            repository.insert_vectors(&rows).await?;
            report.chunks_indexed += rows.len();
            indexed_paths.extend(rows.iter().map(|row| row.path.clone()));
            tracker.chunks_embedded(rows.iter().map(|row| row.path.as_str()));
        }

        report.files_indexed = indexed_paths.len();
        Ok(())
    }
}

/// One listing of everything that failed in a run
fn log_failures(report: &IndexReport) {
    if !report.file_failures.is_empty() {
        let mut listing = String::new();
        for failure in &report.file_failures {
            let _ = write!(listing, "\n  {}: {}", failure.path, failure.error);
        }
        warn!(
            "{} file(s) could not be indexed:{}",
            report.file_failures.len(),
            listing
        );
    }

    if !report.chunk_failures.is_empty() {
        let mut listing = String::new();
        for failure in &report.chunk_failures {
            let _ = write!(
                listing,
                "\n  {} (lines {}-{}): {}",
                failure.path, failure.metadata.start_line, failure.metadata.end_line, failure.error
            );
        }
        warn!(
            "{} chunk(s) could not be embedded:{}",
            report.chunk_failures.len(),
            listing
        );
    }
}
