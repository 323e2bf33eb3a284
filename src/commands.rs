use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::config::Config;
use crate::database::{DatabaseManager, SearchResult, SearchScope};
use crate::embeddings::{EmbeddingModel, HttpEmbeddingClient};
use crate::indexer::progress::{ChannelProgressSink, IndexProgress};
use crate::indexer::{CancellationFlag, IndexReport, UpdateOptions, VaultIndexer};
use crate::scheduler::{Scheduler, TokioScheduler};
use crate::search::{VaultSearch, search_options};
use crate::vault::FsVault;

/// Lines of chunk content shown under each search hit
const PREVIEW_LINES: usize = 3;

async fn open_database(config: &Config) -> Result<DatabaseManager> {
    DatabaseManager::create(config, Arc::new(TokioScheduler))
        .await
        .context("Failed to open the index database")
}

/// Bring the index up to date with the markdown files under `vault_dir`
#[inline]
pub async fn index_vault(config: &Config, vault_dir: &Path, reindex_all: bool) -> Result<()> {
    if !vault_dir.is_dir() {
        anyhow::bail!("Vault directory not found: {}", vault_dir.display());
    }

    // The engine is opened last; once open it must be cleaned up
    let scheduler: Arc<dyn Scheduler> = Arc::new(TokioScheduler);
    let model = HttpEmbeddingClient::new(&config.embedding)?;
    let indexer = VaultIndexer::from_config(
        config,
        Arc::new(FsVault::new(vault_dir)),
        Arc::clone(&scheduler),
    )?;
    let database = DatabaseManager::create(config, scheduler)
        .await
        .context("Failed to open the index database")?;

    info!(
        "Indexing {} with model {}",
        vault_dir.display(),
        model.id()
    );

    let cancellation = CancellationFlag::new();
    let options = UpdateOptions {
        reindex_all,
        cancellation: Some(cancellation.clone()),
    };
    let (sink, mut receiver) = ChannelProgressSink::new();
    let bar = progress_bar();

    let update = indexer.update_vault_index(&database, &model, &options, &sink);
    tokio::pin!(update);

    let mut cancel_requested = false;
    let result = loop {
        tokio::select! {
            result = &mut update => break result,
            Some(progress) = receiver.recv() => render_progress(&bar, &progress),
            _ = tokio::signal::ctrl_c(), if !cancel_requested => {
                cancel_requested = true;
                cancellation.cancel();
                bar.println("Stopping after the current batch...");
            }
        }
    };
    while let Ok(progress) = receiver.try_recv() {
        render_progress(&bar, &progress);
    }
    bar.finish_and_clear();

    database.cleanup().await;

    let report = result?;
    print_report(&report);
    Ok(())
}

fn progress_bar() -> ProgressBar {
    if !console::user_attended_stderr() {
        return ProgressBar::hidden();
    }

    let bar = ProgressBar::new(0);
    match ProgressStyle::with_template("{spinner} [{pos}/{len} chunks] {wide_msg}") {
        Ok(progress_style) => bar.set_style(progress_style),
        Err(e) => warn!("Invalid progress template: {}", e),
    }
    bar
}

fn render_progress(bar: &ProgressBar, progress: &IndexProgress) {
    let root = progress.root();
    bar.set_length(root.total_chunks as u64);
    bar.set_position(root.completed_chunks as u64);

    if progress.waiting_for_rate_limit {
        bar.set_message("Waiting for the embedding provider's rate limit...");
    } else if let Some(file) = &progress.current_file {
        bar.set_message(file.clone());
    }
}

fn print_report(report: &IndexReport) {
    if report.cancelled {
        println!("{}", style("Indexing cancelled").yellow());
    } else {
        println!("{}", style("Index is up to date").green());
    }

    println!("  Files scanned: {}", report.files_scanned);
    println!("  New files: {}", report.files_new);
    println!("  Updated files: {}", report.files_updated);
    println!("  Removed files: {}", report.files_removed);
    println!("  Files indexed: {}", report.files_indexed);
    println!("  Chunks stored: {}", report.chunks_indexed);

    if !report.has_failures() {
        return;
    }

    println!();
    println!(
        "{}",
        style(format!(
            "{} file(s) and {} chunk(s) could not be indexed:",
            report.file_failures.len(),
            report.chunk_failures.len()
        ))
        .yellow()
    );
    for failure in &report.file_failures {
        println!("  {}: {}", failure.path, failure.error);
    }
    for failure in &report.chunk_failures {
        println!(
            "  {} (lines {}-{}): {}",
            failure.path, failure.metadata.start_line, failure.metadata.end_line, failure.error
        );
    }
}

/// Scope from `--file`/`--folder` arguments, `None` when neither was given
#[inline]
pub fn build_scope(files: Vec<String>, folders: Vec<String>) -> Option<SearchScope> {
    let scope = SearchScope { files, folders };
    (!scope.is_empty()).then_some(scope)
}

/// Embed `query` and print the closest chunks
#[inline]
pub async fn search_vault(
    config: &Config,
    query: &str,
    scope: Option<SearchScope>,
    limit: Option<usize>,
    min_similarity: Option<f32>,
) -> Result<()> {
    let model = HttpEmbeddingClient::new(&config.embedding)?;
    let database = open_database(config).await?;

    let mut options = search_options(&config.search, scope);
    if let Some(limit) = limit {
        options.limit = limit;
    }
    if let Some(min_similarity) = min_similarity {
        options.min_similarity = min_similarity;
    }

    let results = VaultSearch::new(database.repository(), &model)
        .search(query, &options)
        .await;
    database.cleanup().await;
    let results = results?;

    if results.is_empty() {
        println!("No matching notes found.");
        println!("Run 'vault-index index' first if the vault has not been indexed yet.");
        return Ok(());
    }

    for (rank, result) in results.iter().enumerate() {
        println!("{}", format_result(rank + 1, result));
    }

    Ok(())
}

fn format_result(rank: usize, result: &SearchResult) -> String {
    let mut lines = vec![format!(
        "{}. {}:{}-{} ({:.3})",
        rank,
        style(&result.path).cyan(),
        result.metadata.start_line,
        result.metadata.end_line,
        result.similarity
    )];

    lines.extend(
        result
            .content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .take(PREVIEW_LINES)
            .map(|line| format!("   {}", line.trim_end())),
    );

    lines.join("\n")
}

/// Per-model row counts and the location of the snapshot
#[inline]
pub async fn show_stats(config: &Config) -> Result<()> {
    let database = open_database(config).await?;
    let stats = database.repository().get_embedding_stats().await;
    let version = database.schema_version().await;
    database.cleanup().await;

    let stats = stats?;

    println!("{}", style("Vault Index Statistics").bold().cyan());
    println!("  Snapshot: {}", config.snapshot_path().display());
    match tokio::fs::metadata(config.snapshot_path()).await {
        Ok(metadata) => println!("  Snapshot size: {} bytes", metadata.len()),
        Err(_) => println!("  Snapshot size: not saved yet"),
    }
    match version {
        Ok(Some(version)) => println!("  Schema version: {}", version),
        Ok(None) => println!("  Schema version: none"),
        Err(e) => println!("  Schema version: unknown ({})", e),
    }
    println!();

    if stats.is_empty() {
        println!("No embeddings have been stored yet.");
        return Ok(());
    }

    for model in &stats {
        println!("{} ({} dimensions)", style(&model.model).bold(), model.dimension);
        println!("  Chunks: {}", model.row_count);
        println!("  Files: {}", model.file_count);
        println!("  Content size: {} bytes", model.data_bytes);
    }

    Ok(())
}

/// Compact the engine and write a fresh snapshot
#[inline]
pub async fn vacuum_index(config: &Config) -> Result<()> {
    let database = open_database(config).await?;
    let result = database.vacuum().await;
    database.cleanup().await;
    result?;

    println!("Index compacted: {}", config.snapshot_path().display());
    Ok(())
}
