// Vault module
// The document collection being indexed: a host contract, the filesystem vault
// and include/exclude path filtering


use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use glob::{MatchOptions, Pattern};
use ignore::WalkBuilder;
use tracing::{debug, warn};

use crate::config::IndexingConfig;
use crate::{Result, VaultError};

/// A document as listed by its host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentInfo {
    /// Vault-relative, `/`-separated
    pub path: String,
    /// Modification time in milliseconds since the epoch
    pub mtime: i64,
}

/// Source of the documents to index
#[async_trait]
pub trait DocumentHost: Send + Sync {
    async fn list_documents(&self) -> Result<Vec<DocumentInfo>>;

    async fn read_document(&self, path: &str) -> Result<String>;
}

/// Markdown files under a directory on disk. Hidden files and folders are skipped.
#[derive(Debug, Clone)]
pub struct FsVault {
    root: PathBuf,
}

impl FsVault {
    #[inline]
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a vault-relative path, refusing anything that escapes the root
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(VaultError::Host(format!(
                "Path {} is outside the vault",
                path
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl DocumentHost for FsVault {
    #[inline]
    async fn list_documents(&self) -> Result<Vec<DocumentInfo>> {
        let root = self.root.clone();
        let documents = tokio::task::spawn_blocking(move || collect_markdown_files(&root))
            .await
            .map_err(|e| VaultError::Host(format!("Vault scan task failed: {}", e)))??;

        debug!(
            "Found {} markdown files in {}",
            documents.len(),
            self.root.display()
        );
        Ok(documents)
    }

    #[inline]
    async fn read_document(&self, path: &str) -> Result<String> {
        let full_path = self.resolve(path)?;
        tokio::fs::read_to_string(&full_path)
            .await
            .map_err(|e| VaultError::Host(format!("Failed to read {}: {}", path, e)))
    }
}

fn collect_markdown_files(root: &Path) -> Result<Vec<DocumentInfo>> {
    if !root.is_dir() {
        return Err(VaultError::Host(format!(
            "Vault directory {} does not exist",
            root.display()
        )));
    }

    let walker = WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .git_global(false)
        .git_exclude(false)
        .build();

    let mut documents = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable vault entry: {}", e);
                continue;
            }
        };

        let path = entry.path();
        if !entry.file_type().is_some_and(|file_type| file_type.is_file())
            || !path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("md"))
        {
            continue;
        }

        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let mtime = entry
            .metadata()
            .ok()
            .and_then(|metadata| metadata.modified().ok())
            .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |duration| duration.as_millis() as i64);

        documents.push(DocumentInfo {
            path: relative,
            mtime,
        });
    }

    documents.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(documents)
}

/// Include/exclude glob filter over vault-relative paths.
///
/// Exclusion wins over inclusion and an empty include list includes everything. A pattern
/// that matches a folder also matches everything below it, so `templates` excludes
/// `templates/daily.md`.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

impl PathFilter {
    #[inline]
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        Ok(Self {
            include: compile_patterns(include)?,
            exclude: compile_patterns(exclude)?,
        })
    }

    #[inline]
    pub fn from_config(config: &IndexingConfig) -> Result<Self> {
        Self::new(&config.include_patterns, &config.exclude_patterns)
    }

    #[inline]
    pub fn is_included(&self, path: &str) -> bool {
        if self
            .exclude
            .iter()
            .any(|pattern| pattern.matches_with(path, MATCH_OPTIONS))
        {
            return false;
        }

        self.include.is_empty()
            || self
                .include
                .iter()
                .any(|pattern| pattern.matches_with(path, MATCH_OPTIONS))
    }
}

fn compile_patterns(raw_patterns: &[String]) -> Result<Vec<Pattern>> {
    let mut patterns = Vec::with_capacity(raw_patterns.len() * 2);
    for raw in raw_patterns {
        let raw = raw.trim().trim_start_matches("./").trim_end_matches('/');
        if raw.is_empty() {
            continue;
        }

        let compile = |pattern: &str| {
            Pattern::new(pattern).map_err(|e| {
                VaultError::Config(format!("Invalid glob pattern '{}': {}", pattern, e))
            })
        };
        patterns.push(compile(raw)?);
        patterns.push(compile(&format!("{}/**", raw))?);
    }
    Ok(patterns)
}
