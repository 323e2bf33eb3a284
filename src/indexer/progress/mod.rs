
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, info};

/// Key of the vault root in [`IndexProgress::folder_progress`]
pub const ROOT_FOLDER: &str = "/";

/// Counters for one folder, including everything below it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FolderProgress {
    pub completed_files: usize,
    pub total_files: usize,
    pub completed_chunks: usize,
    pub total_chunks: usize,
}

/// Progress of one indexing run. Reset per run and never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexProgress {
    /// Document that finished chunking most recently
    pub current_file: Option<String>,
    pub current_folder: Option<String>,
    pub new_files_count: usize,
    pub updated_files_count: usize,
    pub removed_files_count: usize,
    pub waiting_for_rate_limit: bool,
    /// Folder path without trailing slash, `/` for the root
    pub folder_progress: BTreeMap<String, FolderProgress>,
}

impl IndexProgress {
    /// Totals for the whole vault
    #[inline]
    pub fn root(&self) -> FolderProgress {
        self.folder_progress
            .get(ROOT_FOLDER)
            .copied()
            .unwrap_or_default()
    }

    #[inline]
    pub fn folder(&self, folder: &str) -> Option<&FolderProgress> {
        self.folder_progress.get(folder)
    }
}

/// How the selected documents of a run break down
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileCounts {
    pub new_files: usize,
    pub updated_files: usize,
    pub removed_files: usize,
}

/// Receives progress updates from an indexing run
pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: &IndexProgress);
}

/// Forwards every update over an unbounded channel, for callers that render progress elsewhere
#[derive(Debug, Clone)]
pub struct ChannelProgressSink {
    sender: mpsc::UnboundedSender<IndexProgress>,
}

impl ChannelProgressSink {
    #[inline]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<IndexProgress>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ProgressSink for ChannelProgressSink {
    #[inline]
    fn report(&self, progress: &IndexProgress) {
        // A dropped receiver only means nobody is watching
        let _ = self.sender.send(progress.clone());
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgressSink;

impl ProgressSink for LogProgressSink {
    #[inline]
    fn report(&self, progress: &IndexProgress) {
        let root = progress.root();
        if progress.waiting_for_rate_limit {
            info!("Waiting for the embedding provider's rate limit to reset");
        }
        debug!(
            "Indexed {}/{} files, {}/{} chunks",
            root.completed_files, root.total_files, root.completed_chunks, root.total_chunks
        );
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgressSink;

impl ProgressSink for NoopProgressSink {
    #[inline]
    fn report(&self, _progress: &IndexProgress) {}
}

/// Folder chain of a document: the root, then every ancestor folder down to its own
#[inline]
pub fn folder_chain(path: &str) -> Vec<String> {
    let mut chain = vec![ROOT_FOLDER.to_string()];
    let mut folder = String::new();
    let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    segments.pop();

    for segment in segments {
        if !folder.is_empty() {
            folder.push('/');
        }
        folder.push_str(segment);
        chain.push(folder.clone());
    }
    chain
}

/// Maintains the folder tree for a run and reports every change to the sink
pub struct ProgressTracker<'a> {
    state: Mutex<IndexProgress>,
    sink: &'a dyn ProgressSink,
}

impl<'a> ProgressTracker<'a> {
    #[inline]
    pub fn new(sink: &'a dyn ProgressSink) -> Self {
        Self {
            state: Mutex::new(IndexProgress::default()),
            sink,
        }
    }

    /// Build the tree for the selected documents, replacing any previous state
    #[inline]
    pub fn start<'p, I>(&self, paths: I, counts: FileCounts)
    where
        I: IntoIterator<Item = &'p str>,
    {
        self.update(|progress| {
            *progress = IndexProgress {
                new_files_count: counts.new_files,
                updated_files_count: counts.updated_files,
                removed_files_count: counts.removed_files,
                ..IndexProgress::default()
            };
            progress
                .folder_progress
                .insert(ROOT_FOLDER.to_string(), FolderProgress::default());
            for path in paths {
                for folder in folder_chain(path) {
                    progress.folder_progress.entry(folder).or_default().total_files += 1;
                }
            }
        });
    }

    /// A document finished chunking, failed or not
    #[inline]
    pub fn file_chunked(&self, path: &str, chunk_count: usize) {
        self.update(|progress| {
            let chain = folder_chain(path);
            progress.current_file = Some(path.to_string());
            progress.current_folder = chain.last().cloned();
            for folder in chain {
                let entry = progress.folder_progress.entry(folder).or_default();
                entry.completed_files += 1;
                entry.total_chunks += chunk_count;
            }
        });
    }

    /// Chunks that were embedded and stored, one path per chunk
    #[inline]
    pub fn chunks_embedded<'p, I>(&self, paths: I)
    where
        I: IntoIterator<Item = &'p str>,
    {
        self.update(|progress| {
            progress.waiting_for_rate_limit = false;
            for path in paths {
                for folder in folder_chain(path) {
                    progress.folder_progress.entry(folder).or_default().completed_chunks += 1;
                }
            }
        });
    }

    /// Re-emits only when the flag changes
    #[inline]
    pub fn set_waiting_for_rate_limit(&self, waiting: bool) {
        let changed = {
            let mut progress = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let changed = progress.waiting_for_rate_limit != waiting;
            progress.waiting_for_rate_limit = waiting;
            changed.then(|| progress.clone())
        };

        if let Some(progress) = changed {
            self.sink.report(&progress);
        }
    }

    #[inline]
    pub fn snapshot(&self) -> IndexProgress {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update<F>(&self, apply: F)
    where
        F: FnOnce(&mut IndexProgress),
    {
        let progress = {
            let mut progress = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            apply(&mut progress);
            progress.clone()
        };
        self.sink.report(&progress);
    }
}
