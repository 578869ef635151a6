use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::indexing::content::{ContentExtractor, DocumentExtractor, Extraction};
use crate::indexing::discovery::discover_files;
use crate::search::llm::{Annotation, Annotator};
use crate::storage::index::{file_modified_time, now_secs, FileRecord, IndexStore};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Stored and on-disk modification times closer than this count as unchanged
const STALENESS_TOLERANCE_SECS: f64 = 1.0;

/// Notifications published by the indexer
#[derive(Debug, Clone, PartialEq)]
pub enum IndexEvent {
    /// A folder was registered for watching
    FolderRegistered(PathBuf),
}

/// Snapshot of scan progress
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexStatus {
    pub is_indexing: bool,
    pub folder: String,
    pub total_files: usize,
    pub processed_files: usize,
    pub current_file: String,
    pub errors: Vec<String>,
    pub start_time: f64,
    pub end_time: Option<f64>,
    pub elapsed_seconds: f64,
}

/// Progress of the (single) full scan of this process
#[derive(Default)]
pub struct IndexingState {
    inner: Mutex<IndexStatus>,
}

impl IndexingState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, IndexStatus> {
        // A panic while holding the lock leaves plain data behind; keep going
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim the scan slot for `folder`. Returns false if a scan is running.
    pub fn begin(&self, folder: &str) -> bool {
        let mut state = self.lock();
        if state.is_indexing {
            return false;
        }
        *state = IndexStatus {
            is_indexing: true,
            folder: folder.to_string(),
            current_file: "Scanning folder...".to_string(),
            start_time: now_secs(),
            ..IndexStatus::default()
        };
        true
    }

    pub fn set_total(&self, total_files: usize) {
        self.lock().total_files = total_files;
    }

    pub fn update(&self, processed_files: usize, current_file: &str) {
        let mut state = self.lock();
        state.processed_files = processed_files;
        state.current_file = current_file.to_string();
    }

    pub fn push_error(&self, error: String) {
        self.lock().errors.push(error);
    }

    /// Release the scan slot
    pub fn end(&self) {
        let mut state = self.lock();
        state.is_indexing = false;
        state.end_time = Some(now_secs());
    }

    pub fn is_indexing(&self) -> bool {
        self.lock().is_indexing
    }

    /// Copy of the current state with elapsed time filled in
    pub fn snapshot(&self) -> IndexStatus {
        let mut status = self.lock().clone();
        status.elapsed_seconds = if status.start_time > 0.0 {
            let until = match (status.is_indexing, status.end_time) {
                (false, Some(end)) => end,
                _ => now_secs(),
            };
            ((until - status.start_time).max(0.0) * 10.0).round() / 10.0
        } else {
            0.0
        };
        status
    }
}

/// What [`Indexer::index_file`] did with a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    /// Already indexed with the same modification time
    Unchanged,
    /// Stored with summary and keywords
    Indexed,
    /// Stored with placeholder fields because no text could be extracted
    Placeholder,
}

/// Totals of a finished full scan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanSummary {
    pub total_files: usize,
    pub failed: usize,
}

/// Drives extraction and annotation of files into the index store
pub struct Indexer {
    store: Arc<IndexStore>,
    content: ContentExtractor,
    annotator: Arc<dyn Annotator>,
    state: Arc<IndexingState>,
    events: Option<broadcast::Sender<IndexEvent>>,
    max_file_size: u64,
}

impl Indexer {
    pub fn new(store: Arc<IndexStore>, annotator: Arc<dyn Annotator>, config: &Config) -> Self {
        Self {
            store,
            content: ContentExtractor::new(config.max_text_chars),
            annotator,
            state: Arc::new(IndexingState::new()),
            events: None,
            max_file_size: config.max_file_size,
        }
    }

    /// Publish [`IndexEvent`]s on `events`
    pub fn with_events(mut self, events: broadcast::Sender<IndexEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_document_extractor(mut self, extractor: Arc<dyn DocumentExtractor>) -> Self {
        self.content = self.content.with_document_extractor(extractor);
        self
    }

    pub fn state(&self) -> &Arc<IndexingState> {
        &self.state
    }

    pub fn store(&self) -> &Arc<IndexStore> {
        &self.store
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Index a single file, skipping it when its modification time is unchanged.
    ///
    /// Returns an error when the file cannot be read or stored; annotation
    /// failures degrade to placeholder summaries instead.
    pub async fn index_file(&self, path: &Path) -> Result<IndexOutcome> {
        let metadata = std::fs::metadata(path)?;
        let modified_time = file_modified_time(path)?;
        let path_str = path.to_string_lossy();

        if let Some(stored) = self.store.get_modified_time(&path_str)? {
            if (stored - modified_time).abs() < STALENESS_TOLERANCE_SECS {
                debug!("Unchanged: {}", path.display());
                return Ok(IndexOutcome::Unchanged);
            }
        }

        let mut record = FileRecord::new(path, metadata.len(), modified_time);
        let file_name = record.name.clone();

        let (annotation, raw_text) = match self.content.extract(path).await {
            Extraction::Failed { reason } => {
                return Err(Error::Extraction(format!("{}: {}", path.display(), reason)));
            }
            Extraction::NoContent { .. } => {
                record.summary = format!("Empty or binary file: {}", file_name);
                record.keywords = file_name;
                self.store.upsert(&record)?;
                return Ok(IndexOutcome::Placeholder);
            }
            Extraction::Image => {
                let annotation = match self.annotator.describe_image(path, &file_name).await {
                    Ok(annotation) => annotation,
                    Err(e) => {
                        warn!("Failed to describe image {}: {}", path.display(), e);
                        Annotation::degraded(format!("Image file: {}", file_name))
                    }
                };
                (annotation, String::new())
            }
            Extraction::Content { text, category } => {
                debug!(
                    "Extracted {} chars of {} from {}",
                    text.chars().count(),
                    category.as_str(),
                    path.display()
                );
                let annotation = match self.annotator.annotate_text(&text, &file_name).await {
                    Ok(annotation) => annotation,
                    Err(e) => {
                        warn!("Failed to annotate {}: {}", path.display(), e);
                        Annotation::degraded(format!("Error processing file: {}", file_name))
                    }
                };
                (annotation, text)
            }
        };

        record.summary = annotation.summary;
        record.keywords = annotation.keywords.join(" ");
        record.raw_text = raw_text;
        self.store.upsert(&record)?;

        info!("Indexed {}", path.display());
        Ok(IndexOutcome::Indexed)
    }

    /// Claim the scan slot without starting the scan
    pub fn begin_scan(&self, folder: &Path) -> Result<()> {
        if self.state.begin(&folder.to_string_lossy()) {
            Ok(())
        } else {
            Err(Error::Conflict("Indexing already in progress".to_string()))
        }
    }

    /// Scan `folder` and index every eligible file, one at a time.
    ///
    /// Rejected with [`Error::Conflict`] while another scan is running.
    pub async fn run_full_scan(&self, folder: &Path) -> Result<ScanSummary> {
        self.begin_scan(folder)?;
        Ok(self.run_claimed_scan(folder).await)
    }

    /// Body of a full scan whose slot was claimed with [`Self::begin_scan`]
    pub async fn run_claimed_scan(&self, folder: &Path) -> ScanSummary {
        info!("Starting full scan of {}", folder.display());

        let summary = match discover_files(folder, self.max_file_size) {
            Ok(files) => {
                self.state.set_total(files.len());
                self.register_folder(folder);
                self.index_sequentially(&files).await
            }
            Err(e) => {
                error!("Failed to scan {}: {}", folder.display(), e);
                self.state.push_error(format!("Fatal error: {}", e));
                ScanSummary {
                    total_files: 0,
                    failed: 0,
                }
            }
        };

        self.state.end();
        info!(
            "Finished scan of {}: {} files, {} failed",
            folder.display(),
            summary.total_files,
            summary.failed
        );
        summary
    }

    fn register_folder(&self, folder: &Path) {
        if let Err(e) = self.store.add_watched_folder(&folder.to_string_lossy()) {
            warn!("Failed to persist watched folder {}: {}", folder.display(), e);
        }
        if let Some(events) = &self.events {
            // No receivers just means nothing is watching yet
            let _ = events.send(IndexEvent::FolderRegistered(folder.to_path_buf()));
        }
    }

    // The annotation backend serializes requests; running files in parallel
    // only queues them there.
    async fn index_sequentially(&self, files: &[PathBuf]) -> ScanSummary {
        let mut failed = 0;
        for (i, file) in files.iter().enumerate() {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            self.state.update(i, &name);

            if let Err(e) = self.index_file(file).await {
                warn!("Failed to index {}: {}", file.display(), e);
                self.state.push_error(file.to_string_lossy().into_owned());
                failed += 1;
            }
        }
        self.state.update(files.len(), "Done!");

        ScanSummary {
            total_files: files.len(),
            failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_begin_is_single_flight() {
        let state = IndexingState::new();
        assert!(state.begin("/a"));
        assert!(!state.begin("/b"));
        assert_eq!(state.snapshot().folder, "/a");

        state.end();
        assert!(!state.is_indexing());
        assert!(state.begin("/b"));
        assert_eq!(state.snapshot().folder, "/b");
    }

    #[test]
    fn test_state_begin_resets_progress() {
        let state = IndexingState::new();
        state.begin("/a");
        state.set_total(3);
        state.update(2, "x.txt");
        state.push_error("/a/y.txt".to_string());
        state.end();

        state.begin("/b");
        let status = state.snapshot();
        assert_eq!(status.total_files, 0);
        assert_eq!(status.processed_files, 0);
        assert!(status.errors.is_empty());
        assert!(status.end_time.is_none());
    }

    #[test]
    fn test_snapshot_elapsed() {
        let state = IndexingState::new();
        assert_eq!(state.snapshot().elapsed_seconds, 0.0);

        state.begin("/a");
        std::thread::sleep(std::time::Duration::from_millis(150));
        state.end();

        let first = state.snapshot().elapsed_seconds;
        assert!(first >= 0.1);
        std::thread::sleep(std::time::Duration::from_millis(150));
        assert_eq!(state.snapshot().elapsed_seconds, first);
    }
}
