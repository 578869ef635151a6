use crate::core::error::{Error, Result};
use crate::indexing::discovery::{discover_files, is_excluded_below, is_indexable_file};
use crate::indexing::scanner::{IndexEvent, Indexer};
use notify_debouncer_full::{
    new_debouncer,
    notify::{
        event::{ModifyKind, RenameMode},
        Event, EventKind, RecommendedWatcher, RecursiveMode,
    },
    DebounceEventResult, Debouncer, RecommendedCache,
};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Window in which the OS watcher stitches raw events (rename halves,
/// repeated writes) before handing them over
const EVENT_COALESCE_WINDOW: Duration = Duration::from_millis(250);

const EVENT_QUEUE_CAPACITY: usize = 1024;

/// A filesystem change relevant to the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileChange {
    Changed(PathBuf),
    Removed(PathBuf),
    Renamed { from: PathBuf, to: PathBuf },
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map_or(true, |name| name.to_string_lossy().starts_with('.'))
}

fn visible(path: &Path) -> Option<PathBuf> {
    (!is_hidden(path)).then(|| path.to_path_buf())
}

/// Map a raw watcher event to a [`FileChange`]. Access events and hidden
/// names yield `None`. Directory paths pass through; the scheduler expands
/// them.
pub fn convert_event(event: &Event) -> Option<FileChange> {
    let first = event.paths.first()?;

    match &event.kind {
        EventKind::Create(_) => visible(first).map(FileChange::Changed),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() >= 2 => {
            let to = &event.paths[1];
            match (is_hidden(first), is_hidden(to)) {
                (_, false) => Some(FileChange::Renamed {
                    from: first.clone(),
                    to: to.clone(),
                }),
                (false, true) => Some(FileChange::Removed(first.clone())),
                (true, true) => None,
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            visible(first).map(FileChange::Removed)
        }
        EventKind::Modify(ModifyKind::Name(_)) => visible(first).map(|path| {
            if path.exists() {
                FileChange::Changed(path)
            } else {
                FileChange::Removed(path)
            }
        }),
        EventKind::Modify(_) => visible(first).map(FileChange::Changed),
        EventKind::Remove(_) => visible(first).map(FileChange::Removed),
        _ => None,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Applies [`FileChange`]s to the index.
///
/// Removals are applied at once. Reindexing waits until a path has been
/// quiet for the debounce delay, so a burst of writes costs one
/// annotation.
#[derive(Clone)]
pub struct ChangeScheduler {
    indexer: Arc<Indexer>,
    delay: Duration,
    // Generation of the newest waiting job per path; a delayed job only
    // runs if it is still the newest when it wakes. Entries leave the map
    // when their job settles or the path is removed.
    pending: Arc<Mutex<HashMap<PathBuf, u64>>>,
    next_generation: Arc<AtomicU64>,
    roots: Arc<Mutex<HashSet<PathBuf>>>,
}

impl ChangeScheduler {
    pub fn new(indexer: Arc<Indexer>, delay: Duration) -> Self {
        Self {
            indexer,
            delay,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_generation: Arc::new(AtomicU64::new(0)),
            roots: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Consume changes until the sending side goes away
    pub async fn run(self, mut changes: mpsc::Receiver<FileChange>) {
        while let Some(change) = changes.recv().await {
            self.dispatch(change);
        }
        debug!("Change queue closed");
    }

    pub fn dispatch(&self, change: FileChange) {
        debug!("File change: {:?}", change);
        match change {
            FileChange::Changed(path) => {
                self.schedule(path);
            }
            FileChange::Removed(path) => self.remove(&path),
            FileChange::Renamed { from, to } => {
                self.remove(&from);
                self.schedule(to);
            }
        }
    }

    fn bump(&self, path: &Path) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        lock(&self.pending).insert(path.to_path_buf(), generation);
        generation
    }

    /// True if `generation` is still the newest for `path`; clears the entry
    fn settle(&self, path: &Path, generation: u64) -> bool {
        let mut pending = lock(&self.pending);
        if pending.get(path) == Some(&generation) {
            pending.remove(path);
            true
        } else {
            false
        }
    }

    fn remove(&self, path: &Path) {
        // A reindex still waiting for this path no longer settles
        lock(&self.pending).remove(path);

        let key = path.to_string_lossy();
        let store = self.indexer.store();
        let removed = match store.remove_file(&key) {
            Ok(true) => Ok(1),
            // No record under this exact path: it may have been a directory
            Ok(false) => store.remove_prefix(&key),
            Err(e) => Err(e),
        };
        match removed {
            Ok(0) => {}
            Ok(1) => info!("Removed from index: {}", path.display()),
            Ok(count) => info!("Removed {} files below {} from index", count, path.display()),
            Err(e) => error!("Failed to remove {} from index: {}", path.display(), e),
        }
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        lock(&self.pending).len()
    }

    fn schedule(&self, path: PathBuf) -> JoinHandle<()> {
        let generation = self.bump(&path);
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(this.delay).await;
            if this.settle(&path, generation) {
                this.reindex(&path).await;
            }
        })
    }

    fn is_excluded(&self, path: &Path) -> bool {
        lock(&self.roots)
            .iter()
            .any(|root| is_excluded_below(path, root))
    }

    async fn reindex(&self, path: &Path) {
        if self.is_excluded(path) {
            debug!("Skipping {}", path.display());
            return;
        }
        if path.is_dir() {
            // Files arriving with a moved or copied directory get no events
            // of their own
            match discover_files(path, self.indexer.max_file_size()) {
                Ok(files) => {
                    debug!("Scheduling {} files below {}", files.len(), path.display());
                    for file in files {
                        self.schedule(file);
                    }
                }
                Err(e) => warn!("Failed to scan {}: {}", path.display(), e),
            }
            return;
        }
        if !is_indexable_file(path, self.indexer.max_file_size()) {
            debug!("Skipping {}", path.display());
            return;
        }
        match self.indexer.index_file(path).await {
            Ok(outcome) => debug!("Reindexed {}: {:?}", path.display(), outcome),
            Err(e) => warn!("Failed to index {}: {}", path.display(), e),
        }
    }
}

/// Keeps the index in sync with every registered folder
pub struct ChangeWatcher {
    debouncer: Mutex<Debouncer<RecommendedWatcher, RecommendedCache>>,
    scheduler: ChangeScheduler,
}

impl ChangeWatcher {
    /// Start the OS watcher and the scheduler task. Must be called from
    /// within a tokio runtime.
    pub fn start(indexer: Arc<Indexer>, debounce: Duration) -> Result<Arc<Self>> {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);

        let debouncer = new_debouncer(
            EVENT_COALESCE_WINDOW,
            None,
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    for event in events {
                        if let Some(change) = convert_event(&event) {
                            if tx.blocking_send(change).is_err() {
                                return;
                            }
                        }
                    }
                }
                Err(errors) => {
                    for e in errors {
                        error!("Watch error: {}", e);
                    }
                }
            },
        )
        .map_err(|e| {
            Error::Io(std::io::Error::other(format!(
                "Failed to create file watcher: {}",
                e
            )))
        })?;

        let scheduler = ChangeScheduler::new(indexer, debounce);
        tokio::spawn(scheduler.clone().run(rx));

        Ok(Arc::new(Self {
            debouncer: Mutex::new(debouncer),
            scheduler,
        }))
    }

    /// Watch `folder` recursively and persist it. Returns false if it was
    /// already watched or is not a directory.
    pub fn add_watch(&self, folder: &Path) -> Result<bool> {
        if !folder.is_dir() {
            warn!("Not watching {}: not a directory", folder.display());
            return Ok(false);
        }
        let folder = std::fs::canonicalize(folder)?;

        let mut roots = lock(&self.scheduler.roots);
        if roots.contains(&folder) {
            return Ok(false);
        }

        lock(&self.debouncer)
            .watch(&folder, RecursiveMode::Recursive)
            .map_err(|e| {
                Error::Io(std::io::Error::other(format!(
                    "Failed to watch {}: {}",
                    folder.display(),
                    e
                )))
            })?;
        roots.insert(folder.clone());
        drop(roots);

        self.scheduler
            .indexer
            .store()
            .add_watched_folder(&folder.to_string_lossy())?;
        info!("Watching {}", folder.display());
        Ok(true)
    }

    /// Re-establish watches for every folder stored by earlier runs.
    /// Folders that no longer exist are skipped.
    pub fn load_persisted(&self) -> Result<usize> {
        let mut added = 0;
        for folder in self.scheduler.indexer.store().get_watched_folders()? {
            let path = PathBuf::from(&folder.path);
            match self.add_watch(&path) {
                Ok(true) => added += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to restore watch on {}: {}", folder.path, e),
            }
        }
        Ok(added)
    }

    /// Add a watch for each folder the indexer registers from now on
    pub fn follow_registrations(
        self: &Arc<Self>,
        mut events: broadcast::Receiver<IndexEvent>,
    ) -> JoinHandle<()> {
        let watcher = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(IndexEvent::FolderRegistered(folder)) => {
                        if let Err(e) = watcher.add_watch(&folder) {
                            error!("Failed to watch {}: {}", folder.display(), e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Missed {} folder registrations", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    pub fn watched_folders(&self) -> Vec<PathBuf> {
        let mut folders: Vec<PathBuf> = lock(&self.scheduler.roots).iter().cloned().collect();
        folders.sort();
        folders
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::search::llm::{Annotation, Annotator};
    use crate::storage::index::IndexStore;
    use notify_debouncer_full::notify::event::{AccessKind, CreateKind, DataChange, RemoveKind};
    use tempfile::TempDir;

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        let mut event = Event::new(kind);
        for path in paths {
            event = event.add_path(PathBuf::from(path));
        }
        event
    }

    #[test]
    fn test_convert_create() {
        let change = convert_event(&event(EventKind::Create(CreateKind::File), &["/d/a.txt"]));
        assert_eq!(change, Some(FileChange::Changed(PathBuf::from("/d/a.txt"))));

        let folder = convert_event(&event(EventKind::Create(CreateKind::Folder), &["/d/sub"]));
        assert_eq!(folder, Some(FileChange::Changed(PathBuf::from("/d/sub"))));
    }

    #[test]
    fn test_convert_modify_and_remove() {
        let change = convert_event(&event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &["/d/a.txt"],
        ));
        assert_eq!(change, Some(FileChange::Changed(PathBuf::from("/d/a.txt"))));

        let change = convert_event(&event(EventKind::Remove(RemoveKind::File), &["/d/a.txt"]));
        assert_eq!(change, Some(FileChange::Removed(PathBuf::from("/d/a.txt"))));

        let change = convert_event(&event(EventKind::Remove(RemoveKind::Folder), &["/d/sub"]));
        assert_eq!(change, Some(FileChange::Removed(PathBuf::from("/d/sub"))));

        let hidden = convert_event(&event(EventKind::Remove(RemoveKind::Folder), &["/d/.git"]));
        assert_eq!(hidden, None);
    }

    #[test]
    fn test_convert_rename() {
        let change = convert_event(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/d/old.txt", "/d/new.txt"],
        ));
        assert_eq!(
            change,
            Some(FileChange::Renamed {
                from: PathBuf::from("/d/old.txt"),
                to: PathBuf::from("/d/new.txt"),
            })
        );

        let change = convert_event(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            &["/d/old.txt"],
        ));
        assert_eq!(change, Some(FileChange::Removed(PathBuf::from("/d/old.txt"))));
    }

    #[test]
    fn test_convert_rename_to_and_from_hidden() {
        // Editors save through a hidden temp file and rename it into place
        let change = convert_event(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/d/.a.txt.swp", "/d/a.txt"],
        ));
        assert_eq!(
            change,
            Some(FileChange::Renamed {
                from: PathBuf::from("/d/.a.txt.swp"),
                to: PathBuf::from("/d/a.txt"),
            })
        );

        let change = convert_event(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/d/a.txt", "/d/.trash"],
        ));
        assert_eq!(change, Some(FileChange::Removed(PathBuf::from("/d/a.txt"))));
    }

    #[test]
    fn test_convert_ignores_hidden_and_access() {
        assert_eq!(
            convert_event(&event(EventKind::Create(CreateKind::File), &["/d/.DS_Store"])),
            None
        );
        assert_eq!(
            convert_event(&event(
                EventKind::Access(AccessKind::Any),
                &["/d/a.txt"]
            )),
            None
        );
        assert_eq!(convert_event(&event(EventKind::Any, &[])), None);
    }

    struct Placeholders;

    #[async_trait::async_trait]
    impl Annotator for Placeholders {
        async fn annotate_text(&self, _text: &str, file_name: &str) -> Result<Annotation> {
            Ok(Annotation::degraded(file_name.to_string()))
        }

        async fn describe_image(&self, _path: &Path, file_name: &str) -> Result<Annotation> {
            Ok(Annotation::degraded(file_name.to_string()))
        }
    }

    fn scheduler(temp_dir: &TempDir, delay: Duration) -> ChangeScheduler {
        let config = Config::new(Some(temp_dir.path().join("fg"))).unwrap();
        let store = Arc::new(IndexStore::open(&config).unwrap());
        let indexer = Arc::new(Indexer::new(store, Arc::new(Placeholders), &config));
        ChangeScheduler::new(indexer, delay)
    }

    #[tokio::test]
    async fn test_removals_leave_no_pending_state() {
        let temp_dir = TempDir::new().unwrap();
        let scheduler = scheduler(&temp_dir, Duration::from_millis(50));

        for i in 0..500 {
            scheduler.dispatch(FileChange::Removed(PathBuf::from(format!("/gone/{}.txt", i))));
        }
        assert_eq!(scheduler.pending_len(), 0);

        let path = temp_dir.path().join("short-lived.txt");
        scheduler.dispatch(FileChange::Changed(path.clone()));
        assert_eq!(scheduler.pending_len(), 1);
        scheduler.dispatch(FileChange::Removed(path));
        assert_eq!(scheduler.pending_len(), 0);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(scheduler.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_settled_jobs_leave_no_pending_state() {
        let temp_dir = TempDir::new().unwrap();
        let scheduler = scheduler(&temp_dir, Duration::from_millis(50));

        for i in 0..20 {
            scheduler.dispatch(FileChange::Changed(temp_dir.path().join(format!("{}.txt", i))));
        }
        assert_eq!(scheduler.pending_len(), 20);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(scheduler.pending_len(), 0);
    }
}
