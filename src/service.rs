use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::indexing::scanner::{IndexEvent, IndexStatus, Indexer, ScanSummary};
use crate::search::llm::{Annotator, QueryExpander};
use crate::search::query::{QueryEngine, SearchResponse};
use crate::storage::index::{IndexStats, IndexStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Operations exposed to front ends: scanning, status, search, stats,
/// clearing and file access.
pub struct IndexService {
    config: Config,
    store: Arc<IndexStore>,
    indexer: Arc<Indexer>,
    query: QueryEngine,
    events: broadcast::Sender<IndexEvent>,
}

impl IndexService {
    pub fn new(
        config: Config,
        annotator: Arc<dyn Annotator>,
        expander: Arc<dyn QueryExpander>,
    ) -> Result<Self> {
        let store = Arc::new(IndexStore::open(&config)?);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let indexer = Arc::new(
            Indexer::new(store.clone(), annotator, &config).with_events(events.clone()),
        );
        let query = QueryEngine::new(store.clone(), expander);

        Ok(Self {
            config,
            store,
            indexer,
            query,
            events,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<IndexStore> {
        &self.store
    }

    pub fn indexer(&self) -> &Arc<Indexer> {
        &self.indexer
    }

    /// Start a background full scan of `folder`.
    ///
    /// The scan slot is claimed before this returns, so a second call made
    /// right after fails with [`Error::Conflict`].
    pub fn start_indexing(&self, folder: &Path) -> Result<JoinHandle<ScanSummary>> {
        if !folder.exists() {
            return Err(Error::InvalidInput(format!(
                "Directory does not exist: {}",
                folder.display()
            )));
        }
        if !folder.is_dir() {
            return Err(Error::InvalidInput(format!(
                "Path is not a directory: {}",
                folder.display()
            )));
        }
        let folder = std::fs::canonicalize(folder)?;

        self.indexer.begin_scan(&folder)?;
        info!("Indexing started for {}", folder.display());

        let indexer = self.indexer.clone();
        Ok(tokio::spawn(async move {
            indexer.run_claimed_scan(&folder).await
        }))
    }

    pub fn status(&self) -> IndexStatus {
        self.indexer.state().snapshot()
    }

    /// Search with the configured default limit when `limit` is `None`
    pub async fn search(&self, query: &str, limit: Option<usize>) -> Result<SearchResponse> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::InvalidInput("Search query is empty".to_string()));
        }
        let limit = limit.unwrap_or(self.config.search_limit).max(1);
        Ok(self.query.search(query, limit).await)
    }

    pub fn stats(&self) -> Result<IndexStats> {
        self.store.get_stats()
    }

    /// Remove every record. Refused while a scan is running.
    pub fn clear(&self) -> Result<()> {
        if self.indexer.state().is_indexing() {
            return Err(Error::Conflict(
                "Cannot clear the index while indexing is in progress".to_string(),
            ));
        }
        self.store.clear()?;
        info!("Index cleared");
        Ok(())
    }

    /// Open an indexed (or any existing) file for streaming its bytes
    pub async fn open_file(&self, path: &Path) -> Result<tokio::fs::File> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|_| Error::NotFound(format!("File not found: {}", path.display())))?;
        if !metadata.is_file() {
            return Err(Error::NotFound(format!("Not a file: {}", path.display())));
        }
        Ok(tokio::fs::File::open(path).await?)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<IndexEvent> {
        self.events.subscribe()
    }

    /// Folders registered by past scans
    pub fn watched_folders(&self) -> Result<Vec<PathBuf>> {
        Ok(self
            .store
            .get_watched_folders()?
            .into_iter()
            .map(|folder| PathBuf::from(folder.path))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::llm::Annotation;
    use async_trait::async_trait;
    use std::fs;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    struct EchoBackend;

    #[async_trait]
    impl Annotator for EchoBackend {
        async fn annotate_text(&self, text: &str, _file_name: &str) -> Result<Annotation> {
            Ok(Annotation {
                summary: text.to_string(),
                keywords: text.split_whitespace().map(str::to_lowercase).collect(),
            })
        }

        async fn describe_image(&self, _path: &Path, file_name: &str) -> Result<Annotation> {
            Ok(Annotation::degraded(format!("Image file: {}", file_name)))
        }
    }

    #[async_trait]
    impl QueryExpander for EchoBackend {
        async fn expand(&self, query: &str) -> Result<String> {
            Ok(query.to_string())
        }
    }

    fn service(temp_dir: &TempDir) -> IndexService {
        let config = Config::new(Some(temp_dir.path().join("fg"))).unwrap();
        IndexService::new(config, Arc::new(EchoBackend), Arc::new(EchoBackend)).unwrap()
    }

    #[tokio::test]
    async fn test_start_indexing_rejects_missing_folder() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir);

        let result = service.start_indexing(&temp_dir.path().join("nope"));
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert!(!service.status().is_indexing);
    }

    #[tokio::test]
    async fn test_start_indexing_then_search() {
        let temp_dir = TempDir::new().unwrap();
        let notes = temp_dir.path().join("notes");
        fs::create_dir_all(&notes).unwrap();
        fs::write(notes.join("trip.txt"), "Louvre museum visit").unwrap();

        let service = service(&temp_dir);
        let mut events = service.subscribe_events();
        let handle = service.start_indexing(&notes).unwrap();
        assert!(service.status().is_indexing);
        assert!(matches!(
            service.start_indexing(&notes),
            Err(Error::Conflict(_))
        ));

        let summary = handle.await.unwrap();
        assert_eq!(summary.total_files, 1);
        assert_eq!(summary.failed, 0);

        let status = service.status();
        assert!(!status.is_indexing);
        assert_eq!(status.processed_files, 1);
        assert_eq!(status.current_file, "Done!");

        let canonical = fs::canonicalize(&notes).unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            IndexEvent::FolderRegistered(canonical.clone())
        );
        assert_eq!(service.watched_folders().unwrap(), vec![canonical]);

        let response = service.search("museum", None).await.unwrap();
        assert_eq!(response.total_results, 1);
        assert_eq!(response.results[0].name, "trip.txt");
    }

    #[tokio::test]
    async fn test_search_rejects_empty_query() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir);
        assert!(matches!(
            service.search("   ", None).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_clear_refused_while_indexing() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir);

        service.indexer().begin_scan(temp_dir.path()).unwrap();
        assert!(matches!(service.clear(), Err(Error::Conflict(_))));

        service.indexer().state().end();
        service.clear().unwrap();
        assert_eq!(service.stats().unwrap().total_files, 0);
    }

    #[tokio::test]
    async fn test_open_file() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir);
        let path = temp_dir.path().join("a.txt");
        fs::write(&path, "hello").unwrap();

        let mut file = service.open_file(&path).await.unwrap();
        let mut contents = String::new();
        file.read_to_string(&mut contents).await.unwrap();
        assert_eq!(contents, "hello");

        assert!(matches!(
            service.open_file(&temp_dir.path().join("missing.txt")).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            service.open_file(temp_dir.path()).await,
            Err(Error::NotFound(_))
        ));
    }
}
