use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::storage::terms::{bm25_term, idf, query_terms, term_frequencies};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Key: absolute file path, Value: JSON serialized FileRecord
const FILES_TABLE: TableDefinition<&str, &str> = TableDefinition::new("files");

/// Key: (term, file path), Value: term frequency in that record
const POSTINGS_TABLE: TableDefinition<(&str, &str), u32> = TableDefinition::new("term_postings");

/// Key: file path, Value: number of indexed tokens in the record
const DOC_LENGTHS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("doc_lengths");

/// Key: folder path, Value: JSON serialized WatchedFolder
const WATCHED_FOLDERS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("watched_folders");

const META_TABLE: TableDefinition<&str, u64> = TableDefinition::new("meta");

// Sum of all doc lengths; average length = total / record count.
const META_TOTAL_TOKENS_KEY: &str = "total_tokens";

/// One indexed file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub name: String,
    /// Lowercase extension without the dot, empty if none
    pub extension: String,
    pub size_bytes: u64,
    /// Seconds since the epoch, as reported by the filesystem
    pub modified_time: f64,
    pub summary: String,
    /// Space-joined keyword list
    pub keywords: String,
    /// Truncated extracted text, empty for images
    pub raw_text: String,
    pub indexed_at: f64,
}

impl FileRecord {
    /// Create a record for `path` with empty annotation fields
    pub fn new(path: &Path, size_bytes: u64, modified_time: f64) -> Self {
        Self {
            path: path.to_string_lossy().into_owned(),
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            extension: file_extension(path),
            size_bytes,
            modified_time,
            summary: String::new(),
            keywords: String::new(),
            raw_text: String::new(),
            indexed_at: now_secs(),
        }
    }

    /// Fields projected into the inverted index
    fn indexed_fields(&self) -> [&str; 4] {
        [
            self.name.as_str(),
            self.summary.as_str(),
            self.keywords.as_str(),
            self.raw_text.as_str(),
        ]
    }

    fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::store("Failed to serialize file record", e))
    }

    fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::store("Failed to deserialize file record", e))
    }
}

/// A ranked search match
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub path: String,
    pub name: String,
    pub extension: String,
    pub size_bytes: u64,
    pub modified_time: f64,
    pub summary: String,
    pub keywords: String,
    pub relevance: f64,
}

impl SearchHit {
    fn from_record(record: FileRecord, relevance: f64) -> Self {
        Self {
            path: record.path,
            name: record.name,
            extension: record.extension,
            size_bytes: record.size_bytes,
            modified_time: record.modified_time,
            summary: record.summary,
            keywords: record.keywords,
            relevance,
        }
    }
}

/// A root folder under observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchedFolder {
    pub path: String,
    pub added_at: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtensionCount {
    pub extension: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub total_files: u64,
    /// Ordered by descending count
    pub by_extension: Vec<ExtensionCount>,
}

/// Persistent file records plus the inverted term index derived from them.
///
/// Every mutation of a record and its postings happens inside a single redb
/// write transaction, so readers never observe a record without its terms
/// or terms without their record.
pub struct IndexStore {
    db: Database,
}

impl IndexStore {
    /// Open or create the index store
    pub fn open(config: &Config) -> Result<Self> {
        if let Some(parent) = config.database_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = if config.database_path.exists() {
            Database::open(&config.database_path).map_err(|e| {
                let msg = e.to_string();
                if msg.to_lowercase().contains("lock") {
                    Error::Store("Index database is locked. Another file-guessr process may be running. Close other instances and try again.".to_string())
                } else {
                    Error::store("Failed to open index database", e)
                }
            })?
        } else {
            Database::create(&config.database_path)
                .map_err(|e| Error::store("Failed to create index database", e))?
        };

        let store = Self { db };
        store.write(|txn| {
            create_tables(txn)?;
            Ok(())
        })?;

        Ok(store)
    }

    /// Run `f` in a write transaction; commits on success, aborts on error.
    fn write<T>(&self, f: impl FnOnce(&redb::WriteTransaction) -> Result<T>) -> Result<T> {
        let txn = self
            .db
            .begin_write()
            .map_err(|e| Error::store("Failed to begin write transaction", e))?;

        match f(&txn) {
            Ok(value) => {
                txn.commit()
                    .map_err(|e| Error::store("Failed to commit transaction", e))?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort_err) = txn.abort() {
                    warn!("Failed to abort transaction: {}", abort_err);
                }
                Err(e)
            }
        }
    }

    fn read(&self) -> Result<redb::ReadTransaction> {
        self.db
            .begin_read()
            .map_err(|e| Error::store("Failed to begin read transaction", e))
    }

    /// Insert a record, or replace every field of the existing one
    pub fn upsert(&self, record: &FileRecord) -> Result<()> {
        self.write(|txn| {
            remove_entry(txn, &record.path)?;
            insert_entry(txn, record)
        })?;
        debug!("Upserted {}", record.path);
        Ok(())
    }

    /// Remove a file and its terms; unknown paths are ignored
    pub fn remove_file(&self, path: &str) -> Result<bool> {
        let removed = self.write(|txn| remove_entry(txn, path))?;
        if removed {
            debug!("Removed {}", path);
        }
        Ok(removed)
    }

    /// Remove every record below directory `dir`. Returns how many went.
    pub fn remove_prefix(&self, dir: &str) -> Result<usize> {
        let separator = std::path::MAIN_SEPARATOR;
        let prefix = format!("{}{}", dir.trim_end_matches(separator), separator);

        let removed = self.write(|txn| {
            let paths = {
                let files = txn
                    .open_table(FILES_TABLE)
                    .map_err(|e| Error::store("Failed to open table", e))?;
                let mut paths = Vec::new();
                for item in files
                    .range(prefix.as_str()..)
                    .map_err(|e| Error::store("Failed to iterate table", e))?
                {
                    let (key, _value) =
                        item.map_err(|e| Error::store("Failed to read table item", e))?;
                    if !key.value().starts_with(prefix.as_str()) {
                        break;
                    }
                    paths.push(key.value().to_string());
                }
                paths
            };

            for path in &paths {
                remove_entry(txn, path)?;
            }
            Ok(paths.len())
        })?;

        if removed > 0 {
            debug!("Removed {} records below {}", removed, dir);
        }
        Ok(removed)
    }

    /// Get a single record
    pub fn get(&self, path: &str) -> Result<Option<FileRecord>> {
        let txn = self.read()?;
        let files = txn
            .open_table(FILES_TABLE)
            .map_err(|e| Error::store("Failed to open table", e))?;

        let json = files
            .get(path)
            .map_err(|e| Error::store("Failed to get file record", e))?
            .map(|guard| guard.value().to_string());

        json.as_deref().map(FileRecord::from_json).transpose()
    }

    /// Stored modification time, used for staleness checks
    pub fn get_modified_time(&self, path: &str) -> Result<Option<f64>> {
        Ok(self.get(path)?.map(|record| record.modified_time))
    }

    /// Ranked OR-search over the sanitized terms of `query`.
    ///
    /// Falls back to one lookup per term when the combined lookup fails,
    /// merging in first-seen order. Fails if every per-term lookup fails too.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let terms = query_terms(query);
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        match self.ranked_lookup(&terms, limit) {
            Ok(hits) => Ok(hits),
            Err(e) => {
                warn!("Combined lookup for {:?} failed, retrying per term: {}", terms, e);
                let mut seen = HashSet::new();
                let mut merged = Vec::new();
                let mut failed = 0;
                for term in &terms {
                    match self.ranked_lookup(std::slice::from_ref(term), limit) {
                        Ok(hits) => {
                            for hit in hits {
                                if seen.insert(hit.path.clone()) {
                                    merged.push(hit);
                                }
                            }
                        }
                        Err(term_err) => {
                            warn!("Lookup for term '{}' failed: {}", term, term_err);
                            failed += 1;
                        }
                    }
                }
                if failed == terms.len() {
                    return Err(e);
                }
                merged.truncate(limit);
                Ok(merged)
            }
        }
    }

    fn ranked_lookup(&self, terms: &[String], limit: usize) -> Result<Vec<SearchHit>> {
        let txn = self.read()?;
        let open_err = |e| Error::store("Failed to open table", e);
        let files = txn.open_table(FILES_TABLE).map_err(open_err)?;
        let postings = txn.open_table(POSTINGS_TABLE).map_err(open_err)?;
        let lengths = txn.open_table(DOC_LENGTHS_TABLE).map_err(open_err)?;
        let meta = txn.open_table(META_TABLE).map_err(open_err)?;

        let doc_count = files
            .len()
            .map_err(|e| Error::store("Failed to count file records", e))?;
        if doc_count == 0 {
            return Ok(Vec::new());
        }

        let total_tokens = meta
            .get(META_TOTAL_TOKENS_KEY)
            .map_err(|e| Error::store("Failed to read index metadata", e))?
            .map(|guard| guard.value())
            .unwrap_or(0);
        let avg_doc_len = total_tokens as f64 / doc_count as f64;

        let mut scores: HashMap<String, f64> = HashMap::new();
        for term in terms {
            let mut matches: Vec<(String, u32)> = Vec::new();
            for item in postings
                .range((term.as_str(), "")..)
                .map_err(|e| Error::store("Failed to read postings", e))?
            {
                let (key, tf) = item.map_err(|e| Error::store("Failed to read posting", e))?;
                let (entry_term, path) = key.value();
                if entry_term != term.as_str() {
                    break;
                }
                matches.push((path.to_string(), tf.value()));
            }
            if matches.is_empty() {
                continue;
            }
            let term_idf = idf(doc_count, matches.len() as u64);

            for (path, tf) in matches {
                let doc_len = lengths
                    .get(path.as_str())
                    .map_err(|e| Error::store("Failed to read doc length", e))?
                    .map(|guard| guard.value())
                    .unwrap_or(0);
                *scores.entry(path).or_insert(0.0) += bm25_term(term_idf, tf, doc_len, avg_doc_len);
            }
        }

        let mut ranked: Vec<(String, f64)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(limit);

        let mut hits = Vec::with_capacity(ranked.len());
        for (path, score) in ranked {
            let json = files
                .get(path.as_str())
                .map_err(|e| Error::store("Failed to get file record", e))?
                .map(|guard| guard.value().to_string());
            match json {
                Some(json) => hits.push(SearchHit::from_record(FileRecord::from_json(&json)?, score)),
                None => warn!("Posting references missing record {}", path),
            }
        }

        Ok(hits)
    }

    /// Total record count and counts per extension
    pub fn get_stats(&self) -> Result<IndexStats> {
        let txn = self.read()?;
        let files = txn
            .open_table(FILES_TABLE)
            .map_err(|e| Error::store("Failed to open table", e))?;

        let mut counts: HashMap<String, u64> = HashMap::new();
        let mut total_files = 0u64;
        for item in files
            .iter()
            .map_err(|e| Error::store("Failed to iterate table", e))?
        {
            let (_key, value) = item.map_err(|e| Error::store("Failed to read table item", e))?;
            let record = FileRecord::from_json(value.value())?;
            *counts.entry(record.extension).or_insert(0) += 1;
            total_files += 1;
        }

        let mut by_extension: Vec<ExtensionCount> = counts
            .into_iter()
            .map(|(extension, count)| ExtensionCount { extension, count })
            .collect();
        by_extension.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.extension.cmp(&b.extension)));

        Ok(IndexStats {
            total_files,
            by_extension,
        })
    }

    /// Delete all records and watched folders, leaving a fresh store
    pub fn clear(&self) -> Result<()> {
        self.write(|txn| {
            for result in [
                txn.delete_table(FILES_TABLE),
                txn.delete_table(POSTINGS_TABLE),
                txn.delete_table(DOC_LENGTHS_TABLE),
                txn.delete_table(WATCHED_FOLDERS_TABLE),
                txn.delete_table(META_TABLE),
            ] {
                result.map_err(|e| Error::store("Failed to delete table", e))?;
            }
            create_tables(txn)
        })?;
        debug!("Cleared index store");
        Ok(())
    }

    /// Drop the derived term index and rebuild it from the file records
    pub fn rebuild_index(&self) -> Result<usize> {
        self.write(|txn| {
            let records = {
                let files = txn
                    .open_table(FILES_TABLE)
                    .map_err(|e| Error::store("Failed to open table", e))?;
                let mut records = Vec::new();
                for item in files
                    .iter()
                    .map_err(|e| Error::store("Failed to iterate table", e))?
                {
                    let (_key, value) =
                        item.map_err(|e| Error::store("Failed to read table item", e))?;
                    records.push(FileRecord::from_json(value.value())?);
                }
                records
            };

            for result in [
                txn.delete_table(POSTINGS_TABLE),
                txn.delete_table(DOC_LENGTHS_TABLE),
                txn.delete_table(META_TABLE),
            ] {
                result.map_err(|e| Error::store("Failed to delete table", e))?;
            }
            create_tables(txn)?;

            for record in &records {
                insert_entry(txn, record)?;
            }
            Ok(records.len())
        })
    }

    /// Register a folder; re-adding keeps the original timestamp
    pub fn add_watched_folder(&self, path: &str) -> Result<()> {
        self.write(|txn| {
            let mut table = txn
                .open_table(WATCHED_FOLDERS_TABLE)
                .map_err(|e| Error::store("Failed to open table", e))?;

            let exists = table
                .get(path)
                .map_err(|e| Error::store("Failed to get watched folder", e))?
                .is_some();
            if !exists {
                let folder = WatchedFolder {
                    path: path.to_string(),
                    added_at: now_secs(),
                };
                let json = serde_json::to_string(&folder)
                    .map_err(|e| Error::store("Failed to serialize watched folder", e))?;
                table
                    .insert(path, json.as_str())
                    .map_err(|e| Error::store("Failed to insert watched folder", e))?;
            }
            Ok(())
        })
    }

    pub fn get_watched_folders(&self) -> Result<Vec<WatchedFolder>> {
        let txn = self.read()?;
        let table = txn
            .open_table(WATCHED_FOLDERS_TABLE)
            .map_err(|e| Error::store("Failed to open table", e))?;

        let mut folders = Vec::new();
        for item in table
            .iter()
            .map_err(|e| Error::store("Failed to iterate table", e))?
        {
            let (_key, value) = item.map_err(|e| Error::store("Failed to read table item", e))?;
            let folder: WatchedFolder = serde_json::from_str(value.value())
                .map_err(|e| Error::store("Failed to deserialize watched folder", e))?;
            folders.push(folder);
        }
        Ok(folders)
    }

    /// Store `json` verbatim as the record for `path`, reachable through `terms`
    #[cfg(test)]
    pub(crate) fn insert_raw_record(&self, path: &str, json: &str, terms: &[&str]) -> Result<()> {
        self.write(|txn| {
            let open_err = |e| Error::store("Failed to open table", e);
            let mut files = txn.open_table(FILES_TABLE).map_err(open_err)?;
            files
                .insert(path, json)
                .map_err(|e| Error::store("Failed to insert file record", e))?;
            let mut postings = txn.open_table(POSTINGS_TABLE).map_err(open_err)?;
            for term in terms {
                postings
                    .insert((*term, path), 1)
                    .map_err(|e| Error::store("Failed to write posting", e))?;
            }
            Ok(())
        })
    }
}

fn create_tables(txn: &redb::WriteTransaction) -> Result<()> {
    let open_err = |e| Error::store("Failed to open table", e);
    txn.open_table(FILES_TABLE).map_err(open_err)?;
    txn.open_table(POSTINGS_TABLE).map_err(open_err)?;
    txn.open_table(DOC_LENGTHS_TABLE).map_err(open_err)?;
    txn.open_table(WATCHED_FOLDERS_TABLE).map_err(open_err)?;
    txn.open_table(META_TABLE).map_err(open_err)?;
    Ok(())
}

fn read_total_tokens(meta: &impl ReadableTable<&'static str, u64>) -> Result<u64> {
    Ok(meta
        .get(META_TOTAL_TOKENS_KEY)
        .map_err(|e| Error::store("Failed to read index metadata", e))?
        .map(|guard| guard.value())
        .unwrap_or(0))
}

/// Remove a record together with its postings and length. Returns whether
/// a record existed.
fn remove_entry(txn: &redb::WriteTransaction, path: &str) -> Result<bool> {
    let open_err = |e| Error::store("Failed to open table", e);
    let mut files = txn.open_table(FILES_TABLE).map_err(open_err)?;
    let mut postings = txn.open_table(POSTINGS_TABLE).map_err(open_err)?;
    let mut lengths = txn.open_table(DOC_LENGTHS_TABLE).map_err(open_err)?;
    let mut meta = txn.open_table(META_TABLE).map_err(open_err)?;

    let previous = files
        .remove(path)
        .map_err(|e| Error::store("Failed to remove file record", e))?
        .map(|guard| guard.value().to_string());
    let Some(previous) = previous else {
        return Ok(false);
    };
    let previous = FileRecord::from_json(&previous)?;

    let (freqs, _) = term_frequencies(previous.indexed_fields());
    for term in freqs.keys() {
        postings
            .remove((term.as_str(), path))
            .map_err(|e| Error::store("Failed to remove posting", e))?;
    }

    let old_len = lengths
        .remove(path)
        .map_err(|e| Error::store("Failed to remove doc length", e))?
        .map(|guard| guard.value())
        .unwrap_or(0);
    let total = read_total_tokens(&meta)?.saturating_sub(old_len);
    meta.insert(META_TOTAL_TOKENS_KEY, total)
        .map_err(|e| Error::store("Failed to write index metadata", e))?;

    Ok(true)
}

/// Write a record and add its terms. The path must not already be indexed.
fn insert_entry(txn: &redb::WriteTransaction, record: &FileRecord) -> Result<()> {
    let open_err = |e| Error::store("Failed to open table", e);
    let mut files = txn.open_table(FILES_TABLE).map_err(open_err)?;
    let mut postings = txn.open_table(POSTINGS_TABLE).map_err(open_err)?;
    let mut lengths = txn.open_table(DOC_LENGTHS_TABLE).map_err(open_err)?;
    let mut meta = txn.open_table(META_TABLE).map_err(open_err)?;

    let json = record.to_json()?;
    files
        .insert(record.path.as_str(), json.as_str())
        .map_err(|e| Error::store("Failed to insert file record", e))?;

    let (freqs, doc_len) = term_frequencies(record.indexed_fields());
    for (term, tf) in freqs {
        postings
            .insert((term.as_str(), record.path.as_str()), tf)
            .map_err(|e| Error::store("Failed to write posting", e))?;
    }

    lengths
        .insert(record.path.as_str(), doc_len)
        .map_err(|e| Error::store("Failed to write doc length", e))?;
    let total = read_total_tokens(&meta)? + doc_len;
    meta.insert(META_TOTAL_TOKENS_KEY, total)
        .map_err(|e| Error::store("Failed to write index metadata", e))?;

    Ok(())
}

/// Lowercase extension without the leading dot
pub fn file_extension(path: &Path) -> String {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Current time as fractional seconds since the epoch
pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Get file modification time as fractional seconds since the epoch
pub fn file_modified_time(path: &Path) -> Result<f64> {
    let metadata = std::fs::metadata(path)?;
    let modified = metadata.modified()?;
    let duration = modified.duration_since(UNIX_EPOCH).map_err(|e| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("Failed to get modification time: {}", e),
        ))
    })?;
    Ok(duration.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn open_store(temp_dir: &TempDir) -> IndexStore {
        let config = Config::new(Some(temp_dir.path().join("fg"))).unwrap();
        config.init().unwrap();
        IndexStore::open(&config).unwrap()
    }

    fn record(path: &str, summary: &str, keywords: &str, text: &str) -> FileRecord {
        let mut record = FileRecord::new(Path::new(path), 42, 1_700_000_000.0);
        record.summary = summary.to_string();
        record.keywords = keywords.to_string();
        record.raw_text = text.to_string();
        record
    }

    fn paths(hits: &[SearchHit]) -> Vec<&str> {
        hits.iter().map(|h| h.path.as_str()).collect()
    }

    #[test]
    fn test_file_record_fields() {
        let record = FileRecord::new(Path::new("/data/Trip/Notes.TXT"), 10, 5.5);
        assert_eq!(record.name, "Notes.TXT");
        assert_eq!(record.extension, "txt");
        assert_eq!(record.size_bytes, 10);
        assert!(record.indexed_at > 0.0);

        let json = record.to_json().unwrap();
        assert_eq!(FileRecord::from_json(&json).unwrap(), record);
    }

    #[test]
    fn test_upsert_and_get() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        assert!(store.get("/a/notes.txt").unwrap().is_none());
        assert!(store.get_modified_time("/a/notes.txt").unwrap().is_none());

        let rec = record("/a/notes.txt", "Trip notes", "paris museum", "Louvre");
        store.upsert(&rec).unwrap();

        assert_eq!(store.get("/a/notes.txt").unwrap(), Some(rec));
        assert_eq!(
            store.get_modified_time("/a/notes.txt").unwrap(),
            Some(1_700_000_000.0)
        );
    }

    #[test]
    fn test_upsert_replaces_terms() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        store
            .upsert(&record("/a/doc.md", "about giraffes", "savanna", ""))
            .unwrap();
        assert_eq!(paths(&store.search("giraffes", 10).unwrap()), vec!["/a/doc.md"]);

        store
            .upsert(&record("/a/doc.md", "about penguins", "antarctica", ""))
            .unwrap();
        assert_eq!(paths(&store.search("penguins", 10).unwrap()), vec!["/a/doc.md"]);
        assert!(store.search("giraffes savanna", 10).unwrap().is_empty());
        assert_eq!(store.get_stats().unwrap().total_files, 1);
    }

    #[test]
    fn test_search_ranks_by_relevance() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        store
            .upsert(&record("/a/one.txt", "beach beach beach", "ocean", ""))
            .unwrap();
        store
            .upsert(&record("/a/two.txt", "mountain hike", "beach", "long text about many other things entirely"))
            .unwrap();
        store
            .upsert(&record("/a/three.txt", "tax report", "finance", ""))
            .unwrap();

        let hits = store.search("beach", 10).unwrap();
        assert_eq!(paths(&hits), vec!["/a/one.txt", "/a/two.txt"]);
        assert!(hits[0].relevance > hits[1].relevance);

        // OR semantics across terms
        let hits = store.search("finance ocean", 10).unwrap();
        assert_eq!(hits.len(), 2);

        // Limit
        assert_eq!(store.search("beach", 1).unwrap().len(), 1);
    }

    #[test]
    fn test_search_matches_file_name() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        store
            .upsert(&record("/a/invoice_2023.pdf", "", "", ""))
            .unwrap();
        assert_eq!(paths(&store.search("invoice", 5).unwrap()), vec!["/a/invoice_2023.pdf"]);
    }

    #[test]
    fn test_search_sanitizes_query() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);
        store
            .upsert(&record("/a/sql.txt", "select statements", "from", ""))
            .unwrap();

        let hits = store.search("SELECT * FROM x\"\u{7}", 10).unwrap();
        assert_eq!(paths(&hits), vec!["/a/sql.txt"]);

        assert!(store.search("\"*'", 10).unwrap().is_empty());
        assert!(store.search("", 10).unwrap().is_empty());
    }

    #[test]
    fn test_search_empty_store() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);
        assert!(store.search("anything", 10).unwrap().is_empty());
    }

    #[test]
    fn test_remove_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        store.upsert(&record("/a/x.txt", "zebra", "", "")).unwrap();
        store.upsert(&record("/a/y.txt", "zebra", "", "")).unwrap();

        assert!(store.remove_file("/a/x.txt").unwrap());
        assert!(!store.remove_file("/a/x.txt").unwrap());
        assert!(!store.remove_file("/never/indexed").unwrap());

        assert_eq!(paths(&store.search("zebra", 10).unwrap()), vec!["/a/y.txt"]);
        assert_eq!(store.get_stats().unwrap().total_files, 1);
    }

    #[test]
    fn test_remove_prefix() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        store.upsert(&record("/a/docs/x.txt", "heron", "", "")).unwrap();
        store.upsert(&record("/a/docs/deep/y.txt", "heron", "", "")).unwrap();
        store.upsert(&record("/a/docs2/z.txt", "heron", "", "")).unwrap();
        store.upsert(&record("/a/docs.txt", "heron", "", "")).unwrap();

        assert_eq!(store.remove_prefix("/a/docs").unwrap(), 2);
        assert_eq!(store.remove_prefix("/a/docs/").unwrap(), 0);
        assert_eq!(
            paths(&store.search("heron", 10).unwrap()),
            vec!["/a/docs.txt", "/a/docs2/z.txt"]
        );
        assert_eq!(store.get_stats().unwrap().total_files, 2);
    }

    #[test]
    fn test_shared_terms_across_many_records() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        for i in 0..200 {
            let path = format!("/a/note_{:03}.txt", i);
            let summary = if i % 2 == 0 { "common even" } else { "common odd" };
            store.upsert(&record(&path, summary, "", "")).unwrap();
        }
        assert_eq!(store.search("common", 500).unwrap().len(), 200);
        assert_eq!(store.search("even", 500).unwrap().len(), 100);

        for i in (0..200).step_by(2) {
            assert!(store.remove_file(&format!("/a/note_{:03}.txt", i)).unwrap());
        }
        assert!(store.search("even", 500).unwrap().is_empty());
        assert_eq!(store.search("common", 500).unwrap().len(), 100);

        // Neighbouring terms in the key order do not leak into each other
        store.upsert(&record("/b/1.txt", "commonplace", "", "")).unwrap();
        assert_eq!(store.search("common", 500).unwrap().len(), 100);
        assert_eq!(paths(&store.search("commonplace", 10).unwrap()), vec!["/b/1.txt"]);
    }

    #[test]
    fn test_search_fails_when_every_lookup_fails() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        store.upsert(&record("/a/ok.txt", "lantern", "", "")).unwrap();
        store.insert_raw_record("/a/bad.txt", "{not json", &["ember"]).unwrap();

        assert!(store.search("ember", 10).is_err());

        // One term still answers, so the search degrades instead of failing
        assert_eq!(paths(&store.search("ember lantern", 10).unwrap()), vec!["/a/ok.txt"]);
    }

    #[test]
    fn test_stats_by_extension() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        store.upsert(&record("/a/1.txt", "", "", "")).unwrap();
        store.upsert(&record("/a/2.txt", "", "", "")).unwrap();
        store.upsert(&record("/a/3.png", "", "", "")).unwrap();
        store.upsert(&record("/a/Makefile", "", "", "")).unwrap();

        let stats = store.get_stats().unwrap();
        assert_eq!(stats.total_files, 4);
        assert_eq!(
            stats.by_extension[0],
            ExtensionCount {
                extension: "txt".to_string(),
                count: 2
            }
        );
        assert!(stats
            .by_extension
            .iter()
            .any(|c| c.extension.is_empty() && c.count == 1));
    }

    #[test]
    fn test_clear() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        store.upsert(&record("/a/x.txt", "walrus", "", "")).unwrap();
        store.add_watched_folder("/a").unwrap();

        store.clear().unwrap();

        assert_eq!(store.get_stats().unwrap().total_files, 0);
        assert!(store.search("walrus", 10).unwrap().is_empty());
        assert!(store.get_watched_folders().unwrap().is_empty());

        // Usable afterwards like a fresh store
        store.upsert(&record("/a/x.txt", "walrus", "", "")).unwrap();
        assert_eq!(store.search("walrus", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_rebuild_index_is_search_equivalent() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        store.upsert(&record("/a/1.txt", "red apple", "fruit", "")).unwrap();
        store.upsert(&record("/a/2.txt", "green apple pie", "dessert", "")).unwrap();
        store.upsert(&record("/a/3.txt", "blue car", "vehicle", "")).unwrap();

        let before = store.search("apple car", 10).unwrap();
        assert_eq!(store.rebuild_index().unwrap(), 3);
        let after = store.search("apple car", 10).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_watched_folders() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        store.add_watched_folder("/a").unwrap();
        let first = store.get_watched_folders().unwrap();
        store.add_watched_folder("/a").unwrap();
        store.add_watched_folder("/b").unwrap();

        let folders = store.get_watched_folders().unwrap();
        assert_eq!(folders.len(), 2);
        assert_eq!(folders[0], first[0]);
    }

    #[test]
    fn test_store_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = open_store(&temp_dir);
            store.upsert(&record("/a/x.txt", "otter", "", "")).unwrap();
        }
        let store = open_store(&temp_dir);
        assert_eq!(store.search("otter", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_file_modified_time() {
        let temp_dir = TempDir::new().unwrap();
        let test_file = temp_dir.path().join("test.txt");
        fs::write(&test_file, "Test content").unwrap();

        let time = file_modified_time(&test_file).unwrap();
        assert!(time > 0.0);
        assert!(file_modified_time(Path::new("/nonexistent/file.txt")).is_err());
    }
}
