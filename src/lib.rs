// Core functionality
pub mod core {
    pub mod config;
    pub mod error;
}

// Index storage
pub mod storage {
    pub mod index;
    pub mod terms;
}

// Indexing pipeline
pub mod indexing {
    pub mod content;
    pub mod discovery;
    pub mod office;
    pub mod scanner;
}

// Inference backend & query handling
pub mod search {
    pub mod llm;
    pub mod query;
}

pub mod service;

// User interfaces
pub mod ui {
    pub mod cli;
    pub mod watch;
}

// Re-export commonly used types
pub use core::config::{Config, OllamaConfig};
pub use core::error::{Error, Result};
pub use indexing::content::{ContentExtractor, DocumentExtractor, PdfExtractor};
pub use indexing::discovery::discover_files;
pub use indexing::office::OfficeExtractor;
pub use indexing::scanner::{IndexEvent, IndexOutcome, IndexStatus, Indexer, ScanSummary};
pub use search::llm::{Annotation, Annotator, BackendHealth, OllamaClient, QueryExpander};
pub use search::query::{QueryEngine, SearchResponse};
pub use service::IndexService;
pub use storage::index::{FileRecord, IndexStats, IndexStore, SearchHit};
pub use ui::cli;
pub use ui::watch::{ChangeScheduler, ChangeWatcher, FileChange};
