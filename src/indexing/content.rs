//! File classification and text extraction.

use crate::core::error::{Error, Result};
use crate::indexing::office::OfficeExtractor;
use crate::storage::index::file_extension;
use async_trait::async_trait;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Bytes read from a text file for encoding detection and decoding
const TEXT_PREFIX_BYTES: u64 = 100_000;

const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "webp", "tiff", "tif", "ico",
];

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "csv", "json", "xml", "log", "ini", "yaml", "yml", "toml", "cfg", "conf", "env",
    "gitignore", "dockerfile", "rst", "tex", "bib",
];

const CODE_EXTENSIONS: &[&str] = &[
    "py", "js", "ts", "jsx", "tsx", "html", "htm", "css", "scss", "java", "c", "cpp", "h", "hpp",
    "cs", "go", "rs", "rb", "php", "swift", "kt", "scala", "lua", "r", "m", "sql", "sh", "bat",
    "ps1", "makefile", "cmake", "vue", "svelte", "astro",
];

const DOCUMENT_EXTENSIONS: &[&str] = &["pdf", "docx", "xlsx", "pptx"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileCategory {
    Image,
    Text,
    Code,
    Document,
    Unknown,
}

impl FileCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileCategory::Image => "image",
            FileCategory::Text => "text",
            FileCategory::Code => "code",
            FileCategory::Document => "document",
            FileCategory::Unknown => "unknown",
        }
    }
}

/// Map a path to its category by (case-insensitive) extension
pub fn classify(path: &Path) -> FileCategory {
    let ext = file_extension(path);
    let ext = ext.as_str();
    if IMAGE_EXTENSIONS.contains(&ext) {
        FileCategory::Image
    } else if TEXT_EXTENSIONS.contains(&ext) {
        FileCategory::Text
    } else if CODE_EXTENSIONS.contains(&ext) {
        FileCategory::Code
    } else if DOCUMENT_EXTENSIONS.contains(&ext) {
        FileCategory::Document
    } else {
        FileCategory::Unknown
    }
}

/// Result of extracting a single file
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// Images carry no text; they are annotated from the image itself
    Image,
    /// Non-empty text, truncated to the character budget
    Content { text: String, category: FileCategory },
    /// Readable but empty, whitespace-only or unsupported
    NoContent { category: FileCategory },
    /// Unreadable; the file must not be recorded
    Failed { reason: String },
}

/// Format-specific text extraction for documents (PDF, office files)
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    /// Whether this extractor handles the (lowercase, dotless) extension
    fn handles(&self, extension: &str) -> bool;

    /// Extract plain text; `Ok(None)` when the document has no text
    async fn extract_text(&self, path: &Path) -> Result<Option<String>>;
}

/// PDF text extraction via `pdf-extract`
pub struct PdfExtractor;

#[async_trait]
impl DocumentExtractor for PdfExtractor {
    fn handles(&self, extension: &str) -> bool {
        extension == "pdf"
    }

    async fn extract_text(&self, path: &Path) -> Result<Option<String>> {
        let bytes = tokio::fs::read(path).await?;

        // pdf-extract is CPU bound and blocking
        let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
            .await
            .map_err(|e| Error::Extraction(format!("PDF task join error: {}", e)))?
            .map_err(|e| Error::Extraction(format!("PDF extraction failed: {}", e)))?;

        Ok(Some(text))
    }
}

/// Turns files into text for annotation
pub struct ContentExtractor {
    max_text_chars: usize,
    documents: Vec<Arc<dyn DocumentExtractor>>,
}

impl ContentExtractor {
    /// Create an extractor with the built-in PDF and Office support
    pub fn new(max_text_chars: usize) -> Self {
        Self {
            max_text_chars,
            documents: vec![Arc::new(PdfExtractor), Arc::new(OfficeExtractor)],
        }
    }

    /// Register an additional document extractor; later registrations win
    pub fn with_document_extractor(mut self, extractor: Arc<dyn DocumentExtractor>) -> Self {
        self.documents.insert(0, extractor);
        self
    }

    pub async fn extract(&self, path: &Path) -> Extraction {
        match classify(path) {
            FileCategory::Image => Extraction::Image,
            FileCategory::Document => self.extract_document(path).await,
            FileCategory::Code => self.extract_text_file(path, FileCategory::Code),
            FileCategory::Text | FileCategory::Unknown => {
                self.extract_text_file(path, FileCategory::Text)
            }
        }
    }

    fn extract_text_file(&self, path: &Path, category: FileCategory) -> Extraction {
        match read_text_prefix(path) {
            Ok(text) => self.finish(text, category),
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                Extraction::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn extract_document(&self, path: &Path) -> Extraction {
        let ext = file_extension(path);
        let Some(extractor) = self.documents.iter().find(|d| d.handles(&ext)) else {
            debug!("No document extractor for .{}: {}", ext, path.display());
            return Extraction::NoContent {
                category: FileCategory::Document,
            };
        };

        match extractor.extract_text(path).await {
            Ok(Some(text)) => self.finish(text, FileCategory::Document),
            Ok(None) => Extraction::NoContent {
                category: FileCategory::Document,
            },
            Err(e) => {
                warn!("Failed to parse document {}: {}", path.display(), e);
                Extraction::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    fn finish(&self, text: String, category: FileCategory) -> Extraction {
        if text.trim().is_empty() {
            return Extraction::NoContent { category };
        }
        Extraction::Content {
            text: truncate_chars(text, self.max_text_chars),
            category,
        }
    }
}

/// Read a bounded prefix and decode it with the detected encoding
fn read_text_prefix(path: &Path) -> Result<String> {
    let mut raw = Vec::new();
    std::fs::File::open(path)?
        .take(TEXT_PREFIX_BYTES)
        .read_to_end(&mut raw)?;
    Ok(decode_text(&raw))
}

/// Decode bytes using a detected encoding, falling back to lossy UTF-8
pub fn decode_text(raw: &[u8]) -> String {
    if raw.is_empty() {
        return String::new();
    }

    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(raw, true);
    let encoding = detector.guess(None, true);

    let (text, _, had_errors) = encoding.decode(raw);
    if had_errors {
        String::from_utf8_lossy(raw).into_owned()
    } else {
        text.into_owned()
    }
}

fn truncate_chars(text: String, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text,
    }
}
