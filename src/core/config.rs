use super::error::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Files larger than this are never indexed (50 MiB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Maximum characters of extracted text kept per file
pub const DEFAULT_MAX_TEXT_CHARS: usize = 4000;

/// Quiet period before a changed file is re-indexed
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(1);

/// Default number of search results
pub const DEFAULT_SEARCH_LIMIT: usize = 20;

/// Connection settings for the local Ollama server
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
    /// Per-request timeout; local inference is slow
    pub timeout: Duration,
    pub temperature: f32,
    pub num_predict: u32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "gemma3:4b".to_string(),
            timeout: Duration::from_secs(120),
            temperature: 0.3,
            num_predict: 1024,
        }
    }
}

/// Configuration for file-guessr
#[derive(Debug, Clone)]
pub struct Config {
    /// Base directory for file-guessr data
    pub base_dir: PathBuf,
    /// Path to the index database
    pub database_path: PathBuf,
    /// Inference backend settings
    pub ollama: OllamaConfig,
    pub max_file_size: u64,
    pub max_text_chars: usize,
    pub debounce: Duration,
    pub search_limit: usize,
}

impl Config {
    /// Get the default configuration directory
    pub fn default_base_dir() -> Result<PathBuf> {
        dirs::home_dir()
            .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))
            .map(|home| home.join(".file-guessr"))
    }

    /// Create a new configuration
    pub fn new(base_dir: Option<PathBuf>) -> Result<Self> {
        let base_dir = match base_dir {
            Some(dir) => dir,
            None => Self::default_base_dir()?,
        };

        Ok(Self {
            database_path: base_dir.join("index.redb"),
            base_dir,
            ollama: OllamaConfig::default(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_text_chars: DEFAULT_MAX_TEXT_CHARS,
            debounce: DEFAULT_DEBOUNCE,
            search_limit: DEFAULT_SEARCH_LIMIT,
        })
    }

    /// Override the Ollama endpoint and/or model
    pub fn with_ollama(mut self, base_url: Option<String>, model: Option<String>) -> Self {
        if let Some(url) = base_url {
            self.ollama.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(model) = model {
            self.ollama.model = model;
        }
        self
    }

    /// Initialize the configuration directories
    pub fn init(&self) -> Result<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        Ok(())
    }

    /// Check if the configuration is already initialized
    pub fn is_initialized(&self) -> bool {
        self.base_dir.is_dir()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_paths() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::new(Some(temp_dir.path().join("fg"))).unwrap();
        assert_eq!(config.database_path, temp_dir.path().join("fg").join("index.redb"));
        assert_eq!(config.max_text_chars, 4000);
        assert_eq!(config.debounce, Duration::from_secs(1));
        assert!(!config.is_initialized());

        config.init().unwrap();
        assert!(config.is_initialized());
    }

    #[test]
    fn test_with_ollama_overrides() {
        let config = Config::new(Some(PathBuf::from("/tmp/fg")))
            .unwrap()
            .with_ollama(Some("http://gpu-box:11434/".to_string()), None);
        assert_eq!(config.ollama.base_url, "http://gpu-box:11434");
        assert_eq!(config.ollama.model, "gemma3:4b");
    }
}
