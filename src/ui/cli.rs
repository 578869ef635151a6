use clap::{Parser, Subcommand};

/// file-guessr - Find your files by describing them
#[derive(Parser, Debug)]
#[command(name = "file-guessr")]
#[command(about = "A local-first file indexer with LLM-assisted keyword search", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Custom base directory (default: ~/.file-guessr)
    #[arg(long, global = true)]
    pub base_dir: Option<String>,

    /// Ollama server URL (default: http://localhost:11434)
    #[arg(long, global = true)]
    pub ollama_url: Option<String>,

    /// Model used for annotation and query expansion
    #[arg(long, global = true)]
    pub model: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize file-guessr (create the data directory)
    Init,
    /// Index every file in a folder
    Index {
        /// Path to the folder
        path: String,
    },
    /// Watch folders and keep the index up to date
    Watch {
        /// Folder to index and watch (default: folders from earlier runs)
        path: Option<String>,
    },
    /// Search indexed files with a natural-language query
    Search {
        /// What the file is about
        query: String,
        /// Maximum number of results to return
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Show index statistics
    Stats,
    /// Remove every file from the index
    Clear,
    /// Print the contents of a file
    Preview {
        /// Path to the file
        path: String,
    },
    /// Check that the inference backend is reachable
    Health,
}
