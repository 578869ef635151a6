use anyhow::{bail, Context, Result};
use clap::Parser;
use file_guessr::cli::{Cli, Commands};
use file_guessr::{ChangeWatcher, Config, IndexService, OllamaClient};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing_subscriber::EnvFilter;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("file_guessr=info,warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::new(cli.base_dir.as_deref().map(Into::into))?
        .with_ollama(cli.ollama_url.clone(), cli.model.clone());

    match &cli.command {
        Commands::Init => handle_init(&config),
        Commands::Index { path } => handle_index(config, path).await,
        Commands::Watch { path } => handle_watch(config, path.as_deref()).await,
        Commands::Search { query, limit } => handle_search(config, query, *limit).await,
        Commands::Stats => handle_stats(config),
        Commands::Clear => handle_clear(config),
        Commands::Preview { path } => handle_preview(config, path).await,
        Commands::Health => handle_health(config).await,
    }
}

fn handle_init(config: &Config) -> Result<()> {
    println!("Initializing file-guessr...");

    if config.is_initialized() {
        println!("file-guessr is already initialized at: {:?}", config.base_dir);
        return Ok(());
    }

    config.init()?;
    println!("✓ Created data directory: {:?}", config.base_dir);
    println!("\nNext: run 'file-guessr index <folder>' to index a folder.");
    Ok(())
}

fn open_service(config: Config) -> Result<IndexService> {
    if !config.is_initialized() {
        bail!("file-guessr is not initialized. Run 'file-guessr init' first.");
    }
    let backend = Arc::new(OllamaClient::new(config.ollama.clone())?);
    Ok(IndexService::new(config, backend.clone(), backend)?)
}

async fn handle_index(config: Config, path: &str) -> Result<()> {
    let service = open_service(config)?;
    let handle = service.start_indexing(Path::new(path))?;
    println!("Indexing {}...", path);

    let mut last_processed = usize::MAX;
    while !handle.is_finished() {
        let status = service.status();
        if status.processed_files != last_processed && status.total_files > 0 {
            println!(
                "  [{}/{}] {}",
                status.processed_files, status.total_files, status.current_file
            );
            last_processed = status.processed_files;
        }
        tokio::time::sleep(PROGRESS_INTERVAL).await;
    }

    let summary = handle.await.context("Indexing task panicked")?;
    let status = service.status();

    println!("\nIndexing complete!");
    println!("  Files: {}", summary.total_files);
    println!("  Time: {:.1}s", status.elapsed_seconds);
    if !status.errors.is_empty() {
        println!("  Errors: {}", status.errors.len());
        for error in &status.errors {
            println!("    ✗ {}", error);
        }
    }
    Ok(())
}

async fn handle_watch(config: Config, path: Option<&str>) -> Result<()> {
    let service = open_service(config)?;

    let watcher = ChangeWatcher::start(service.indexer().clone(), service.config().debounce)?;
    watcher.follow_registrations(service.subscribe_events());
    watcher.load_persisted()?;

    if let Some(path) = path {
        let handle = service.start_indexing(Path::new(path))?;
        println!("Indexing {} before watching...", path);
        let summary = handle.await.context("Indexing task panicked")?;
        println!("  ✓ {} files ({} failed)", summary.total_files, summary.failed);
        watcher.add_watch(Path::new(path))?;
    }

    let folders = watcher.watched_folders();
    if folders.is_empty() {
        bail!("No folders to watch. Run 'file-guessr watch <folder>' to add one.");
    }
    for folder in &folders {
        println!("Watching: {}", folder.display());
    }
    println!("Press Ctrl+C to stop watching...");

    tokio::signal::ctrl_c().await?;
    println!("\nStopped.");
    Ok(())
}

async fn handle_search(config: Config, query: &str, limit: usize) -> Result<()> {
    let service = open_service(config)?;
    println!("Searching for: \"{}\"", query);

    let response = service.search(query, Some(limit)).await?;
    if response.expanded_query != response.original_query {
        println!("Expanded to: \"{}\"", response.expanded_query);
    }
    if let Some(error) = &response.error {
        eprintln!("⚠ Search failed: {}", error);
    }

    if response.results.is_empty() {
        println!("\nNo results found.");
        return Ok(());
    }

    println!("\nFound {} results:", response.total_results);
    for (i, hit) in response.results.iter().enumerate() {
        println!("\n{}. {} (relevance: {:.3})", i + 1, hit.path, hit.relevance);
        if !hit.summary.is_empty() {
            let summary: String = hit.summary.chars().take(200).collect();
            println!("   {}", summary);
        }
        if !hit.keywords.is_empty() {
            println!("   Keywords: {}", hit.keywords);
        }
    }
    Ok(())
}

fn handle_stats(config: Config) -> Result<()> {
    let service = open_service(config)?;
    let stats = service.stats()?;

    println!("Indexed files: {}", stats.total_files);
    for entry in &stats.by_extension {
        let extension = if entry.extension.is_empty() {
            "(none)"
        } else {
            entry.extension.as_str()
        };
        println!("  {:>8}  {}", entry.count, extension);
    }
    let folders = service.watched_folders()?;
    if !folders.is_empty() {
        println!("\nFolders:");
        for folder in folders {
            println!("  {}", folder.display());
        }
    }
    Ok(())
}

fn handle_clear(config: Config) -> Result<()> {
    let service = open_service(config)?;
    service.clear()?;
    println!("✓ Index cleared");
    Ok(())
}

async fn handle_preview(config: Config, path: &str) -> Result<()> {
    let service = open_service(config)?;
    let mut file = service.open_file(Path::new(path)).await?;
    let mut stdout = tokio::io::stdout();
    tokio::io::copy(&mut file, &mut stdout).await?;
    stdout.flush().await?;
    Ok(())
}

async fn handle_health(config: Config) -> Result<()> {
    let client = OllamaClient::new(config.ollama.clone())?;
    let health = client.health().await;

    if !health.running {
        println!("✗ Ollama is not reachable at {}", config.ollama.base_url);
        if let Some(error) = &health.error {
            println!("  {}", error);
        }
        return Ok(());
    }

    println!("✓ Ollama is running at {}", config.ollama.base_url);
    if health.model_available {
        println!("✓ Model available: {}", health.required_model);
    } else {
        println!("✗ Model not found: {}", health.required_model);
        println!("  Run: ollama pull {}", health.required_model);
    }
    if !health.available_models.is_empty() {
        println!("  Installed: {}", health.available_models.join(", "));
    }
    Ok(())
}
