use clap::Parser;
use discord_loader::config::{parse_batch_size, Config, ErrorPolicy};
use discord_loader::db::Database;
use discord_loader::loader::{discover_documents, Loader};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Load captured Discord server JSON documents into the relational store.
#[derive(Parser, Debug)]
#[command(name = "discord-loader", version)]
struct Cli {
    /// Log every SQL batch
    #[arg(long)]
    debug: bool,

    /// Directory scanned for *.json documents (overrides RAW_DIR)
    #[arg(long)]
    raw_dir: Option<PathBuf>,

    /// SQLite database path (overrides DATABASE_URL)
    #[arg(long)]
    database: Option<String>,

    /// Rows per bulk write (overrides LOADER_BATCH_SIZE)
    #[arg(long, value_parser = |s: &str| parse_batch_size(s).map_err(|e| e.to_string()))]
    batch_size: Option<usize>,

    /// Keep loading after a document fails
    #[arg(long)]
    keep_going: bool,

    /// Documents to load instead of scanning the raw directory
    paths: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_filter = if cli.debug { "info,discord_loader=debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Load configuration
    let mut config = Config::from_env()?;
    if let Some(raw_dir) = cli.raw_dir {
        config.raw_dir = raw_dir;
    }
    if let Some(database) = cli.database {
        config.database_url = database;
    }
    if let Some(batch_size) = cli.batch_size {
        config.batch_size = batch_size;
    }
    if cli.keep_going {
        config.on_error = ErrorPolicy::Continue;
    }
    info!("Configuration: {:?}", config);

    let paths = if cli.paths.is_empty() {
        discover_documents(&config.raw_dir)?
    } else {
        cli.paths
    };

    let db = Database::new(&config)?;
    db.execute_init()?;
    info!("Connected to database: {}", config.database_url);

    let loader = Loader::new(db, &config);
    let summary = loader.run(paths).await?;

    if !summary.failed.is_empty() {
        for failure in &summary.failed {
            error!("{}", failure);
        }
        anyhow::bail!("{} document(s) failed to load", summary.failed.len());
    }

    info!("✓ All files loaded successfully!");
    Ok(())
}
