//! voyage-memory - maintenance commands for the persisted memory stores

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use voyage_memory::config::Config;
use voyage_memory::error::{Result, VoyageError};
use voyage_memory::llm;
use voyage_memory::memory::{ArchiveConfig, HierarchicalMemoryStore, MemoryConsolidator, UserProfileStore};

/// Inspect and maintain the travel assistant's long-term memory
#[derive(Parser)]
#[command(name = "voyage-memory")]
#[command(about = "Inspect and maintain the travel assistant's long-term memory")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run one scheduled consolidation pass over the saved clusters
    Consolidate,
    /// Print the preference context for a user
    Profile {
        /// User identifier
        user_id: String,
    },
    /// Print profile, archive and consolidation statistics as JSON
    Stats,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let config = load_config(cli.config)?;

    match cli.command {
        Command::Consolidate => consolidate(&config).await,
        Command::Profile { user_id } => profile(&config, &user_id),
        Command::Stats => stats(&config),
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,voyage_memory=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    if let Some(path) = config_path {
        tracing::info!("Loading config from: {}", path.display());
        return Config::from_file(&path);
    }

    let default_paths = [
        dirs::home_dir().map(|h| h.join(".voyage").join("config.toml")),
        dirs::config_dir().map(|c| c.join("voyage").join("config.toml")),
        Some(PathBuf::from("config.toml")),
    ];

    for path in default_paths.iter().flatten() {
        if path.exists() {
            tracing::info!("Loading config from: {}", path.display());
            return Config::from_file(path);
        }
    }

    tracing::info!("No config file found, using defaults");
    Ok(Config::default())
}

fn persisted(path: Option<PathBuf>, what: &str) -> Result<PathBuf> {
    path.ok_or_else(|| {
        VoyageError::Config(format!(
            "storage.persist is off, there is no saved {what} to operate on"
        ))
    })
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn consolidate(config: &Config) -> Result<()> {
    let path = persisted(config.storage.consolidation_path(), "consolidation state")?;
    let mut consolidator = MemoryConsolidator::open(config.consolidation.clone(), path);
    if let Some(client) = llm::from_config(&config.llm) {
        consolidator = consolidator.with_llm(client);
    }

    let result = consolidator.run_scheduled_consolidation().await;
    if result.is_empty() {
        tracing::info!("Nothing to consolidate");
    }
    print_json(&serde_json::to_value(&result)?)
}

fn profile(config: &Config, user_id: &str) -> Result<()> {
    let path = persisted(config.storage.profiles_path(), "profiles")?;
    let store = UserProfileStore::open(path);
    println!("{}", store.get_context_for_llm(user_id));
    Ok(())
}

fn stats(config: &Config) -> Result<()> {
    let profiles = match config.storage.profiles_path() {
        Some(path) => UserProfileStore::open(path),
        None => UserProfileStore::new(),
    };
    let archive_config: ArchiveConfig = config.archive.clone();
    let archive = match config.storage.archive_path() {
        Some(path) => HierarchicalMemoryStore::open(archive_config, path),
        None => HierarchicalMemoryStore::new(archive_config),
    };
    let consolidator = match config.storage.consolidation_path() {
        Some(path) => MemoryConsolidator::open(config.consolidation.clone(), path),
        None => MemoryConsolidator::new(config.consolidation.clone()),
    };

    print_json(&serde_json::json!({
        "profiles": profiles.stats(),
        "profile_load_errors": profiles.load_errors(),
        "archive": archive.stats(),
        "consolidation": consolidator.stats(),
    }))
}
