//! huginn-cache - maintenance for the persistent response cache.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use huginn::config::SECRET_ENV_VAR;
use huginn::{Config, HuginnError, IntegrityKey, ResponseCache, Secrets, SqliteStore};

/// Inspect and maintain the huginn response cache.
#[derive(Parser)]
#[command(name = "huginn-cache")]
#[command(version = huginn::PKG_VERSION)]
#[command(about = "Huginn response cache maintenance")]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, env = "HUGINN_CONFIG")]
    config: Option<PathBuf>,

    /// Override the cache database path.
    #[arg(long)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show entry count, byte usage and capacity
    Stats,

    /// Verify every record's integrity tag, purging failures
    Verify,

    /// Remove expired records and evict down to capacity
    Sweep,

    /// Remove every record
    Clear,

    /// Validate configuration and secrets without touching the cache
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing (default: warn for CLI; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?;
    let secrets = Secrets::load()?;
    let path = match args.db {
        Some(path) => path,
        None => config.cache_path()?,
    };

    if let Command::CheckConfig = args.command {
        return check_config(&config, &secrets, &path);
    }

    let key = integrity_key(&secrets)?;
    info!(version = huginn::version_string(), path = %path.display(), "opening cache");
    let store = Arc::new(SqliteStore::open(&path)?);
    let cache = ResponseCache::open(store, key, config.cache_config()).await?;

    match args.command {
        Command::Stats => {
            let stats = cache.stats().await?;
            println!("path: {}", path.display());
            println!("entries: {}", stats.entries);
            println!(
                "bytes: {} / {} ({:.1}%)",
                stats.total_bytes,
                stats.capacity_bytes,
                percent(stats.total_bytes, stats.capacity_bytes)
            );
        }
        Command::Verify => {
            let report = cache.verify_all().await?;
            println!("checked: {}", report.checked);
            println!("corrupt (purged): {}", report.corrupt);
            println!("expired (purged): {}", report.expired);
            if report.corrupt > 0 {
                std::process::exit(2);
            }
        }
        Command::Sweep => {
            let purged = cache.purge_expired().await?;
            let report = cache.evict_if_over_capacity().await?;
            println!("expired removed: {}", purged + report.purged);
            println!("evicted: {}", report.evicted);
            println!("bytes freed by eviction: {}", report.bytes_freed);
        }
        Command::Clear => {
            let removed = cache.clear().await?;
            println!("removed: {removed}");
        }
        Command::CheckConfig => {}
    }

    Ok(())
}

fn integrity_key(secrets: &Secrets) -> Result<IntegrityKey, HuginnError> {
    let secret = secrets.integrity_secret().ok_or_else(|| {
        HuginnError::Configuration(format!(
            "no integrity secret configured (set {SECRET_ENV_VAR} or secrets.toml)"
        ))
    })?;
    IntegrityKey::new(secret)
}

fn check_config(
    config: &Config,
    secrets: &Secrets,
    path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let dispatch = config.dispatch_config()?;
    if config.cache.enabled {
        integrity_key(secrets)?;
    }
    println!("version: {}", huginn::version_string());
    println!("max_concurrent: {}", dispatch.max_concurrent);
    println!("timeout: {:?}", dispatch.timeout);
    println!("retry attempts: {}", dispatch.retry.max_attempts);
    println!("cache enabled: {}", config.cache.enabled);
    println!("cache path: {}", path.display());
    println!("cache capacity: {} bytes", config.cache.max_size_bytes);
    println!("cache ttl: {}s", config.cache.ttl_seconds);
    println!("configuration ok");
    Ok(())
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}
