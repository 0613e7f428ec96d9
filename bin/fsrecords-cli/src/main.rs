//! fsrecords CLI - Storage directory diagnostics
//!
//! This binary inspects, checks and recovers fsrecords storage directories.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use fsrecords_common::Config;
use fsrecords_common::config::StorageKind;
use fsrecords_storage::{HealthChecker, LogCursor, OperationLog, RecoveryEngine, VfsStore};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "fsrecords-cli")]
#[command(about = "fsrecords storage diagnostics")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "FSRECORDS_CONFIG")]
    config: Option<PathBuf>,

    /// Record table backing (memory-mapped or paged)
    #[arg(long)]
    storage_kind: Option<String>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the store header and log bounds
    Info {
        /// Storage directory
        dir: PathBuf,
    },
    /// List registered roots
    Roots {
        /// Storage directory
        dir: PathBuf,
    },
    /// Run a consistency check
    Check {
        /// Storage directory
        dir: PathBuf,
        /// Also look for records missing from their parent's children
        #[arg(long)]
        orphans: bool,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the newest log entries
    Log {
        /// Storage directory
        dir: PathBuf,
        /// Number of entries to print
        #[arg(long, default_value = "20")]
        tail: usize,
    },
    /// Rebuild a storage directory as of a log position
    Recover {
        /// Damaged storage directory
        #[arg(long)]
        from: PathBuf,
        /// Empty target directory
        #[arg(long)]
        to: PathBuf,
        /// Log position to recover
        #[arg(long, conflicts_with = "back", required_unless_present = "back")]
        point: Option<u64>,
        /// Recover this many bytes of log before the end, rounded down to an entry
        #[arg(long)]
        back: Option<u64>,
    },
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => {
            let config_str = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            toml::from_str(&config_str)
                .with_context(|| format!("failed to parse config {}", path.display()))?
        }
        None => Config::default(),
    };

    // CLI takes precedence
    if let Some(kind) = &args.storage_kind {
        config.storage.kind = match kind.as_str() {
            "memory-mapped" | "mmap" => StorageKind::MemoryMapped,
            "paged" => StorageKind::Paged,
            other => bail!("unknown storage kind: {other}"),
        };
    }
    if let Some(level) = &args.log_level {
        config.logging.level.clone_from(level);
    }
    config.validate()?;
    Ok(config)
}

fn open(dir: &Path, config: &Config) -> Result<VfsStore> {
    if !dir.is_dir() {
        bail!("{} is not a storage directory", dir.display());
    }
    VfsStore::open(dir, config).with_context(|| format!("failed to open {}", dir.display()))
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match args.command {
        Commands::Info { dir } => {
            let store = open(&dir, &config)?;
            let header = store.records().header()?;
            println!("Storage {}", dir.display());
            println!("==========");
            println!("Record table:     {:?}", store.records().kind());
            println!("Format version:   {}", header.version);
            println!("Records:          {}", store.records().max_allocated_id());
            println!("Global mod count: {}", header.global_mod_count);
            println!("Last modified:    {}", header.timestamp);
            println!("Log start:        {}", store.log().start_position());
            println!("Log end:          {}", store.log().current_position());
            println!("Log entries:      {}", store.log().len());
            println!("Roots:            {}", store.list_roots()?.len());
            store.close()?;
        }
        Commands::Roots { dir } => {
            let store = open(&dir, &config)?;
            let roots = store.list_roots()?;
            if roots.is_empty() {
                println!("(no roots)");
            }
            for (id, url) in roots {
                let name = store.name_of(id)?.unwrap_or_default();
                println!("{id:>10}  {name:<24} {url}");
            }
            store.close()?;
        }
        Commands::Check { dir, orphans, json } => {
            let store = open(&dir, &config)?;
            let mut health = config.health.clone();
            health.check_orphans |= orphans;
            let report = HealthChecker::for_store(&store, health).check_health();
            store.close()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{report}");
            }
            if !report.is_healthy() {
                std::process::exit(2);
            }
        }
        Commands::Log { dir, tail } => {
            let store = open(&dir, &config)?;
            let mut cursor = LogCursor::at_end(store.log());
            let mut entries = Vec::with_capacity(tail);
            while entries.len() < tail {
                match cursor.prev_entry()? {
                    Some(entry) => entries.push(entry),
                    None => break,
                }
            }
            for entry in entries.iter().rev() {
                println!(
                    "{:>12}  {:>10}  {:?}",
                    entry.position, entry.file_id, entry.operation
                );
            }
            store.close()?;
        }
        Commands::Recover {
            from,
            to,
            point,
            back,
        } => {
            let point = match (point, back) {
                (Some(point), _) => point,
                (None, Some(back)) => {
                    let store = open(&from, &config)?;
                    let point = store
                        .log()
                        .align_down(store.log_position().saturating_sub(back));
                    store.close()?;
                    point
                }
                (None, None) => bail!("either --point or --back is required"),
            };
            info!("Recovering {} at {} into {}", from.display(), point, to.display());
            let result = RecoveryEngine::new(config).recover_from_point(point, &from, &to)?;
            println!("Recovered files:    {}", result.recovered_files);
            println!("Botched files:      {}", result.botched_files);
            println!("Dropped attributes: {}", result.botched_attributes_count);
        }
    }

    Ok(())
}
