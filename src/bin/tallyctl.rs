//! TallyKV admin CLI
//!
//! Inspect and maintain a TallyKV data directory offline. Never run it
//! against a directory an engine currently has open.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tallykv::snapshot::SnapshotReader;
use tallykv::wal::WalRecovery;
use tallykv::{Config, Engine, NoIdentity, StoreKey, TallyError};
use tracing_subscriber::{fmt, EnvFilter};

/// TallyKV CLI
#[derive(Parser, Debug)]
#[command(name = "tallyctl")]
#[command(about = "Inspect and maintain TallyKV data directories")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./tallykv_data")]
    data_dir: PathBuf,

    /// File stem of the snapshot and log files
    #[arg(short, long, default_value = "tally")]
    name: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Recover the directory and print engine statistics
    Stats,

    /// Print snapshot records (read-only)
    Dump {
        /// Only records of this scope
        #[arg(long)]
        scope: Option<String>,

        /// Only records of this partition
        #[arg(long, allow_hyphen_values = true)]
        partition: Option<i32>,
    },

    /// Check a log file's records without applying them
    VerifyWal {
        /// Log file (defaults to the live log)
        file: Option<PathBuf>,
    },

    /// Add a delta to one key
    Add {
        scope: String,

        #[arg(allow_hyphen_values = true)]
        partition: i32,

        /// Identity bytes as hex
        identity: String,

        #[arg(allow_hyphen_values = true)]
        delta: i64,
    },

    /// Replay all logs into a fresh snapshot and empty the log
    Compact,
}

fn main() -> ExitCode {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tallykv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::builder()
        .data_dir(&args.data_dir)
        .name(&args.name)
        .build();

    match args.command {
        Commands::Stats => {
            let engine = Engine::open(config, NoIdentity)?;
            let stats = engine.stats();
            println!("entries:          {}", stats.store_size);
            println!("snapshot bytes:   {}", stats.snapshot_bytes);
            println!("corrupt records:  {}", stats.corrupt_records);
            println!("snapshots taken:  {}", stats.snapshots_taken);
            engine.close()?;
        }
        Commands::Dump { scope, partition } => {
            let reader = SnapshotReader::open(&config.snapshot_path(), &config.default_scope)?;
            let mut shown = 0usize;
            for record in reader.records() {
                if !matches_filter(&record.key, scope.as_deref(), partition) {
                    continue;
                }
                println!(
                    "{}\t{}\t{}\t{}{}",
                    record.key.scope,
                    record.key.partition,
                    hex::encode(&record.key.identity),
                    record.count,
                    if record.legacy { "\t(legacy)" } else { "" }
                );
                shown += 1;
            }
            tracing::info!(
                records = shown,
                versioned = reader.is_versioned(),
                generation = ?reader.wal_generation(),
                "dump complete"
            );
        }
        Commands::VerifyWal { file } => {
            let path = file.unwrap_or_else(|| config.wal_path());
            let result = WalRecovery::verify(&path)?;
            println!("valid records:    {}", result.records_recovered);
            println!("corrupt records:  {}", result.records_corrupted);
            println!("torn tail:        {}", result.was_truncated);
            if let Some(generation) = result.generation {
                println!("generation:       {}", generation);
            }
            if result.records_corrupted > 0 || result.was_truncated {
                return Err(TallyError::WalCorruption(format!(
                    "{}: {} corrupt records, torn tail: {}",
                    path.display(),
                    result.records_corrupted,
                    result.was_truncated
                ))
                .into());
            }
        }
        Commands::Add {
            scope,
            partition,
            identity,
            delta,
        } => {
            let identity = hex::decode(&identity)?;
            let engine = Engine::open(config, NoIdentity)?;
            engine.save(&scope, partition, &identity, delta);
            engine.flush_deltas();
            println!("{}", engine.get_count(&scope, partition, &identity));
            engine.close()?;
        }
        Commands::Compact => {
            let engine = Engine::open(config, NoIdentity)?;
            let info = engine.commit_now()?;
            println!(
                "wrote {} records ({} bytes) to {}",
                info.entry_count,
                info.file_size,
                info.path.display()
            );
            engine.close()?;
        }
    }
    Ok(())
}

fn matches_filter(key: &StoreKey, scope: Option<&str>, partition: Option<i32>) -> bool {
    scope.map_or(true, |s| key.scope == s) && partition.map_or(true, |p| key.partition == p)
}
