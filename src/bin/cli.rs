//! EmberKV CLI
//!
//! Administrative command-line access to a database directory.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use emberkv::{Config, Engine, FlushPolicy};
use tracing_subscriber::{fmt, EnvFilter};

/// EmberKV CLI
#[derive(Parser, Debug)]
#[command(name = "emberkv-cli")]
#[command(about = "Inspect and modify an EmberKV database directory")]
#[command(version)]
struct Args {
    /// Database directory
    #[arg(short, long, default_value = "./emberkv_data")]
    dir: PathBuf,

    /// Maximum data file size in MB (must match the existing database)
    #[arg(long, default_value = "1024")]
    max_file_size_mb: u32,

    /// fsync after this many bytes; -1 leaves flushing to the OS
    #[arg(long, default_value = "-1", allow_hyphen_values = true)]
    flush_data_size_bytes: i64,

    /// Do not start the compaction worker
    #[arg(long)]
    no_compaction: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Put {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    Delete {
        /// The key to delete
        key: String,
    },

    /// Print engine statistics
    Stats,

    /// Print every live key and value
    Scan {
        /// Stop after this many records
        #[arg(short, long)]
        limit: Option<usize>,
    },
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,emberkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
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

fn run(args: Args) -> emberkv::Result<()> {
    let config = Config::builder()
        .max_file_size(args.max_file_size_mb.saturating_mul(1024 * 1024))
        .flush_policy(FlushPolicy::from_flush_data_size_bytes(args.flush_data_size_bytes)?)
        .compaction_disabled(args.no_compaction)
        .build();

    tracing::debug!("EmberKV CLI v{}", emberkv::VERSION);
    let engine = Engine::open(&args.dir, config)?;

    match args.command {
        Commands::Get { key } => match engine.get(key.as_bytes())? {
            Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            None => println!("(nil)"),
        },
        Commands::Put { key, value } => {
            engine.put(key.as_bytes(), value.as_bytes())?;
            println!("OK");
        }
        Commands::Delete { key } => {
            engine.delete(key.as_bytes())?;
            println!("OK");
        }
        Commands::Stats => print!("{}", engine.stats()),
        Commands::Scan { limit } => {
            let limit = limit.unwrap_or(usize::MAX);
            for record in engine.iter().take(limit) {
                let record = record?;
                println!(
                    "{}\t{}",
                    String::from_utf8_lossy(&record.key),
                    String::from_utf8_lossy(&record.value)
                );
            }
        }
    }

    engine.close()
}
