// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//!
//! `cistern`: maintenance, ingest and query tool for Cistern collections.
//!
//! Two families of subcommands:
//! - raw collection maintenance on a single `.lm2` file (`create`, `get`,
//!   `set`, `delete`, `scan`, `stats`)
//! - event collections under the configured data directory (`ingest`,
//!   `query`, `compact`, `watch`, `config`)

mod events;
mod raw;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use cistern_events::{CisternConfig, CollectionRegistry};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Ingest batch size when `--batch-size` is not given.
const DEFAULT_BATCH_SIZE: usize = 1000;

// ---------------------------------------------------------------------------
// CLI argument parsing
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "cistern", version = VERSION, about = "Cistern telemetry event store")]
struct Cli {
    /// JSON configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides `data_dir` from the configuration.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an empty collection file.
    Create { file: PathBuf },
    /// Print the value stored under a key.
    Get { file: PathBuf, key: String },
    /// Store a value under a key.
    Set {
        file: PathBuf,
        key: String,
        value: String,
        /// Fail instead of replacing an existing value.
        #[arg(long)]
        no_overwrite: bool,
    },
    /// Delete a key.
    Delete { file: PathBuf, key: String },
    /// Print records in key order.
    Scan {
        file: PathBuf,
        /// Start at the first key >= this one.
        #[arg(long)]
        from: Option<String>,
        /// Stop after this many records.
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print version, size and cache counters of a collection file.
    Stats { file: PathBuf },
    /// Store JSON-lines events into a named event collection.
    Ingest {
        collection: String,
        /// Input file; standard input when omitted.
        input: Option<PathBuf>,
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,
        /// Counter field to store as a per-second rate. Repeatable.
        #[arg(long = "rate", value_name = "FIELD")]
        rates: Vec<String>,
    },
    /// Run a JSON query description against a named event collection.
    Query {
        collection: String,
        /// Query description file; standard input when omitted.
        desc: Option<PathBuf>,
        #[arg(long)]
        pretty: bool,
    },
    /// Apply retention compaction to one collection, or all configured ones.
    Compact { collection: Option<String> },
    /// Open the configured collections and compact them periodically until
    /// interrupted.
    Watch,
    /// Print the effective configuration.
    Config,
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // Logs go to stderr so stdout stays clean for command output.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_config(cli: &Cli) -> Result<CisternConfig> {
    let mut config = match &cli.config {
        Some(path) => CisternConfig::load(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => CisternConfig::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    config.validate()?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);
    let config = load_config(&cli)?;
    let options = config.collection_options();

    match cli.command {
        Command::Create { file } => raw::create(&file, options),
        Command::Get { file, key } => raw::get(&file, options, &key),
        Command::Set {
            file,
            key,
            value,
            no_overwrite,
        } => raw::set(&file, options, &key, &value, !no_overwrite),
        Command::Delete { file, key } => raw::delete(&file, options, &key),
        Command::Scan { file, from, limit } => raw::scan(&file, options, from.as_deref(), limit),
        Command::Stats { file } => raw::stats(&file, options),
        Command::Ingest {
            collection,
            input,
            batch_size,
            rates,
        } => {
            let registry = CollectionRegistry::new(config)?;
            events::ingest(&registry, &collection, input.as_deref(), batch_size, &rates)
        }
        Command::Query {
            collection,
            desc,
            pretty,
        } => {
            let registry = CollectionRegistry::new(config)?;
            events::query(&registry, &collection, desc.as_deref(), pretty)
        }
        Command::Compact { collection } => {
            let registry = CollectionRegistry::new(config)?;
            events::compact(&registry, collection.as_deref())
        }
        Command::Watch => events::watch(CollectionRegistry::new(config)?).await,
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
