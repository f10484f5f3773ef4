//! Histfeed CLI — daily close ingestion and dataset inspection.
//!
//! Commands:
//! - `ingest` — run a Create/Update ingestion against the local object store
//! - `inspect` — print the shape and fingerprint of the stored close table

use std::path::PathBuf;

use anyhow::{bail, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};

use histfeed_core::dataset::Dataset;
use histfeed_core::schedule::SystemClock;
use histfeed_runner::{
    export_json, run_ingestion, summarize, ConsoleNotifier, IngestConfig, IngestDeps, LiveProviders,
    LocalStore, ObjectStore,
};

#[derive(Parser)]
#[command(
    name = "histfeed",
    about = "Histfeed CLI — daily close-price ingestion pipeline"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an ingestion: create the close table or extend it with newly
    /// listed universe symbols.
    Ingest {
        /// Path to a TOML config file. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Object store root. Overrides the config value.
        #[arg(long)]
        store_root: Option<PathBuf>,

        /// Write the run report as JSON to this path.
        #[arg(long)]
        report_out: Option<PathBuf>,
    },
    /// Print the shape and fingerprint of the stored close table.
    Inspect {
        /// Path to a TOML config file. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Object store root. Overrides the config value.
        #[arg(long)]
        store_root: Option<PathBuf>,

        /// List the symbol columns as well.
        #[arg(long, default_value_t = false)]
        symbols: bool,

        /// Emit the summary as JSON instead of text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Ingest {
            config,
            store_root,
            report_out,
        } => run_ingest(config, store_root, report_out),
        Commands::Inspect {
            config,
            store_root,
            symbols,
            json,
        } => run_inspect(config, store_root, symbols, json),
    }
}

fn load_config(path: Option<PathBuf>, store_root: Option<PathBuf>) -> Result<IngestConfig> {
    let mut config = match path {
        Some(path) => IngestConfig::from_file(&path)?,
        None => IngestConfig::default(),
    };
    if let Some(root) = store_root {
        config.store_root = root;
    }
    Ok(config)
}

fn run_ingest(
    config_path: Option<PathBuf>,
    store_root: Option<PathBuf>,
    report_out: Option<PathBuf>,
) -> Result<()> {
    let config = load_config(config_path, store_root)?;

    let store = LocalStore::new(&config.store_root);
    let providers = LiveProviders::new();
    let notifier = ConsoleNotifier;
    let clock = SystemClock;
    let deps = IngestDeps {
        store: &store,
        providers: &providers,
        notifier: &notifier,
        clock: &clock,
    };

    let report = run_ingestion(&config, &deps, Utc::now());

    if let Some(path) = report_out {
        std::fs::write(&path, export_json(&report)?)?;
        println!("report written to {}", path.display());
    }

    if !report.succeeded() {
        std::process::exit(1);
    }
    Ok(())
}

fn run_inspect(
    config_path: Option<PathBuf>,
    store_root: Option<PathBuf>,
    list_symbols: bool,
    json: bool,
) -> Result<()> {
    let config = load_config(config_path, store_root)?;
    let store = LocalStore::new(&config.store_root);

    if !store.exists(&config.bucket, &config.dataset_key)? {
        bail!(
            "no close table stored at {}/{}",
            config.bucket,
            config.dataset_key
        );
    }
    let bytes = store.get(&config.bucket, &config.dataset_key)?;
    let table = Dataset::from_csv_bytes(&bytes)?;
    let summary = summarize(&table, &bytes)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}/{}", config.bucket, config.dataset_key);
        println!("  rows:    {}", summary.rows);
        println!("  symbols: {}", summary.symbols);
        println!("  range:   {} to {}", summary.start_date, summary.end_date);
        println!("  blake3:  {}", summary.content_hash);
    }

    if list_symbols {
        for symbol in table.symbols() {
            println!("  - {symbol}");
        }
    }
    Ok(())
}
