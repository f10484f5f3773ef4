//! The ingestion run.
//!
//! One call to [`run_ingestion`] performs a complete run:
//!
//! - refuse to start during the trading session,
//! - load the symbol universe (its absence is fatal),
//! - pick Create or Update depending on whether a table is already stored,
//! - fetch, repair and fold symbol batches under the provider rate budget,
//! - persist the result and deliver a [`RunReport`].
//!
//! Batch-level problems are logged and skipped; the run only fails outright
//! on the hard preconditions or when a Create run merges nothing at all.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use histfeed_core::calendar::{self, CalendarError};
use histfeed_core::dataset::{Dataset, DatasetError, DateRange};
use histfeed_core::merge;
use histfeed_core::provider::{FetchWindow, ProviderKind, QuoteProvider};
use histfeed_core::repair;
use histfeed_core::runlog::RunLog;
use histfeed_core::schedule::{plan_batches, Clock, SchedulerState, SymbolBatch};

use crate::config::{ConfigError, IngestConfig};
use crate::notify::{Message, Notifier};
use crate::report::{self, RunOutcome, RunReport};
use crate::storage::{read_value, write_table, ObjectStore, StorageError, StoredValue};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    MarketOpen(#[from] CalendarError),

    #[error("the symbol universe object {0} does not exist in storage")]
    UniverseMissing(String),

    #[error("the universe object {key} holds no symbols")]
    EmptyUniverse { key: String },

    #[error("the universe object {key} is neither a line list nor a symbol table")]
    UniverseShape { key: String },

    #[error("no historical data was fetched for any of the symbol batches")]
    NothingFetched,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("table error: {0}")]
    Dataset(#[from] DatasetError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestionMode {
    /// No table in storage yet; build one from scratch.
    Create,
    /// Extend the stored table with universe symbols it lacks.
    Update,
}

impl fmt::Display for IngestionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestionMode::Create => write!(f, "create"),
            IngestionMode::Update => write!(f, "update"),
        }
    }
}

/// What happened to one symbol batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Fetched, repaired and folded into the accumulated table.
    Merged,
    /// Fetched fine but repair dropped every symbol.
    Empty,
    /// Fetch, repair or fold failed; the batch was logged and dropped.
    Skipped,
}

/// Hands out the provider for a given side. The live implementation builds
/// real HTTP providers; tests substitute recording stubs.
pub trait ProviderFactory: Send + Sync {
    fn provider(&self, kind: ProviderKind) -> &dyn QuoteProvider;
}

/// Both real providers, built once so they share their HTTP clients across
/// batches.
pub struct LiveProviders {
    chart: Box<dyn QuoteProvider>,
    spark: Box<dyn QuoteProvider>,
}

impl LiveProviders {
    pub fn new() -> Self {
        Self {
            chart: ProviderKind::Chart.build(),
            spark: ProviderKind::Spark.build(),
        }
    }
}

impl Default for LiveProviders {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderFactory for LiveProviders {
    fn provider(&self, kind: ProviderKind) -> &dyn QuoteProvider {
        match kind {
            ProviderKind::Chart => self.chart.as_ref(),
            ProviderKind::Spark => self.spark.as_ref(),
        }
    }
}

/// Everything a run needs from the outside world.
pub struct IngestDeps<'a> {
    pub store: &'a dyn ObjectStore,
    pub providers: &'a dyn ProviderFactory,
    pub notifier: &'a dyn Notifier,
    pub clock: &'a dyn Clock,
}

/// Accumulated table plus the date range every later fold must preserve.
struct Accumulated {
    table: Dataset,
    reference: DateRange,
}

struct Completed {
    mode: IngestionMode,
    table: Dataset,
    csv_bytes: Vec<u8>,
    persisted: bool,
}

enum UpdatePlan {
    /// Every universe symbol is already a column; storage stays untouched.
    AlreadyComplete { table: Dataset, csv_bytes: Vec<u8> },
    Extended(Dataset),
}

/// Run a complete ingestion and deliver its report.
///
/// The report is returned as well so callers can decide the process exit
/// status; delivery problems are printed but never override the run outcome.
pub fn run_ingestion(
    config: &IngestConfig,
    deps: &IngestDeps<'_>,
    started_at: DateTime<Utc>,
) -> RunReport {
    println!(
        "historical close ingestion starting at {}",
        started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    let mut log = RunLog::new();
    let mut mode = None;
    let outcome = execute(config, deps, started_at, &mut log, &mut mode);

    let run_report = match outcome {
        Ok(done) => {
            let dataset = match report::summarize(&done.table, &done.csv_bytes) {
                Ok(summary) => Some(summary),
                Err(e) => {
                    log.warn(format!("could not summarize the persisted table: {e}"));
                    None
                }
            };
            RunReport {
                schema_version: report::SCHEMA_VERSION,
                outcome: RunOutcome::Succeeded,
                mode: Some(done.mode),
                started_at,
                persisted: done.persisted,
                error: None,
                dataset,
                log,
            }
        }
        Err(e) => {
            eprintln!("ingestion failed: {e}");
            RunReport {
                schema_version: report::SCHEMA_VERSION,
                outcome: RunOutcome::Failed,
                mode,
                started_at,
                persisted: false,
                error: Some(e.to_string()),
                dataset: None,
                log,
            }
        }
    };

    deliver(config, deps.notifier, &run_report);
    run_report
}

fn execute(
    config: &IngestConfig,
    deps: &IngestDeps<'_>,
    started_at: DateTime<Utc>,
    log: &mut RunLog,
    mode_out: &mut Option<IngestionMode>,
) -> Result<Completed, IngestError> {
    calendar::ensure_outside_session(started_at, config.guard.session_hours()?)?;

    if !deps.store.exists(&config.bucket, &config.universe_key)? {
        return Err(IngestError::UniverseMissing(config.universe_key.clone()));
    }
    let universe = load_universe(deps.store, config, log)?;
    log.info(format!("symbol universe holds {} symbols", universe.len()));

    let mode = if deps.store.exists(&config.bucket, &config.dataset_key)? {
        IngestionMode::Update
    } else {
        IngestionMode::Create
    };
    *mode_out = Some(mode);
    log.info(format!("ingestion mode: {mode}"));

    match mode {
        IngestionMode::Create => {
            let table = create_table(config, deps, &universe, log)?;
            persist(config, deps, mode, table, log)
        }
        IngestionMode::Update => match update_table(config, deps, &universe, log)? {
            UpdatePlan::AlreadyComplete { table, csv_bytes } => Ok(Completed {
                mode,
                table,
                csv_bytes,
                persisted: false,
            }),
            UpdatePlan::Extended(table) => persist(config, deps, mode, table, log),
        },
    }
}

/// Decode the universe object into a deduplicated symbol list.
fn load_universe(
    store: &dyn ObjectStore,
    config: &IngestConfig,
    log: &mut RunLog,
) -> Result<Vec<String>, IngestError> {
    let key = &config.universe_key;
    let raw: Vec<String> = match read_value(store, &config.bucket, key)? {
        StoredValue::Lines(lines) => lines
            .iter()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
        StoredValue::Table(df) => {
            let column = df
                .get_columns()
                .first()
                .ok_or_else(|| IngestError::UniverseShape { key: key.clone() })?;
            let values = column
                .str()
                .map_err(|_| IngestError::UniverseShape { key: key.clone() })?;
            values.into_iter().flatten().map(str::to_string).collect()
        }
    };

    let mut seen = HashSet::new();
    let mut symbols = Vec::with_capacity(raw.len());
    let mut duplicates = Vec::new();
    for symbol in raw {
        if seen.insert(symbol.clone()) {
            symbols.push(symbol);
        } else if !duplicates.contains(&symbol) {
            duplicates.push(symbol);
        }
    }
    if !duplicates.is_empty() {
        log.warn(format!(
            "the symbol list contains duplicates (kept first occurrence): {}",
            duplicates.join(", ")
        ));
    }
    if symbols.is_empty() {
        return Err(IngestError::EmptyUniverse { key: key.clone() });
    }
    Ok(symbols)
}

fn create_table(
    config: &IngestConfig,
    deps: &IngestDeps<'_>,
    universe: &[String],
    log: &mut RunLog,
) -> Result<Dataset, IngestError> {
    let batches = plan_batches(universe, config.batch_size);
    log.info(format!(
        "building the table from scratch over the last {}: {} batches of at most {} symbols",
        config.period.as_query(),
        batches.len(),
        config.batch_size
    ));

    let mut accumulated = None;
    run_batches(
        config,
        deps,
        &batches,
        &FetchWindow::Period(config.period),
        &mut accumulated,
        log,
    );

    match accumulated {
        Some(state) => Ok(state.table),
        None => Err(IngestError::NothingFetched),
    }
}

fn update_table(
    config: &IngestConfig,
    deps: &IngestDeps<'_>,
    universe: &[String],
    log: &mut RunLog,
) -> Result<UpdatePlan, IngestError> {
    let csv_bytes = deps.store.get(&config.bucket, &config.dataset_key)?;
    let existing = Dataset::from_csv_bytes(&csv_bytes)?;

    let missing: Vec<String> = universe
        .iter()
        .filter(|symbol| !existing.has_symbol(symbol))
        .cloned()
        .collect();
    if missing.is_empty() {
        log.info("the stored table already covers every universe symbol; nothing to fetch");
        return Ok(UpdatePlan::AlreadyComplete {
            table: existing,
            csv_bytes,
        });
    }

    let reference = existing.date_range()?;
    let fetch_range = reference.padded(config.buffer_days);
    log.info(format!(
        "extending the stored table ({reference}) with {} missing symbols, fetch window {fetch_range}",
        missing.len()
    ));

    let batches = plan_batches(&missing, config.batch_size);
    let mut accumulated = Some(Accumulated {
        table: existing,
        reference,
    });
    run_batches(
        config,
        deps,
        &batches,
        &FetchWindow::Range(fetch_range),
        &mut accumulated,
        log,
    );

    match accumulated {
        Some(state) => Ok(UpdatePlan::Extended(state.table)),
        None => Err(IngestError::NothingFetched),
    }
}

/// Dispatch every batch under one scheduler, folding survivors into
/// `accumulated`, then log the tally.
fn run_batches(
    config: &IngestConfig,
    deps: &IngestDeps<'_>,
    batches: &[SymbolBatch],
    window: &FetchWindow,
    accumulated: &mut Option<Accumulated>,
    log: &mut RunLog,
) {
    let mut sched = SchedulerState::new(config.first_provider, config.rate.budget(), deps.clock);
    let (mut merged, mut empty, mut skipped) = (0usize, 0usize, 0usize);
    for batch in batches {
        match process_batch(deps, &mut sched, batch, batches.len(), window, accumulated, log) {
            BatchOutcome::Merged => merged += 1,
            BatchOutcome::Empty => empty += 1,
            BatchOutcome::Skipped => skipped += 1,
        }
    }
    log.info(format!(
        "{merged} of {} batches merged ({skipped} skipped, {empty} empty)",
        batches.len()
    ));
}

fn process_batch(
    deps: &IngestDeps<'_>,
    sched: &mut SchedulerState,
    batch: &SymbolBatch,
    total: usize,
    window: &FetchWindow,
    accumulated: &mut Option<Accumulated>,
    log: &mut RunLog,
) -> BatchOutcome {
    if let Some(paused) = sched.pace(deps.clock) {
        println!(
            "rate budget spent; paused {:.1}s before the next batch",
            paused.as_secs_f64()
        );
    }
    sched.record_dispatch();
    let provider = deps.providers.provider(sched.current_provider());
    println!(
        "batch {}/{} ({}) via {}",
        batch.index + 1,
        total,
        batch.label(),
        provider.name()
    );

    let fetched = match provider.historical_close(&batch.symbols, window) {
        Ok(table) => {
            // Sides alternate per successful fetch, not per dispatch.
            sched.flip_provider();
            table
        }
        Err(e) => return skip_batch(log, batch, &e),
    };

    // Repair consults the provider this batch was fetched from, not the
    // flipped side.
    let (repaired, repair_log) = match repair::repair_batch(fetched, provider) {
        Ok(pair) => pair,
        Err(e) => return skip_batch(log, batch, &e),
    };
    log.absorb(repair_log);

    if repaired.is_empty() {
        return BatchOutcome::Empty;
    }

    match accumulated {
        None => {
            let reference = match repaired.date_range() {
                Ok(range) => range,
                Err(e) => return skip_batch(log, batch, &e),
            };
            log.info(format!("date range for this run: {reference}"));
            *accumulated = Some(Accumulated {
                table: repaired,
                reference,
            });
            BatchOutcome::Merged
        }
        Some(state) => match merge::fold(&state.table, &repaired, &state.reference) {
            Ok(folded) => {
                state.table = folded;
                BatchOutcome::Merged
            }
            Err(e) => skip_batch(log, batch, &e),
        },
    }
}

fn skip_batch(log: &mut RunLog, batch: &SymbolBatch, reason: &dyn fmt::Display) -> BatchOutcome {
    log.warn(format!(
        "skipped batch {} ({}): {reason}",
        batch.index + 1,
        batch.label()
    ));
    BatchOutcome::Skipped
}

fn persist(
    config: &IngestConfig,
    deps: &IngestDeps<'_>,
    mode: IngestionMode,
    table: Dataset,
    log: &mut RunLog,
) -> Result<Completed, IngestError> {
    let csv_bytes = write_table(deps.store, &config.bucket, &config.dataset_key, &table)?;
    log.info(format!(
        "persisted {} rows x {} symbols to {}/{}",
        table.rows(),
        table.symbol_count(),
        config.bucket,
        config.dataset_key
    ));
    Ok(Completed {
        mode,
        table,
        csv_bytes,
        persisted: true,
    })
}

fn deliver(config: &IngestConfig, notifier: &dyn Notifier, run_report: &RunReport) {
    let subject = run_report.subject(&config.notify.subject_prefix);
    let sent = Message::new(&config.notify.recipients, &subject, &run_report.body())
        .map(|message| {
            if run_report.persisted {
                let path = config
                    .store_root
                    .join(&config.bucket)
                    .join(&config.dataset_key);
                message.with_attachment(path, &config.dataset_key)
            } else {
                message
            }
        })
        .and_then(|message| notifier.send(&message));
    if let Err(e) = sent {
        eprintln!("could not deliver the run report: {e}");
    }
}
