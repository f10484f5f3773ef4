//! Histfeed Runner — ingestion orchestration, storage, reporting.
//!
//! This crate builds on `histfeed-core` to provide:
//! - TOML configuration with sensible defaults
//! - Bucket-shaped persistence with suffix-typed reads
//! - The Create/Update ingestion run itself
//! - Run reports with schema-versioned JSON export
//! - Report delivery through a pluggable notifier

pub mod config;
pub mod ingest;
pub mod notify;
pub mod report;
pub mod storage;

pub use config::{ConfigError, GuardConfig, IngestConfig, NotifyConfig, RateConfig};
pub use ingest::{
    run_ingestion, BatchOutcome, IngestDeps, IngestError, IngestionMode, LiveProviders,
    ProviderFactory,
};
pub use notify::{Attachment, ConsoleNotifier, Message, Notifier, NotifyError};
pub use report::{
    export_json, import_json, summarize, DatasetSummary, RunOutcome, RunReport, SCHEMA_VERSION,
};
pub use storage::{
    read_value, write_table, LocalStore, ObjectStore, StorageError, StoredValue,
};
