//! Failure-path and durability checks: missing hard preconditions, corrupt
//! stored objects, notifier outages, and a full create-then-update cycle on
//! the real filesystem store.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};

use histfeed_core::dataset::Dataset;
use histfeed_core::provider::{FetchError, FetchWindow, ProviderKind, QuoteInfo, QuoteProvider};
use histfeed_core::schedule::SystemClock;
use histfeed_runner::{
    run_ingestion, IngestConfig, IngestDeps, LocalStore, Message, Notifier, NotifyError,
    ObjectStore, ProviderFactory,
};

// ─── Shared test doubles ─────────────────────────────────────────────

struct ScriptedProvider {
    name: &'static str,
    dates: Vec<String>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedProvider {
    fn healthy(name: &'static str, dates: &[&str]) -> Self {
        Self {
            name,
            dates: dates.iter().map(|d| d.to_string()).collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl QuoteProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    fn historical_close(
        &self,
        symbols: &[String],
        _window: &FetchWindow,
    ) -> Result<Dataset, FetchError> {
        self.calls.lock().unwrap().push(symbols.to_vec());
        let series = symbols
            .iter()
            .enumerate()
            .map(|(i, symbol)| {
                let values = (0..self.dates.len())
                    .map(|row| Some(100.0 + i as f64 * 10.0 + row as f64))
                    .collect();
                (symbol.clone(), values)
            })
            .collect();
        Ok(Dataset::from_columns(self.dates.clone(), series)?)
    }

    fn quotes_info(&self, _symbols: &[String]) -> Result<HashMap<String, QuoteInfo>, FetchError> {
        Ok(HashMap::new())
    }
}

struct StubFactory {
    chart: ScriptedProvider,
    spark: ScriptedProvider,
}

impl StubFactory {
    fn healthy(dates: &[&str]) -> Self {
        Self {
            chart: ScriptedProvider::healthy("chart", dates),
            spark: ScriptedProvider::healthy("spark", dates),
        }
    }

    fn total_calls(&self) -> usize {
        self.chart.call_count() + self.spark.call_count()
    }
}

impl ProviderFactory for StubFactory {
    fn provider(&self, kind: ProviderKind) -> &dyn QuoteProvider {
        match kind {
            ProviderKind::Chart => &self.chart,
            ProviderKind::Spark => &self.spark,
        }
    }
}

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<Message>>,
}

impl RecordingNotifier {
    fn sent(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn send(&self, message: &Message) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

struct OutageNotifier;

impl Notifier for OutageNotifier {
    fn send(&self, _message: &Message) -> Result<(), NotifyError> {
        Err(NotifyError::Send("smtp relay unreachable".into()))
    }
}

const DATES: [&str; 3] = ["2024-01-02", "2024-01-03", "2024-01-04"];

fn test_config(root: &std::path::Path) -> IngestConfig {
    let mut config = IngestConfig::default();
    config.batch_size = 2;
    config.store_root = root.to_path_buf();
    config
}

fn universe_csv(symbols: &[&str]) -> Vec<u8> {
    format!("symbol\n{}\n", symbols.join("\n")).into_bytes()
}

fn weekend() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

// ─── Hard preconditions ──────────────────────────────────────────────

#[test]
fn hard_fail_missing_universe_aborts_before_any_fetch() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let store = LocalStore::new(dir.path());
    let factory = StubFactory::healthy(&DATES);
    let notifier = RecordingNotifier::default();
    let deps = IngestDeps {
        store: &store,
        providers: &factory,
        notifier: &notifier,
        clock: &SystemClock,
    };

    let report = run_ingestion(&config, &deps, weekend());

    assert!(!report.succeeded());
    assert!(report
        .error
        .as_deref()
        .unwrap()
        .contains("does not exist in storage"));
    assert_eq!(factory.total_calls(), 0);
    assert!(!store.exists(&config.bucket, &config.dataset_key).unwrap());

    let sent = notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "histfeed: historical close ingestion failed");
    assert!(sent[0].body.contains("does not exist in storage"));
}

#[test]
fn hard_fail_empty_universe_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.universe_key = "all_stocks.txt".into();
    let store = LocalStore::new(dir.path());
    store
        .put(&config.bucket, &config.universe_key, b"\n  \n")
        .unwrap();
    let factory = StubFactory::healthy(&DATES);
    let notifier = RecordingNotifier::default();
    let deps = IngestDeps {
        store: &store,
        providers: &factory,
        notifier: &notifier,
        clock: &SystemClock,
    };

    let report = run_ingestion(&config, &deps, weekend());

    assert!(!report.succeeded());
    assert!(report.error.as_deref().unwrap().contains("holds no symbols"));
    assert_eq!(factory.total_calls(), 0);
}

#[test]
fn hard_fail_corrupt_stored_table_fails_the_update() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let store = LocalStore::new(dir.path());
    store
        .put(&config.bucket, &config.universe_key, &universe_csv(&["AAA"]))
        .unwrap();
    // close column with text in it, not a parsable table
    store
        .put(
            &config.bucket,
            &config.dataset_key,
            b"date,AAA\n2024-01-02,ten\n",
        )
        .unwrap();
    let factory = StubFactory::healthy(&DATES);
    let notifier = RecordingNotifier::default();
    let deps = IngestDeps {
        store: &store,
        providers: &factory,
        notifier: &notifier,
        clock: &SystemClock,
    };

    let report = run_ingestion(&config, &deps, weekend());

    assert!(!report.succeeded());
    assert_eq!(factory.total_calls(), 0);
    // the corrupt object is left as it was
    assert_eq!(
        store.get(&config.bucket, &config.dataset_key).unwrap(),
        b"date,AAA\n2024-01-02,ten\n"
    );
}

// ─── Durability ──────────────────────────────────────────────────────

#[test]
fn hard_fail_notifier_outage_does_not_sink_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let store = LocalStore::new(dir.path());
    store
        .put(&config.bucket, &config.universe_key, &universe_csv(&["AAA", "BBB"]))
        .unwrap();
    let factory = StubFactory::healthy(&DATES);
    let deps = IngestDeps {
        store: &store,
        providers: &factory,
        notifier: &OutageNotifier,
        clock: &SystemClock,
    };

    let report = run_ingestion(&config, &deps, weekend());

    assert!(report.succeeded());
    assert!(report.persisted);
    assert!(store.exists(&config.bucket, &config.dataset_key).unwrap());
}

#[test]
fn hard_fail_create_then_update_cycle_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let store = LocalStore::new(dir.path());
    store
        .put(&config.bucket, &config.universe_key, &universe_csv(&["AAA", "BBB"]))
        .unwrap();
    let factory = StubFactory::healthy(&DATES);
    let notifier = RecordingNotifier::default();
    let deps = IngestDeps {
        store: &store,
        providers: &factory,
        notifier: &notifier,
        clock: &SystemClock,
    };

    let first = run_ingestion(&config, &deps, weekend());
    assert!(first.succeeded());
    assert!(first.persisted);
    let after_create = store.get(&config.bucket, &config.dataset_key).unwrap();

    // second run sees the table, finds nothing missing, and writes nothing
    let second = run_ingestion(&config, &deps, weekend());
    assert!(second.succeeded());
    assert!(!second.persisted);
    let after_update = store.get(&config.bucket, &config.dataset_key).unwrap();
    assert_eq!(after_create, after_update);

    // both runs reported the same fingerprint
    assert_eq!(
        first.dataset.unwrap().content_hash,
        second.dataset.unwrap().content_hash
    );
    assert_eq!(notifier.sent().len(), 2);
}
