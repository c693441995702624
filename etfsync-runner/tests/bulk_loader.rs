//! Integration tests for the parallel bulk loader.

mod common;

use chrono::NaiveDate;
use common::*;
use etfsync_core::data::{BarStore, DataProvider, ProviderError};
use etfsync_core::domain::{Bar, InstrumentCode};
use etfsync_runner::{BulkLoader, BulkOutcome};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Raises the cancel flag from inside its first fetch, as an operator abort
/// arriving mid-run would.
struct CancelsDuringFetch {
    cancel: Arc<AtomicBool>,
    fetches: AtomicUsize,
}

impl DataProvider for CancelsDuringFetch {
    fn name(&self) -> &str {
        "bulk"
    }

    fn fetch_range(
        &self,
        _code: &InstrumentCode,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<Vec<Bar>, ProviderError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.cancel.store(true, Ordering::SeqCst);
        Ok(bars(&["2024-01-02", "2024-01-03"]))
    }
}

const TODAY: &str = "2024-03-06";

/// Provider whose history differs per code, so stores can be told apart.
fn distinct_histories(list: &[&str]) -> MockProvider {
    list.iter()
        .enumerate()
        .fold(MockProvider::returning("bulk", Vec::new()), |p, (i, c)| {
            let history = (0..=i)
                .map(|day| bar(&format!("2024-01-{:02}", day + 2), 1.0 + i as f64))
                .collect();
            p.with_code(c, Ok(history))
        })
}

#[test]
fn loads_distinct_independent_stores() {
    let dir = tempfile::tempdir().unwrap();
    let store = BarStore::new(dir.path());
    let list = ["159915", "510050", "510300", "510500", "512880", "588000"];
    let provider = distinct_histories(&list);
    let log = provider.call_log();

    let report = BulkLoader::new(&store, &provider, 3)
        .run(&codes(&list), d(TODAY))
        .unwrap();

    assert_eq!(report.count("created"), list.len());
    assert_eq!(calls(&log).len(), list.len());
    for (i, c) in list.iter().enumerate() {
        let loaded = store.load(&code(c)).unwrap();
        assert_eq!(loaded.len(), i + 1, "{c}");
        assert!(loaded.iter().all(|b| b.close == 1.0 + i as f64), "{c}");
    }
    assert_eq!(
        store.list_codes().unwrap().len(),
        list.len(),
        "no temp files or strays left behind"
    );
    let leftovers = std::fs::read_dir(dir.path())
        .unwrap()
        .filter(|e| {
            e.as_ref()
                .unwrap()
                .path()
                .extension()
                .is_some_and(|x| x == "tmp")
        })
        .count();
    assert_eq!(leftovers, 0);
}

#[test]
fn results_follow_code_order() {
    let dir = tempfile::tempdir().unwrap();
    let store = BarStore::new(dir.path());
    let list = ["588000", "159915", "510300", "000001", "512880"];
    let provider = distinct_histories(&list);

    let report = BulkLoader::new(&store, &provider, 4)
        .run(&codes(&list), d(TODAY))
        .unwrap();

    let order: Vec<String> = report.results.iter().map(|r| r.code.to_string()).collect();
    assert_eq!(order, vec!["000001", "159915", "510300", "512880", "588000"]);
}

#[test]
fn requests_full_history_from_epoch() {
    let dir = tempfile::tempdir().unwrap();
    let store = BarStore::new(dir.path());
    let provider = MockProvider::returning("bulk", bars(&["2012-05-28"]));
    let log = provider.call_log();

    BulkLoader::new(&store, &provider, 2)
        .with_epoch(d("2005-01-01"))
        .run(&codes(&["510300"]), d(TODAY))
        .unwrap();

    assert_eq!(
        calls(&log),
        vec![Call {
            code: "510300".into(),
            start: d("2005-01-01"),
            end: d(TODAY),
        }]
    );
}

#[test]
fn existing_store_is_kept_unless_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let store = BarStore::new(dir.path());
    seed(&store, "510300", &["2024-03-01"]);
    let provider = MockProvider::returning("bulk", bars(&["2024-01-02", "2024-01-03"]));
    let log = provider.call_log();

    let report = BulkLoader::new(&store, &provider, 2)
        .run(&codes(&["510300"]), d(TODAY))
        .unwrap();
    assert_eq!(report.results[0].outcome, BulkOutcome::AlreadyExists);
    assert!(calls(&log).is_empty());
    assert_eq!(stored_dates(&store, "510300"), vec![d("2024-03-01")]);

    let report = BulkLoader::new(&store, &provider, 2)
        .with_overwrite(true)
        .run(&codes(&["510300"]), d(TODAY))
        .unwrap();
    assert_eq!(report.results[0].outcome, BulkOutcome::Created { rows: 2 });
    assert_eq!(
        stored_dates(&store, "510300"),
        vec![d("2024-01-02"), d("2024-01-03")]
    );
}

#[test]
fn empty_history_creates_no_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = BarStore::new(dir.path());
    let provider = MockProvider::returning("bulk", Vec::new());

    let report = BulkLoader::new(&store, &provider, 2)
        .run(&codes(&["510300"]), d(TODAY))
        .unwrap();

    assert_eq!(report.results[0].outcome, BulkOutcome::EmptyResponse);
    assert!(!store.exists(&code("510300")));
}

#[test]
fn one_failure_does_not_affect_others() {
    let dir = tempfile::tempdir().unwrap();
    let store = BarStore::new(dir.path());
    let provider = MockProvider::returning("bulk", bars(&["2024-01-02"]))
        .with_code("510500", Err(network("connection reset by peer")));

    let report = BulkLoader::new(&store, &provider, 3)
        .run(&codes(&["510050", "510300", "510500"]), d(TODAY))
        .unwrap();

    assert_eq!(report.failed(), 1);
    assert_eq!(report.count("created"), 2);
    assert!(matches!(
        &report.results[2].outcome,
        BulkOutcome::Failed { error } if error.contains("reset by peer")
    ));
    assert!(!store.exists(&code("510500")));
    assert!(store.exists(&code("510300")));
}

#[test]
fn raised_cancel_flag_stops_scheduling() {
    let dir = tempfile::tempdir().unwrap();
    let store = BarStore::new(dir.path());
    let provider = MockProvider::returning("bulk", bars(&["2024-01-02"]));
    let log = provider.call_log();
    let cancel = Arc::new(AtomicBool::new(false));

    let loader = BulkLoader::new(&store, &provider, 2).with_cancel(Arc::clone(&cancel));
    cancel.store(true, Ordering::Relaxed);
    assert!(loader.cancel_handle().load(Ordering::Relaxed));

    let report = loader
        .run(&codes(&["510050", "510300", "510500"]), d(TODAY))
        .unwrap();

    assert_eq!(report.count("cancelled"), 3);
    assert!(calls(&log).is_empty());
    assert!(store.list_codes().unwrap().is_empty());
}

#[test]
fn cancel_raised_mid_run_lets_in_flight_fetch_finish() {
    let dir = tempfile::tempdir().unwrap();
    let store = BarStore::new(dir.path());
    let cancel = Arc::new(AtomicBool::new(false));
    let provider = CancelsDuringFetch {
        cancel: Arc::clone(&cancel),
        fetches: AtomicUsize::new(0),
    };

    // One worker processes codes in order, so exactly the first is in flight.
    let report = BulkLoader::new(&store, &provider, 1)
        .with_cancel(Arc::clone(&cancel))
        .run(&codes(&["510050", "510300", "510500"]), d(TODAY))
        .unwrap();

    assert_eq!(provider.fetches.load(Ordering::SeqCst), 1);
    assert_eq!(report.results[0].outcome, BulkOutcome::Created { rows: 2 });
    assert_eq!(report.results[1].outcome, BulkOutcome::Cancelled);
    assert_eq!(report.results[2].outcome, BulkOutcome::Cancelled);
    assert_eq!(store.list_codes().unwrap(), vec![code("510050")]);
}

#[test]
fn report_serializes_per_code_status() {
    let dir = tempfile::tempdir().unwrap();
    let store = BarStore::new(dir.path().join("store"));
    let provider = MockProvider::returning("bulk", bars(&["2024-01-02", "2024-01-03"]));

    let report = BulkLoader::new(&store, &provider, 1)
        .run(&codes(&["510300"]), d(TODAY))
        .unwrap();
    let path = dir.path().join("bulk.json");
    report.save_json(&path).unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["provider"], "bulk");
    assert_eq!(json["results"][0]["code"], "510300");
    assert_eq!(json["results"][0]["status"], "created");
    assert_eq!(json["results"][0]["rows"], 2);
}
