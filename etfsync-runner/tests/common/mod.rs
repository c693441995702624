//! Shared fixtures for runner integration tests: scripted providers, a
//! recording sleeper and store helpers. Nothing here touches the network or
//! really sleeps.

#![allow(dead_code)]

use chrono::NaiveDate;
use etfsync_core::data::{BarStore, DataProvider, ProviderChain, ProviderError};
use etfsync_core::domain::{Bar, InstrumentCode, InstrumentList};
use etfsync_runner::Sleeper;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn d(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

pub fn code(s: &str) -> InstrumentCode {
    InstrumentCode::parse(s).unwrap()
}

pub fn codes(list: &[&str]) -> InstrumentList {
    InstrumentList::new(list.iter().map(|s| code(s)))
}

pub fn bar(date: &str, close: f64) -> Bar {
    Bar {
        date: d(date),
        open: close,
        close,
        high: close + 0.02,
        low: close - 0.02,
        volume: 10_000,
        turnover: close * 10_000.0,
        amplitude: 1.2,
        pct_change: 0.3,
        change: 0.01,
        turnover_rate: 0.5,
    }
}

pub fn bars(dates: &[&str]) -> Vec<Bar> {
    dates.iter().map(|date| bar(date, 1.0)).collect()
}

pub fn network(msg: &str) -> ProviderError {
    ProviderError::Network(msg.to_string())
}

/// Store seeded with `dates` for `code`.
pub fn seed(store: &BarStore, code_str: &str, dates: &[&str]) {
    store.create_full(&code(code_str), &bars(dates), false).unwrap();
}

pub fn stored_dates(store: &BarStore, code_str: &str) -> Vec<NaiveDate> {
    store
        .load(&code(code_str))
        .unwrap()
        .iter()
        .map(|b| b.date)
        .collect()
}

/// One recorded `fetch_range` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub code: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

pub type CallLog = Arc<Mutex<Vec<Call>>>;

/// Provider answering from a fixed script: a default response plus
/// optional per-code overrides. Every call is logged.
pub struct MockProvider {
    name: String,
    default: Result<Vec<Bar>, ProviderError>,
    per_code: HashMap<String, Result<Vec<Bar>, ProviderError>>,
    calls: CallLog,
}

impl MockProvider {
    pub fn returning(name: &str, bars: Vec<Bar>) -> Self {
        Self {
            name: name.to_string(),
            default: Ok(bars),
            per_code: HashMap::new(),
            calls: Arc::default(),
        }
    }

    pub fn failing(name: &str, error: ProviderError) -> Self {
        Self {
            name: name.to_string(),
            default: Err(error),
            per_code: HashMap::new(),
            calls: Arc::default(),
        }
    }

    pub fn with_code(mut self, code_str: &str, response: Result<Vec<Bar>, ProviderError>) -> Self {
        self.per_code.insert(code(code_str).to_string(), response);
        self
    }

    pub fn call_log(&self) -> CallLog {
        Arc::clone(&self.calls)
    }
}

impl DataProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch_range(
        &self,
        code: &InstrumentCode,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, ProviderError> {
        self.calls.lock().unwrap().push(Call {
            code: code.to_string(),
            start,
            end,
        });
        self.per_code
            .get(code.as_str())
            .unwrap_or(&self.default)
            .clone()
    }
}

/// Build a chain from mocks, returning the chain and each mock's call log.
pub fn chain_of(providers: Vec<MockProvider>) -> (ProviderChain, Vec<CallLog>) {
    let logs = providers.iter().map(MockProvider::call_log).collect();
    let boxed = providers
        .into_iter()
        .map(|p| Box::new(p) as Box<dyn DataProvider>)
        .collect();
    (ProviderChain::new(boxed), logs)
}

pub fn calls(log: &CallLog) -> Vec<Call> {
    log.lock().unwrap().clone()
}

/// Sleeper that records requested durations instead of sleeping.
#[derive(Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn slept(&self) -> Vec<Duration> {
        self.slept.lock().unwrap().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
    }
}
