//! Parallel cold-start loader.
//!
//! Populates full history for instruments that have no store yet. Each
//! worker owns one instrument at a time and writes only that instrument's
//! file, so workers share nothing but the provider and the cancel flag.
//!
//! Runs on a private rayon pool rather than the global one, sized by
//! `bulk.workers`.

use crate::sync::default_epoch;
use chrono::NaiveDate;
use etfsync_core::data::{BarStore, DataProvider, StoreError};
use etfsync_core::domain::{InstrumentCode, InstrumentList};
use rayon::prelude::*;
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum BulkError {
    #[error("failed to build bulk worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Per-instrument result of a bulk load.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BulkOutcome {
    Created { rows: usize },
    /// Provider had no history; no store is created.
    EmptyResponse,
    /// Store present and overwrite not requested.
    AlreadyExists,
    Failed { error: String },
    /// Not started because cancellation was raised.
    Cancelled,
}

impl BulkOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            BulkOutcome::Created { .. } => "created",
            BulkOutcome::EmptyResponse => "empty_response",
            BulkOutcome::AlreadyExists => "already_exists",
            BulkOutcome::Failed { .. } => "failed",
            BulkOutcome::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkResult {
    pub code: InstrumentCode,
    #[serde(flatten)]
    pub outcome: BulkOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkReport {
    pub run_date: NaiveDate,
    pub provider: String,
    /// Results in code order.
    pub results: Vec<BulkResult>,
}

impl BulkReport {
    pub fn count(&self, label: &str) -> usize {
        self.results
            .iter()
            .filter(|r| r.outcome.label() == label)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.count("failed")
    }

    pub fn save_json(&self, path: &Path) -> Result<(), crate::report::ReportError> {
        crate::report::write_json(path, self)
    }
}

pub struct BulkLoader<'a> {
    store: &'a BarStore,
    provider: &'a dyn DataProvider,
    workers: usize,
    epoch: NaiveDate,
    overwrite: bool,
    cancel: Arc<AtomicBool>,
}

impl<'a> BulkLoader<'a> {
    pub fn new(store: &'a BarStore, provider: &'a dyn DataProvider, workers: usize) -> Self {
        Self {
            store,
            provider,
            workers: workers.max(1),
            epoch: default_epoch(),
            overwrite: false,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_epoch(mut self, epoch: NaiveDate) -> Self {
        self.epoch = epoch;
        self
    }

    /// Replace existing stores instead of reporting `AlreadyExists`.
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Share an externally owned cancel flag.
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Load full history `[epoch, today]` for every code.
    pub fn run(&self, codes: &InstrumentList, today: NaiveDate) -> Result<BulkReport, BulkError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("etfsync-bulk-{i}"))
            .build()?;

        info!(
            instruments = codes.len(),
            workers = self.workers,
            provider = self.provider.name(),
            overwrite = self.overwrite,
            "bulk load started"
        );

        // par_iter + collect keeps input order regardless of completion order.
        let results: Vec<BulkResult> = pool.install(|| {
            codes
                .as_slice()
                .par_iter()
                .map(|code| BulkResult {
                    code: code.clone(),
                    outcome: self.load_one(code, today),
                })
                .collect()
        });

        let report = BulkReport {
            run_date: today,
            provider: self.provider.name().to_string(),
            results,
        };
        info!(
            created = report.count("created"),
            existing = report.count("already_exists"),
            empty = report.count("empty_response"),
            failed = report.failed(),
            cancelled = report.count("cancelled"),
            "bulk load finished"
        );
        Ok(report)
    }

    fn load_one(&self, code: &InstrumentCode, today: NaiveDate) -> BulkOutcome {
        if self.cancel.load(Ordering::Relaxed) {
            return BulkOutcome::Cancelled;
        }
        if !self.overwrite && self.store.exists(code) {
            return BulkOutcome::AlreadyExists;
        }

        let bars = match self.provider.fetch_range(code, self.epoch, today) {
            Ok(bars) => bars,
            Err(e) => {
                warn!(code = %code, error = %e, "bulk fetch failed");
                return BulkOutcome::Failed {
                    error: e.to_string(),
                };
            }
        };
        if bars.is_empty() {
            info!(code = %code, "no history available");
            return BulkOutcome::EmptyResponse;
        }

        match self.store.create_full(code, &bars, self.overwrite) {
            Ok(rows) => {
                info!(code = %code, rows, "store created");
                BulkOutcome::Created { rows }
            }
            Err(StoreError::AlreadyExists { .. }) => BulkOutcome::AlreadyExists,
            Err(e) => {
                warn!(code = %code, error = %e, "store write failed");
                BulkOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }
}
