//! Sequential batch driver with pacing, a success quota and a circuit
//! breaker.
//!
//! Instruments are processed one at a time, in list order. Before each one
//! the controller checks the breaker, then the quota; either limit ends the
//! run cleanly and leaves the rest of the list for the next invocation.

use crate::config::RunContext;
use crate::pacing::{Jitter, Sleeper};
use crate::sync::{Freshness, SyncAttemptResult, SyncEngine};
use chrono::NaiveDate;
use etfsync_core::domain::{InstrumentCode, InstrumentList};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info, warn};

/// Run-scoped counters. Fresh for every invocation, never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchRunState {
    pub success_count: u32,
    pub consecutive_failure_streak: u32,
    pub total_processed: u32,
}

impl BatchRunState {
    /// Fold one instrument's result into the counters.
    pub fn record(&mut self, result: &SyncAttemptResult) {
        self.total_processed += 1;
        match result {
            SyncAttemptResult::Success { .. } => {
                self.success_count += 1;
                self.consecutive_failure_streak = 0;
            }
            SyncAttemptResult::SourceExhausted { .. } => {
                self.consecutive_failure_streak += 1;
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLimits {
    pub run_quota: u32,
    pub circuit_breaker_threshold: u32,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    QuotaReached,
    /// Consecutive failures reached the threshold; the caller's network
    /// identity is probably blocked.
    CircuitBreakerTripped,
}

impl RunOutcome {
    /// Process exit status for this outcome.
    pub fn exit_code(self) -> u8 {
        match self {
            RunOutcome::Completed => 0,
            RunOutcome::QuotaReached => 3,
            RunOutcome::CircuitBreakerTripped => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstrumentResult {
    pub code: InstrumentCode,
    #[serde(flatten)]
    pub result: SyncAttemptResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub run_date: NaiveDate,
    pub outcome: RunOutcome,
    pub state: BatchRunState,
    /// Per-instrument results in processing order.
    pub results: Vec<InstrumentResult>,
    /// Codes left untouched by an early stop.
    pub remaining: Vec<InstrumentCode>,
}

impl RunReport {
    pub fn count(&self, label: &str) -> usize {
        self.results
            .iter()
            .filter(|r| r.result.label() == label)
            .count()
    }

    /// Codes whose store could not be read and need a fresh bulk-load.
    pub fn unreadable(&self) -> Vec<&InstrumentCode> {
        self.results
            .iter()
            .filter(|r| matches!(r.result, SyncAttemptResult::StoreUnreadable { .. }))
            .map(|r| &r.code)
            .collect()
    }

    pub fn save_json(&self, path: &Path) -> Result<(), crate::report::ReportError> {
        crate::report::write_json(path, self)
    }
}

pub struct BatchRunController<'a> {
    engine: SyncEngine<'a>,
    jitter: Jitter,
    limits: RunLimits,
    sleeper: &'a dyn Sleeper,
}

impl<'a> BatchRunController<'a> {
    pub fn new(
        engine: SyncEngine<'a>,
        jitter: Jitter,
        limits: RunLimits,
        sleeper: &'a dyn Sleeper,
    ) -> Self {
        Self {
            engine,
            jitter,
            limits,
            sleeper,
        }
    }

    /// Drive every code in `codes`, in order, until done or a limit stops
    /// the run.
    pub fn run(&mut self, codes: &InstrumentList, ctx: &RunContext) -> RunReport {
        let codes = codes.as_slice();
        let mut state = BatchRunState::default();
        let mut results = Vec::with_capacity(codes.len());
        let mut outcome = RunOutcome::Completed;
        let mut stopped_at = codes.len();

        info!(
            run_id = %ctx.run_id,
            today = %ctx.today,
            instruments = codes.len(),
            quota = self.limits.run_quota,
            threshold = self.limits.circuit_breaker_threshold,
            "incremental update started"
        );

        for (i, code) in codes.iter().enumerate() {
            if state.consecutive_failure_streak >= self.limits.circuit_breaker_threshold {
                warn!(
                    streak = state.consecutive_failure_streak,
                    remaining = codes.len() - i,
                    "circuit breaker tripped, stopping run"
                );
                outcome = RunOutcome::CircuitBreakerTripped;
                stopped_at = i;
                break;
            }
            if state.success_count >= self.limits.run_quota {
                info!(
                    successes = state.success_count,
                    remaining = codes.len() - i,
                    "run quota reached, stopping run"
                );
                outcome = RunOutcome::QuotaReached;
                stopped_at = i;
                break;
            }

            let result = match self.engine.check_freshness(code, ctx.today) {
                Freshness::Done(result) => result,
                Freshness::NeedsFetch(window) => {
                    let delay = self.jitter.sample();
                    debug!(code = %code, delay_ms = delay.as_millis() as u64, "pacing");
                    self.sleeper.sleep(delay);
                    self.engine.fetch_and_merge(code, &window)
                }
            };

            info!(code = %code, result = result.label(), "instrument done");
            state.record(&result);
            results.push(InstrumentResult {
                code: code.clone(),
                result,
            });
        }

        let report = RunReport {
            run_id: ctx.run_id.clone(),
            run_date: ctx.today,
            outcome,
            state,
            results,
            remaining: codes[stopped_at..].to_vec(),
        };

        info!(
            outcome = ?report.outcome,
            processed = state.total_processed,
            successes = state.success_count,
            remaining = report.remaining.len(),
            "incremental update finished"
        );
        report
    }
}
