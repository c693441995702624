//! Per-instrument incremental sync.
//!
//! The engine runs one instrument through:
//!
//! ```text
//! freshness check ─┬─ Skipped / AlreadyCurrent / StoreUnreadable
//!                  └─ fetch window ── attempts (rotating providers, backoff)
//!                                       ├─ EmptyResponse
//!                                       ├─ merge ─┬─ Success
//!                                       │         └─ UpToDate
//!                                       └─ SourceExhausted
//! ```
//!
//! The two halves are exposed separately so the batch controller can pace
//! only the instruments that actually go to the network.

use crate::pacing::Sleeper;
use chrono::NaiveDate;
use etfsync_core::data::{BarStore, ProviderChain, RetryPolicy, StoreError};
use etfsync_core::domain::{check_strictly_increasing, Bar, InstrumentCode};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Terminal state of one instrument in one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncAttemptResult {
    /// No local store; bulk-load creates stores, incremental sync never does.
    Skipped,
    /// Local last date is on or after the run date.
    AlreadyCurrent,
    Success { rows_appended: usize, source: String },
    /// Fetch returned rows, none newer than the local last date.
    UpToDate,
    /// Fetch returned no rows at all.
    EmptyResponse,
    /// Every attempt failed.
    SourceExhausted { last_error: String },
    /// The store exists but cannot be read or appended to. Needs a bulk-load.
    StoreUnreadable { reason: String },
}

impl SyncAttemptResult {
    pub fn is_success(&self) -> bool {
        matches!(self, SyncAttemptResult::Success { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, SyncAttemptResult::SourceExhausted { .. })
    }

    /// Short label for logs and tables.
    pub fn label(&self) -> &'static str {
        match self {
            SyncAttemptResult::Skipped => "skipped",
            SyncAttemptResult::AlreadyCurrent => "already_current",
            SyncAttemptResult::Success { .. } => "success",
            SyncAttemptResult::UpToDate => "up_to_date",
            SyncAttemptResult::EmptyResponse => "empty_response",
            SyncAttemptResult::SourceExhausted { .. } => "source_exhausted",
            SyncAttemptResult::StoreUnreadable { .. } => "store_unreadable",
        }
    }
}

/// Inclusive date range to request, plus the local last date it was
/// derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub last_date: Option<NaiveDate>,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Result of the local, network-free half of a sync.
#[derive(Debug, Clone, PartialEq)]
pub enum Freshness {
    Done(SyncAttemptResult),
    NeedsFetch(FetchWindow),
}

/// Window start used when nothing narrower is known: 1970-01-01.
pub fn default_epoch() -> NaiveDate {
    NaiveDate::default()
}

pub struct SyncEngine<'a> {
    store: &'a BarStore,
    chain: &'a ProviderChain,
    policy: &'a RetryPolicy,
    sleeper: &'a dyn Sleeper,
    epoch: NaiveDate,
}

impl<'a> SyncEngine<'a> {
    pub fn new(
        store: &'a BarStore,
        chain: &'a ProviderChain,
        policy: &'a RetryPolicy,
        sleeper: &'a dyn Sleeper,
    ) -> Self {
        Self {
            store,
            chain,
            policy,
            sleeper,
            epoch: default_epoch(),
        }
    }

    /// Window start for stores that exist but hold no bars.
    pub fn with_epoch(mut self, epoch: NaiveDate) -> Self {
        self.epoch = epoch;
        self
    }

    pub fn store(&self) -> &BarStore {
        self.store
    }

    /// Full sync of one instrument.
    pub fn sync(&self, code: &InstrumentCode, today: NaiveDate) -> SyncAttemptResult {
        match self.check_freshness(code, today) {
            Freshness::Done(result) => result,
            Freshness::NeedsFetch(window) => self.fetch_and_merge(code, &window),
        }
    }

    /// Decide from local state alone whether a fetch is needed.
    pub fn check_freshness(&self, code: &InstrumentCode, today: NaiveDate) -> Freshness {
        if !self.store.exists(code) {
            debug!(code = %code, "no local store, skipping");
            return Freshness::Done(SyncAttemptResult::Skipped);
        }

        let last_date = match self.store.last_date(code) {
            Ok(last) => last,
            Err(StoreError::NotFound { .. }) => return Freshness::Done(SyncAttemptResult::Skipped),
            Err(e) => {
                warn!(code = %code, error = %e, "store unreadable, needs bulk-load");
                return Freshness::Done(SyncAttemptResult::StoreUnreadable {
                    reason: e.to_string(),
                });
            }
        };

        match last_date {
            Some(last) if last >= today => {
                debug!(code = %code, %last, "already current");
                Freshness::Done(SyncAttemptResult::AlreadyCurrent)
            }
            _ => Freshness::NeedsFetch(FetchWindow {
                last_date,
                start: last_date.unwrap_or(self.epoch),
                end: today,
            }),
        }
    }

    /// Run the bounded attempt loop for `window` and merge what comes back.
    ///
    /// Attempt `i` uses provider `i mod len`. Between failed attempts the
    /// engine sleeps whatever the retry policy prescribes; nothing follows
    /// the last attempt.
    pub fn fetch_and_merge(&self, code: &InstrumentCode, window: &FetchWindow) -> SyncAttemptResult {
        let mut last_error = String::from("no providers configured");
        let mut data_rejected = false;

        for attempt in 0..self.policy.attempts() {
            let Some(provider) = self.chain.for_attempt(attempt) else {
                break;
            };
            let attempt_number = attempt + 1;
            debug!(
                code = %code,
                attempt = attempt_number,
                provider = provider.name(),
                start = %window.start,
                end = %window.end,
                "fetching"
            );

            let fetched = provider
                .fetch_range(code, window.start, window.end)
                .and_then(|bars| {
                    check_strictly_increasing(&bars)?;
                    Ok(bars)
                });

            match fetched {
                Ok(bars) => return self.merge(code, window, bars, provider.name()),
                Err(err) => {
                    warn!(
                        code = %code,
                        attempt = attempt_number,
                        provider = provider.name(),
                        error = %err,
                        "fetch attempt failed"
                    );
                    last_error = format!("{}: {err}", provider.name());
                    data_rejected = err.is_data_error();
                    if let Some(backoff) = self.policy.backoff_after(attempt_number, &err) {
                        debug!(
                            code = %code,
                            delay_ms = backoff.duration().as_millis() as u64,
                            ?backoff,
                            "backing off"
                        );
                        self.sleeper.sleep(backoff.duration());
                    }
                }
            }
        }

        if data_rejected {
            warn!(
                code = %code,
                error = %last_error,
                "all attempts failed on rejected provider data, instrument needs manual attention"
            );
        } else {
            warn!(code = %code, error = %last_error, "all attempts failed");
        }
        SyncAttemptResult::SourceExhausted { last_error }
    }

    fn merge(
        &self,
        code: &InstrumentCode,
        window: &FetchWindow,
        bars: Vec<Bar>,
        source: &str,
    ) -> SyncAttemptResult {
        if bars.is_empty() {
            info!(code = %code, provider = source, "empty response");
            return SyncAttemptResult::EmptyResponse;
        }

        let fresh: Vec<Bar> = bars
            .into_iter()
            .filter(|bar| window.last_date.map_or(true, |last| bar.date > last))
            .collect();
        if fresh.is_empty() {
            info!(code = %code, provider = source, "up to date");
            return SyncAttemptResult::UpToDate;
        }

        match self.store.append(code, &fresh) {
            Ok(0) => SyncAttemptResult::UpToDate,
            Ok(rows) => {
                info!(code = %code, provider = source, rows, "appended");
                SyncAttemptResult::Success {
                    rows_appended: rows,
                    source: source.to_string(),
                }
            }
            Err(e) => {
                warn!(code = %code, error = %e, "append failed");
                SyncAttemptResult::StoreUnreadable {
                    reason: e.to_string(),
                }
            }
        }
    }
}
