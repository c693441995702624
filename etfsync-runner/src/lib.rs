//! etfsync runner: sync orchestration on top of `etfsync-core`.
//!
//! - Run configuration (TOML, pacing profiles, run id)
//! - Pacing: the injectable sleeper and inter-instrument jitter
//! - Per-instrument incremental sync engine
//! - Sequential batch controller with run quota and circuit breaker
//! - Parallel bulk loader for cold starts
//! - JSON run reports

pub mod batch;
pub mod bulk;
pub mod config;
pub mod pacing;
pub mod report;
pub mod sync;

pub use batch::{
    BatchRunController, BatchRunState, InstrumentResult, RunLimits, RunOutcome, RunReport,
};
pub use bulk::{BulkError, BulkLoader, BulkOutcome, BulkReport, BulkResult};
pub use config::{ConfigError, PacingProfile, RunContext, SyncConfig};
pub use pacing::{Jitter, Sleeper, ThreadSleeper};
pub use report::{write_json, ReportError};
pub use sync::{default_epoch, FetchWindow, Freshness, SyncAttemptResult, SyncEngine};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn config_is_send_sync() {
        assert_send::<SyncConfig>();
        assert_sync::<SyncConfig>();
    }

    #[test]
    fn results_are_send_sync() {
        assert_send::<SyncAttemptResult>();
        assert_sync::<SyncAttemptResult>();
        assert_send::<RunReport>();
        assert_sync::<RunReport>();
        assert_send::<BulkReport>();
        assert_sync::<BulkReport>();
    }

    #[test]
    fn bulk_loader_is_sync() {
        assert_sync::<BulkLoader<'static>>();
    }
}
