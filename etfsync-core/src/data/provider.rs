//! Data provider trait and structured error types.
//!
//! The DataProvider trait abstracts over network sources so the sync engine
//! can rotate between them and tests can substitute scripted fakes.

use crate::domain::{Bar, InstrumentCode, SchemaError};
use chrono::NaiveDate;
use thiserror::Error;

/// Failure of a single fetch attempt.
///
/// An empty result is not an error: "nothing new" is a valid outcome and is
/// returned as `Ok(vec![])`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited by provider{}", retry_hint(.retry_after_secs))]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("response format changed: {0}")]
    ResponseFormat(String),

    #[error("schema mismatch: {0}")]
    Schema(#[from] SchemaError),
}

impl ProviderError {
    /// The provider answered but its payload was rejected. Retrying will not
    /// help; these point at the instrument's data rather than at throttling.
    pub fn is_data_error(&self) -> bool {
        matches!(self, ProviderError::ResponseFormat(_) | ProviderError::Schema(_))
    }
}

fn retry_hint(retry_after_secs: &Option<u64>) -> String {
    match retry_after_secs {
        Some(secs) => format!(" (retry after {secs}s)"),
        None => String::new(),
    }
}

/// A source of daily bars.
///
/// Implementations return bars dated within `[start, end]`, strictly
/// increasing. Provider health is only discovered by calling `fetch_range`;
/// there is no availability probe.
pub trait DataProvider: Send + Sync {
    /// Short name used in logs and sync results.
    fn name(&self) -> &str;

    fn fetch_range(
        &self,
        code: &InstrumentCode,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, ProviderError>;
}
