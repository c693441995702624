//! Eastmoney daily kline provider.
//!
//! Fetches daily bars from the public `push2his` kline endpoint. Requesting
//! `fields2=f51..f61` makes every kline row carry exactly the eleven store
//! columns in store order, so rows go straight through [`Bar::from_fields`].
//!
//! The endpoint is unauthenticated and throttles aggressive clients by
//! resetting connections or answering 403/429. This provider makes a single
//! request per call; retrying and pacing belong to the caller.

use super::provider::{DataProvider, ProviderError};
use crate::domain::{check_strictly_increasing, Bar, InstrumentCode};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_PRIMARY_URL: &str = "https://push2his.eastmoney.com";
pub const DEFAULT_SECONDARY_URL: &str = "http://push2his.eastmoney.com";

const KLINE_PATH: &str = "/api/qt/stock/kline/get";
const FIELDS1: &str = "f1,f2,f3,f4,f5,f6";
const FIELDS2: &str = "f51,f52,f53,f54,f55,f56,f57,f58,f59,f60,f61";
/// `klt` value for daily bars.
const DAILY: u32 = 101;

/// Price adjustment applied by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Adjust {
    None,
    /// Forward-adjusted.
    #[default]
    Qfq,
    /// Backward-adjusted.
    Hfq,
}

impl Adjust {
    fn fqt(self) -> u8 {
        match self {
            Adjust::None => 0,
            Adjust::Qfq => 1,
            Adjust::Hfq => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EastmoneyConfig {
    pub name: String,
    pub base_url: String,
    pub adjust: Adjust,
    pub timeout: Duration,
}

impl EastmoneyConfig {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            adjust: Adjust::default(),
            timeout: Duration::from_secs(15),
        }
    }
}

/// Kline API response. `data` is null for unknown codes.
#[derive(Debug, Deserialize)]
struct KlineResponse {
    data: Option<KlineData>,
}

#[derive(Debug, Deserialize)]
struct KlineData {
    /// Missing and null both mean no bars.
    #[serde(default)]
    klines: Option<Vec<String>>,
}

pub struct EastmoneyProvider {
    client: reqwest::blocking::Client,
    config: EastmoneyConfig,
}

impl EastmoneyProvider {
    pub fn new(config: EastmoneyConfig) -> Result<Self, ProviderError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .map_err(|e| ProviderError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    /// Build the kline URL for a code and inclusive date range.
    fn kline_url(&self, code: &InstrumentCode, start: NaiveDate, end: NaiveDate) -> String {
        format!(
            "{base}{KLINE_PATH}?secid={market}.{code}&fields1={FIELDS1}&fields2={FIELDS2}\
             &klt={DAILY}&fqt={fqt}&beg={beg}&end={end}",
            base = self.config.base_url.trim_end_matches('/'),
            market = code.market_id(),
            fqt = self.config.adjust.fqt(),
            beg = start.format("%Y%m%d"),
            end = end.format("%Y%m%d"),
        )
    }
}

impl DataProvider for EastmoneyProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn fetch_range(
        &self,
        code: &InstrumentCode,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, ProviderError> {
        let url = self.kline_url(code, start, end);
        let resp = self
            .client
            .get(&url)
            .send()
            .map_err(|e| ProviderError::Network(error_chain(&e)))?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status == reqwest::StatusCode::FORBIDDEN
        {
            let retry_after_secs = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            return Err(ProviderError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            return Err(ProviderError::Network(format!("HTTP {status} for {code}")));
        }

        let body = resp
            .text()
            .map_err(|e| ProviderError::Network(error_chain(&e)))?;
        parse_klines(&body, start, end)
    }
}

/// Parse a kline response body into bars within `[start, end]`.
fn parse_klines(body: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<Bar>, ProviderError> {
    let resp: KlineResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::ResponseFormat(format!("invalid kline JSON: {e}")))?;

    let klines = resp.data.and_then(|data| data.klines).unwrap_or_default();

    let mut bars = Vec::with_capacity(klines.len());
    for line in &klines {
        let fields: Vec<&str> = line.split(',').collect();
        let bar = Bar::from_fields(&fields)?;
        if bar.date >= start && bar.date <= end {
            bars.push(bar);
        }
    }
    check_strictly_increasing(&bars)?;
    Ok(bars)
}

/// Render an error with its full source chain.
///
/// reqwest's top-level message is generic ("error sending request"); the
/// cause that identifies a reset or refused connection sits further down.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
