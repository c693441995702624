//! Run configuration.
//!
//! Loaded once per invocation from an optional TOML file. Every field has a
//! default, so an absent file yields a working setup:
//!
//! ```toml
//! store_dir = "fund_data"
//! codes_file = "etf.txt"
//! epoch = "1970-01-01"
//!
//! [retry]
//! attempts = 3
//! backoff_step_secs = 15
//! cooldown_secs = 30
//!
//! [pacing]
//! jitter_min_ms = 1500
//! jitter_max_ms = 3500
//!
//! [limits]
//! run_quota = 100
//! circuit_breaker_threshold = 5
//!
//! [bulk]
//! workers = 10
//! provider = 0
//!
//! [[providers]]
//! name = "eastmoney"
//! base_url = "https://push2his.eastmoney.com"
//! adjust = "qfq"
//! ```

use crate::batch::RunLimits;
use crate::pacing::Jitter;
use crate::sync::default_epoch;
use chrono::NaiveDate;
use etfsync_core::data::{
    Adjust, DataProvider, EastmoneyConfig, EastmoneyProvider, ProviderChain, ProviderError,
    RetryPolicy, DEFAULT_RATE_LIMIT_SIGNATURES,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Directory holding one `{CODE}.csv` per instrument.
    pub store_dir: PathBuf,
    /// Instrument list file.
    pub codes_file: PathBuf,
    /// Fetch window start for stores that exist but hold no bars yet, and for
    /// bulk loads.
    pub epoch: NaiveDate,
    pub retry: RetryConfig,
    pub pacing: PacingConfig,
    pub limits: LimitsConfig,
    pub bulk: BulkConfig,
    /// Provider chain, in rotation order.
    pub providers: Vec<ProviderConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub attempts: u32,
    pub backoff_step_secs: u64,
    pub cooldown_secs: u64,
    pub rate_limit_signatures: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PacingConfig {
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
    /// Fixed seed for reproducible jitter. Entropy-seeded when absent.
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Successful syncs allowed per run.
    pub run_quota: u32,
    /// Consecutive `SourceExhausted` results that abort the run.
    pub circuit_breaker_threshold: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BulkConfig {
    pub workers: usize,
    /// Index into `providers` of the single source used for bulk loads.
    pub provider: usize,
    pub overwrite: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub adjust: Adjust,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    15
}

/// Named jitter ranges for different levels of caution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacingProfile {
    /// 1.5–3.5 s between instruments.
    Light,
    /// 5–10 s between instruments.
    Defensive,
}

impl PacingProfile {
    pub fn jitter_range_ms(self) -> (u64, u64) {
        match self {
            PacingProfile::Light => (1_500, 3_500),
            PacingProfile::Defensive => (5_000, 10_000),
        }
    }
}

/// Values fixed for the duration of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    /// The run's calendar date; stores dated on or after it are current.
    pub today: NaiveDate,
    /// Fingerprint of the effective configuration and run date.
    pub run_id: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from("fund_data"),
            codes_file: PathBuf::from("etf.txt"),
            epoch: default_epoch(),
            retry: RetryConfig::default(),
            pacing: PacingConfig::default(),
            limits: LimitsConfig::default(),
            bulk: BulkConfig::default(),
            providers: vec![
                ProviderConfig {
                    name: "eastmoney".into(),
                    base_url: etfsync_core::data::eastmoney::DEFAULT_PRIMARY_URL.into(),
                    adjust: Adjust::Qfq,
                    timeout_secs: default_timeout_secs(),
                },
                ProviderConfig {
                    name: "eastmoney-http".into(),
                    base_url: etfsync_core::data::eastmoney::DEFAULT_SECONDARY_URL.into(),
                    adjust: Adjust::Qfq,
                    timeout_secs: default_timeout_secs(),
                },
            ],
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_step_secs: 15,
            cooldown_secs: 30,
            rate_limit_signatures: DEFAULT_RATE_LIMIT_SIGNATURES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        let (jitter_min_ms, jitter_max_ms) = PacingProfile::Light.jitter_range_ms();
        Self {
            jitter_min_ms,
            jitter_max_ms,
            seed: None,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            run_quota: 100,
            circuit_breaker_threshold: 5,
        }
    }
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            provider: 0,
            overwrite: false,
        }
    }
}

impl SyncConfig {
    /// Load a config from a TOML file and validate it.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse a config from a TOML string and validate it.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.retry.attempts == 0 {
            return invalid("retry.attempts must be at least 1");
        }
        if self.limits.run_quota == 0 {
            return invalid("limits.run_quota must be at least 1");
        }
        if self.limits.circuit_breaker_threshold == 0 {
            return invalid("limits.circuit_breaker_threshold must be at least 1");
        }
        if self.pacing.jitter_min_ms > self.pacing.jitter_max_ms {
            return invalid("pacing.jitter_min_ms exceeds pacing.jitter_max_ms");
        }
        if self.providers.is_empty() {
            return invalid("at least one [[providers]] entry is required");
        }
        if self.bulk.workers == 0 {
            return invalid("bulk.workers must be at least 1");
        }
        if self.bulk.provider >= self.providers.len() {
            return Err(ConfigError::Invalid(format!(
                "bulk.provider index {} out of range ({} providers)",
                self.bulk.provider,
                self.providers.len()
            )));
        }
        Ok(())
    }

    /// Override the jitter range with a named profile.
    pub fn apply_profile(&mut self, profile: PacingProfile) {
        let (min, max) = profile.jitter_range_ms();
        self.pacing.jitter_min_ms = min;
        self.pacing.jitter_max_ms = max;
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.attempts,
            Duration::from_secs(self.retry.backoff_step_secs),
            Duration::from_secs(self.retry.cooldown_secs),
        )
        .with_signatures(self.retry.rate_limit_signatures.iter().cloned())
    }

    pub fn run_limits(&self) -> RunLimits {
        RunLimits {
            run_quota: self.limits.run_quota,
            circuit_breaker_threshold: self.limits.circuit_breaker_threshold,
        }
    }

    pub fn jitter(&self) -> Jitter {
        let (min, max) = self.jitter_range();
        Jitter::new(min, max, self.pacing.seed)
    }

    pub fn jitter_range(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.pacing.jitter_min_ms),
            Duration::from_millis(self.pacing.jitter_max_ms),
        )
    }

    /// Build the configured providers, in chain order.
    pub fn build_chain(&self) -> Result<ProviderChain, ProviderError> {
        let providers = self
            .providers
            .iter()
            .map(|p| {
                let provider: Box<dyn DataProvider> = Box::new(EastmoneyProvider::new(
                    EastmoneyConfig {
                        name: p.name.clone(),
                        base_url: p.base_url.clone(),
                        adjust: p.adjust,
                        timeout: Duration::from_secs(p.timeout_secs),
                    },
                )?);
                Ok(provider)
            })
            .collect::<Result<Vec<_>, ProviderError>>()?;
        Ok(ProviderChain::new(providers))
    }

    /// Deterministic BLAKE3 fingerprint of this config plus the run date.
    pub fn fingerprint(&self, today: NaiveDate) -> String {
        let encoded =
            serde_json::to_vec(self).unwrap_or_else(|_| format!("{self:?}").into_bytes());
        let mut hasher = blake3::Hasher::new();
        hasher.update(&encoded);
        hasher.update(today.to_string().as_bytes());
        hasher.finalize().to_hex()[..16].to_string()
    }

    /// Fix the run date and derive the run id.
    pub fn run_context(&self, today: NaiveDate) -> RunContext {
        RunContext {
            today,
            run_id: self.fingerprint(today),
        }
    }
}
