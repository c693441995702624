//! Data layer: the bar store, providers, and the retry policy.

pub mod chain;
pub mod eastmoney;
pub mod provider;
pub mod retry;
pub mod store;
pub mod universe;

pub use chain::ProviderChain;
pub use eastmoney::{Adjust, EastmoneyConfig, EastmoneyProvider};
pub use provider::{DataProvider, ProviderError};
pub use retry::{Backoff, RetryPolicy, DEFAULT_RATE_LIMIT_SIGNATURES};
pub use store::{BarStore, StoreError, StoreSummary};
pub use universe::{load_codes, parse_codes, UniverseError};
