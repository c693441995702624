//! etfsync core: the archive's building blocks.
//!
//! This crate holds everything that touches data directly:
//! - Domain types (instrument codes, the eleven-column daily bar)
//! - The append-only per-instrument CSV store
//! - The provider trait, the ordered provider chain and the Eastmoney source
//! - The retry policy shared by every provider call
//! - Instrument list loading

pub mod data;
pub mod domain;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: types shared with the bulk loader's worker pool
    /// are Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<domain::Bar>();
        require_sync::<domain::Bar>();
        require_send::<domain::InstrumentCode>();
        require_sync::<domain::InstrumentCode>();
        require_send::<data::BarStore>();
        require_sync::<data::BarStore>();
        require_send::<data::ProviderChain>();
        require_sync::<data::ProviderChain>();
        require_send::<data::RetryPolicy>();
        require_sync::<data::RetryPolicy>();
        require_send::<data::EastmoneyProvider>();
        require_sync::<data::EastmoneyProvider>();
    }
}
