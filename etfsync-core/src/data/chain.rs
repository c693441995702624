//! Ordered provider chain.
//!
//! Callers pick a provider by position. The chain itself never probes
//! providers; a source is known to be down only after a call to it fails.

use super::provider::DataProvider;

pub struct ProviderChain {
    providers: Vec<Box<dyn DataProvider>>,
}

impl ProviderChain {
    pub fn new(providers: Vec<Box<dyn DataProvider>>) -> Self {
        Self { providers }
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Provider at a fixed position in the chain.
    pub fn get(&self, index: usize) -> Option<&dyn DataProvider> {
        self.providers.get(index).map(|p| p.as_ref())
    }

    /// Provider for a zero-based attempt number: attempts rotate through the
    /// chain rather than hammering the first source.
    pub fn for_attempt(&self, attempt: u32) -> Option<&dyn DataProvider> {
        if self.providers.is_empty() {
            return None;
        }
        self.get(attempt as usize % self.providers.len())
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }
}

impl std::fmt::Debug for ProviderChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderChain")
            .field("providers", &self.names())
            .finish()
    }
}
