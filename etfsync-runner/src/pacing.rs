//! Pacing primitives: the sleeper seam and the inter-instrument jitter.
//!
//! Every wait in a run goes through a [`Sleeper`], so tests can record the
//! schedule instead of sleeping through it.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// Blocks the calling thread for a duration.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Real sleeper backed by `std::thread::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Uniform random delay sampler over `[min, max]` at millisecond resolution.
#[derive(Debug, Clone)]
pub struct Jitter {
    min_ms: u64,
    max_ms: u64,
    rng: StdRng,
}

impl Jitter {
    /// `min > max` is swapped rather than rejected; config validation
    /// reports it before a run starts.
    pub fn new(min: Duration, max: Duration, seed: Option<u64>) -> Self {
        let (a, b) = (millis(min), millis(max));
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            min_ms: a.min(b),
            max_ms: a.max(b),
            rng,
        }
    }

    /// A jitter that never waits.
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, Some(0))
    }

    pub fn range(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.min_ms),
            Duration::from_millis(self.max_ms),
        )
    }

    pub fn sample(&mut self) -> Duration {
        if self.min_ms == self.max_ms {
            return Duration::from_millis(self.min_ms);
        }
        Duration::from_millis(self.rng.gen_range(self.min_ms..=self.max_ms))
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_stay_in_range() {
        let mut jitter = Jitter::new(Duration::from_millis(1500), Duration::from_millis(3500), None);
        for _ in 0..500 {
            let d = jitter.sample();
            assert!(d >= Duration::from_millis(1500) && d <= Duration::from_millis(3500));
        }
    }

    #[test]
    fn seeded_jitter_is_reproducible() {
        let mut a = Jitter::new(Duration::from_secs(5), Duration::from_secs(10), Some(42));
        let mut b = Jitter::new(Duration::from_secs(5), Duration::from_secs(10), Some(42));
        let xs: Vec<_> = (0..20).map(|_| a.sample()).collect();
        let ys: Vec<_> = (0..20).map(|_| b.sample()).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn degenerate_range_is_constant() {
        let mut jitter = Jitter::new(Duration::from_millis(7), Duration::from_millis(7), None);
        assert_eq!(jitter.sample(), Duration::from_millis(7));
        assert_eq!(Jitter::none().sample(), Duration::ZERO);
    }

    #[test]
    fn inverted_bounds_are_swapped() {
        let jitter = Jitter::new(Duration::from_secs(3), Duration::from_secs(1), Some(1));
        assert_eq!(jitter.range(), (Duration::from_secs(1), Duration::from_secs(3)));
    }
}
