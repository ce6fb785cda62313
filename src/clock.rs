// =============================================================================
// Clock — pluggable time source for live trading and backtests
// =============================================================================
//
// The real implementation sleeps on the wall clock; a simulated implementation
// advances on demand and carries a seeded RNG so that randomness used for
// realism (e.g. the slippage jitter in the simulated order venue) is
// reproducible given a fixed seed.
// =============================================================================

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[async_trait]
pub trait Clock: Send + Sync {
    /// Current time as a unix timestamp in seconds.
    fn now(&self) -> i64;
    /// Suspend for the given duration.
    async fn sleep(&self, duration: std::time::Duration);
    /// Draw a uniform random value in `[lo, hi)`. Used only by simulated
    /// components (e.g. slippage jitter); real clocks never call this.
    fn uniform(&self, lo: f64, hi: f64) -> f64;
}

/// Wall-clock time, real `tokio::time::sleep`, non-deterministic RNG.
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> i64 {
        Utc::now().timestamp()
    }

    async fn sleep(&self, duration: std::time::Duration) {
        tokio::time::sleep(duration).await;
    }

    fn uniform(&self, lo: f64, hi: f64) -> f64 {
        rand::thread_rng().gen_range(lo..hi)
    }
}

/// Manually-advanced clock for backtests and tests. `sleep` returns
/// immediately; time only moves when `advance` is called. The RNG is seeded
/// so that two runs with the same seed produce identical jitter.
pub struct SimClock {
    now: AtomicI64,
    rng: Mutex<StdRng>,
}

impl SimClock {
    pub fn new(start: i64, seed: u64) -> Self {
        Self {
            now: AtomicI64::new(start),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

#[async_trait]
impl Clock for SimClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }

    async fn sleep(&self, _duration: std::time::Duration) {
        // No-op: callers advance simulated time explicitly via `advance`.
    }

    fn uniform(&self, lo: f64, hi: f64) -> f64 {
        self.rng.lock().gen_range(lo..hi)
    }
}
