pub mod momentum;
pub mod registry;

pub use registry::StrategyRegistry;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::EngineResult;
use crate::types::{MarketFrame, Signal};

/// A single trading strategy. Implementations must be fast and side-effect
/// free beyond their own internal state; the registry isolates faults so one
/// broken strategy never blocks the others.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    /// Produce at most one signal per symbol for this tick. An empty vector
    /// means "no opinion this tick", not an error.
    async fn generate_signal(
        &self,
        frames: &HashMap<String, MarketFrame>,
    ) -> EngineResult<Vec<Signal>>;

    /// Notified after a fill so stateful strategies can update internally
    /// (e.g. cooldowns, position tracking). Default no-op.
    fn on_trade_filled(&self, _trade_symbol: &str, _pnl: Option<f64>) {}
}
