pub mod kv;
pub mod sql;

pub use kv::KvStateStore;
pub use sql::SqlStateStore;

use async_trait::async_trait;

use crate::error::EngineResult;
use crate::types::{PortfolioCheckpoint, TradeRecord};

/// C12 — State Store. Two interchangeable backends (embedded JSON-Lines file
/// and SQL via `sqlx`) implement the same durability contract: append trades,
/// checkpoint the portfolio periodically, and recover on restart.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn save_trade(&self, trade: &TradeRecord) -> EngineResult<()>;
    async fn save_checkpoint(&self, checkpoint: &PortfolioCheckpoint) -> EngineResult<()>;
    async fn latest_checkpoint(&self) -> EngineResult<Option<PortfolioCheckpoint>>;
    /// Trades with `ts` strictly after `since_ts`, in chronological order —
    /// the replay set for crash recovery.
    async fn trades_since(&self, since_ts: i64) -> EngineResult<Vec<TradeRecord>>;
    /// Delete trades/checkpoints older than `retention_days`.
    async fn prune(&self, retention_days: i64, now: i64) -> EngineResult<()>;
}

/// Replays the latest checkpoint plus every trade after it to reconstruct
/// the portfolio on startup. A corrupt trade log past the checkpoint is the
/// caller's signal to enter DEGRADED mode rather than trust a partial
/// reconstruction.
pub async fn recover(store: &dyn StateStore) -> EngineResult<RecoveredState> {
    let checkpoint = store.latest_checkpoint().await?;
    let since_ts = checkpoint.as_ref().map(|c| c.ts).unwrap_or(0);
    let trades = store.trades_since(since_ts).await?;
    Ok(RecoveredState { checkpoint, replay_trades: trades })
}

#[derive(Debug, Clone)]
pub struct RecoveredState {
    pub checkpoint: Option<PortfolioCheckpoint>,
    pub replay_trades: Vec<TradeRecord>,
}
