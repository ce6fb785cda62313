// =============================================================================
// SQL State Store — sqlx-backed durability for trades and portfolio
// checkpoints, for deployments with a real database behind them.
// =============================================================================
//
// Schema holds one `trades` table and one `portfolio_checkpoints` table:
// one row per fill, one row per checkpoint. Uses SQLite via `sqlx`;
// swapping the pool for Postgres is a connection-string change, not a
// query change.
// =============================================================================

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

use crate::error::{EngineError, EngineResult};
use crate::types::{Action, PortfolioCheckpoint, Position, TradeRecord};

pub struct SqlStateStore {
    pool: SqlitePool,
}

impl SqlStateStore {
    pub async fn connect(url: &str) -> EngineResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(|e| EngineError::persistence(format!("failed to connect to state store: {e}")))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS trades (
                id TEXT PRIMARY KEY,
                ts INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                action TEXT NOT NULL,
                strategy_id TEXT NOT NULL,
                signal_price REAL NOT NULL,
                execution_price REAL NOT NULL,
                size REAL NOT NULL,
                commission REAL NOT NULL,
                slippage_bps REAL NOT NULL,
                pnl REAL,
                portfolio_equity_after REAL NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| EngineError::persistence(format!("failed to create trades table: {e}")))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS portfolio_checkpoints (
                ts INTEGER PRIMARY KEY,
                cash REAL NOT NULL,
                equity REAL NOT NULL,
                positions_json TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| EngineError::persistence(format!("failed to create checkpoints table: {e}")))?;

        Ok(Self { pool })
    }

    fn row_to_trade(row: &sqlx::sqlite::SqliteRow) -> EngineResult<TradeRecord> {
        let action_str: String = row.try_get("action").map_err(sql_err)?;
        let action = match action_str.as_str() {
            "BUY" => Action::Buy,
            "SELL" => Action::Sell,
            _ => Action::Hold,
        };
        Ok(TradeRecord {
            id: row.try_get("id").map_err(sql_err)?,
            ts: row.try_get("ts").map_err(sql_err)?,
            symbol: row.try_get("symbol").map_err(sql_err)?,
            action,
            strategy_id: row.try_get("strategy_id").map_err(sql_err)?,
            signal_price: row.try_get("signal_price").map_err(sql_err)?,
            execution_price: row.try_get("execution_price").map_err(sql_err)?,
            size: row.try_get("size").map_err(sql_err)?,
            commission: row.try_get("commission").map_err(sql_err)?,
            slippage_bps: row.try_get("slippage_bps").map_err(sql_err)?,
            pnl: row.try_get("pnl").map_err(sql_err)?,
            portfolio_equity_after: row.try_get("portfolio_equity_after").map_err(sql_err)?,
        })
    }
}

fn sql_err(e: sqlx::Error) -> EngineError {
    EngineError::persistence(format!("row decode failed: {e}"))
}

#[async_trait]
impl super::StateStore for SqlStateStore {
    async fn save_trade(&self, trade: &TradeRecord) -> EngineResult<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO trades
             (id, ts, symbol, action, strategy_id, signal_price, execution_price, size, commission, slippage_bps, pnl, portfolio_equity_after)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&trade.id)
        .bind(trade.ts)
        .bind(trade.symbol.to_string())
        .bind(trade.action.to_string())
        .bind(&trade.strategy_id)
        .bind(trade.signal_price)
        .bind(trade.execution_price)
        .bind(trade.size)
        .bind(trade.commission)
        .bind(trade.slippage_bps)
        .bind(trade.pnl)
        .bind(trade.portfolio_equity_after)
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::persistence(format!("failed to save trade: {e}")))?;
        Ok(())
    }

    async fn save_checkpoint(&self, checkpoint: &PortfolioCheckpoint) -> EngineResult<()> {
        let positions_json = serde_json::to_string(&checkpoint.positions)
            .map_err(|e| EngineError::persistence(format!("failed to serialise positions: {e}")))?;
        sqlx::query(
            "INSERT OR REPLACE INTO portfolio_checkpoints (ts, cash, equity, positions_json) VALUES (?, ?, ?, ?)",
        )
        .bind(checkpoint.ts)
        .bind(checkpoint.cash)
        .bind(checkpoint.equity)
        .bind(positions_json)
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::persistence(format!("failed to save checkpoint: {e}")))?;
        Ok(())
    }

    async fn latest_checkpoint(&self) -> EngineResult<Option<PortfolioCheckpoint>> {
        let row = sqlx::query("SELECT ts, cash, equity, positions_json FROM portfolio_checkpoints ORDER BY ts DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| EngineError::persistence(format!("failed to load checkpoint: {e}")))?;

        match row {
            None => Ok(None),
            Some(row) => {
                let positions_json: String = row.try_get("positions_json").map_err(sql_err)?;
                let positions: std::collections::HashMap<String, Position> = serde_json::from_str(&positions_json)
                    .map_err(|e| EngineError::persistence(format!("corrupt checkpoint positions: {e}")))?;
                Ok(Some(PortfolioCheckpoint {
                    ts: row.try_get("ts").map_err(sql_err)?,
                    cash: row.try_get("cash").map_err(sql_err)?,
                    equity: row.try_get("equity").map_err(sql_err)?,
                    positions,
                }))
            }
        }
    }

    async fn trades_since(&self, since_ts: i64) -> EngineResult<Vec<TradeRecord>> {
        let rows = sqlx::query("SELECT * FROM trades WHERE ts > ? ORDER BY ts ASC")
            .bind(since_ts)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| EngineError::persistence(format!("failed to query trades: {e}")))?;
        rows.iter().map(Self::row_to_trade).collect()
    }

    async fn prune(&self, retention_days: i64, now: i64) -> EngineResult<()> {
        let cutoff = now - retention_days * 86_400;
        sqlx::query("DELETE FROM trades WHERE ts < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| EngineError::persistence(format!("failed to prune trades: {e}")))?;
        sqlx::query("DELETE FROM portfolio_checkpoints WHERE ts < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| EngineError::persistence(format!("failed to prune checkpoints: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_store::StateStore;

    fn trade(ts: i64) -> TradeRecord {
        TradeRecord {
            id: TradeRecord::new_id(),
            ts,
            symbol: "AAA".to_string(),
            action: Action::Buy,
            strategy_id: "m".to_string(),
            signal_price: 100.0,
            execution_price: 100.0,
            size: 1.0,
            commission: 0.0,
            slippage_bps: 0.0,
            pnl: None,
            portfolio_equity_after: 10_000.0,
        }
    }

    #[tokio::test]
    async fn round_trips_trades_through_sqlite() {
        let store = SqlStateStore::connect("sqlite::memory:").await.unwrap();
        store.save_trade(&trade(100)).await.unwrap();
        store.save_trade(&trade(200)).await.unwrap();
        let trades = store.trades_since(0).await.unwrap();
        assert_eq!(trades.len(), 2);
    }

    #[tokio::test]
    async fn checkpoint_round_trips() {
        let store = SqlStateStore::connect("sqlite::memory:").await.unwrap();
        assert!(store.latest_checkpoint().await.unwrap().is_none());
        let cp = PortfolioCheckpoint { ts: 50, cash: 1_000.0, equity: 2_000.0, positions: Default::default() };
        store.save_checkpoint(&cp).await.unwrap();
        let loaded = store.latest_checkpoint().await.unwrap().unwrap();
        assert_eq!(loaded.ts, 50);
    }
}
