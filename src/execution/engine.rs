// =============================================================================
// Execution Engine — submits an `ExecutionPlan`'s child orders to a venue,
// aggregates fills into a `TradeRecord`, and mutates the portfolio.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::{instrument, warn};

use crate::clock::Clock;
use crate::error::{EngineError, EngineResult};
use crate::types::{
    Action, ChildOrder, ExecutionPlan, FillReport, FillStatus, Portfolio, PortfolioCheckpoint, Position, TradeRecord,
};

/// A venue capable of executing a single child order. Real implementations
/// wrap an exchange's order-entry API; `SimulatedOrderVenue` fills
/// synthetically for backtests.
#[async_trait]
pub trait OrderVenue: Send + Sync {
    async fn submit(
        &self,
        symbol: &str,
        side: Action,
        order: &ChildOrder,
        mark_price: f64,
        volatility: f64,
    ) -> EngineResult<FillReport>;
}

/// Fills every child order at `mark_price` under a "realistic" slippage
/// model: a fixed base, a size-fraction term, a volatility term, a fixed
/// venue-impact add-on, all jittered by `U(0.8, 1.2)` drawn from the injected
/// `Clock` so a seeded `SimClock` reproduces identical fills across runs.
pub struct SimulatedOrderVenue {
    clock: Arc<dyn Clock>,
    base_commission_bps: f64,
    market_impact_bps: f64,
}

impl SimulatedOrderVenue {
    pub fn new(clock: Arc<dyn Clock>, base_commission_bps: f64, market_impact_bps: f64) -> Self {
        Self { clock, base_commission_bps, market_impact_bps }
    }
}

#[async_trait]
impl OrderVenue for SimulatedOrderVenue {
    async fn submit(
        &self,
        _symbol: &str,
        side: Action,
        order: &ChildOrder,
        mark_price: f64,
        volatility: f64,
    ) -> EngineResult<FillReport> {
        let jitter = self.clock.uniform(0.8, 1.2);
        let size_fraction = (order.size / 5_000.0).min(1.0);
        let base_bps = 15.0 + 100.0 * size_fraction + 50.0 * volatility + self.market_impact_bps;
        let slippage_bps = base_bps * jitter;
        let direction = match side {
            Action::Buy => 1.0,
            Action::Sell => -1.0,
            Action::Hold => 0.0,
        };
        let fill_price = order.limit_price.unwrap_or(mark_price) * (1.0 + direction * slippage_bps / 10_000.0);
        let commission = order.size * fill_price * self.base_commission_bps / 10_000.0;

        Ok(FillReport {
            order_id: FillReport::new_id(),
            filled_size: order.size,
            avg_price: fill_price,
            commission,
            status: FillStatus::Filled,
        })
    }
}

/// C11 — Execution Engine.
pub struct ExecutionEngine {
    venue: Arc<dyn OrderVenue>,
    portfolio: RwLock<Portfolio>,
    seen_fill_ids: Mutex<HashSet<String>>,
}

impl ExecutionEngine {
    pub fn new(venue: Arc<dyn OrderVenue>, starting_cash: f64) -> Self {
        Self {
            venue,
            portfolio: RwLock::new(Portfolio::new(starting_cash)),
            seen_fill_ids: Mutex::new(HashSet::new()),
        }
    }

    pub fn portfolio_snapshot(&self) -> Portfolio {
        self.portfolio.read().clone()
    }

    /// Submit every child order in sequence, aggregate the weighted-average
    /// fill, reject (and revert nothing, since nothing mutated) if fewer
    /// than 95% of requested size filled, then mutate the portfolio.
    #[instrument(skip(self, plan, strategy_id))]
    pub async fn execute(
        &self,
        plan: &ExecutionPlan,
        strategy_id: &str,
        mark_price: f64,
        volatility: f64,
        now: i64,
        mark_prices: &HashMap<String, f64>,
    ) -> EngineResult<TradeRecord> {
        if plan.is_empty() {
            return Err(EngineError::execution_failure(&plan.symbol, "empty execution plan"));
        }

        let mut total_filled = 0.0;
        let mut notional = 0.0;
        let mut total_commission = 0.0;

        for child in &plan.orders {
            let report = self
                .venue
                .submit(&plan.symbol, plan.side, child, mark_price, volatility)
                .await
                .map_err(|e| EngineError::execution_failure(&plan.symbol, e.to_string()))?;

            if !self.accept_fill_id(&report.order_id) {
                warn!(order_id = %report.order_id, "duplicate fill report rejected");
                continue;
            }

            if report.status == FillStatus::Filled || report.status == FillStatus::Partial {
                total_filled += report.filled_size;
                notional += report.filled_size * report.avg_price;
                total_commission += report.commission;
            }
        }

        let fill_ratio = total_filled / plan.total_amount;
        if fill_ratio < 0.95 {
            return Err(EngineError::execution_failure(
                &plan.symbol,
                format!("only {:.1}% of requested size filled", fill_ratio * 100.0),
            ));
        }

        let avg_fill_price = if total_filled > 1e-12 { notional / total_filled } else { mark_price };
        let slippage_bps = (avg_fill_price - mark_price) / mark_price.max(1e-9) * 10_000.0;

        let pnl = self.apply_fill_raw(&plan.symbol, plan.side, strategy_id, total_filled, avg_fill_price, now);
        let mut marks = mark_prices.clone();
        marks.insert(plan.symbol.clone(), avg_fill_price);
        let equity_after = self.portfolio.read().equity(&marks);

        Ok(TradeRecord {
            id: TradeRecord::new_id(),
            ts: now,
            symbol: plan.symbol.clone(),
            action: plan.side,
            strategy_id: strategy_id.to_string(),
            signal_price: mark_price,
            execution_price: avg_fill_price,
            size: total_filled,
            commission: total_commission,
            slippage_bps,
            pnl,
            portfolio_equity_after: equity_after,
        })
    }

    fn accept_fill_id(&self, id: &str) -> bool {
        self.seen_fill_ids.lock().insert(id.to_string())
    }

    /// Mutates cash and the position book; returns realised PnL on a closing
    /// trade, `None` on an opening/averaging trade. Shared by live execution,
    /// checkpoint recovery replay, and anything else that needs to apply the
    /// same fill semantics outside the venue round-trip.
    fn apply_fill_raw(&self, symbol: &str, side: Action, strategy_id: &str, size: f64, price: f64, now: i64) -> Option<f64> {
        let mut portfolio = self.portfolio.write();
        let notional = size * price;

        match side {
            Action::Buy => {
                portfolio.cash -= notional;
                let entry = portfolio.positions.entry(symbol.to_string()).or_insert_with(|| Position {
                    symbol: symbol.to_string(),
                    size: 0.0,
                    avg_entry_price: price,
                    opened_at: now,
                    strategy_id: strategy_id.to_string(),
                });
                let new_size = entry.size + size;
                entry.avg_entry_price = if new_size > 1e-12 {
                    (entry.avg_entry_price * entry.size + notional) / new_size
                } else {
                    price
                };
                entry.size = new_size;
                None
            }
            Action::Sell => {
                portfolio.cash += notional;
                if let Some(position) = portfolio.positions.get_mut(symbol) {
                    let closed = size.min(position.size);
                    let pnl = closed * (price - position.avg_entry_price);
                    position.size -= closed;
                    if position.size <= 1e-9 {
                        portfolio.positions.remove(symbol);
                    }
                    Some(pnl)
                } else {
                    None
                }
            }
            Action::Hold => None,
        }
    }

    /// Emergency action: scale every open position down by `pct` (e.g. `0.5`
    /// halves everything), crediting cash for the closed fraction at
    /// `mark_prices` (falling back to entry price), and closing a position
    /// outright rather than leaving a sub-`min_closeable_size` remainder.
    /// Returns one closing `TradeRecord` per affected symbol.
    pub fn reduce_positions(
        &self,
        pct: f64,
        mark_prices: &HashMap<String, f64>,
        min_closeable_size: f64,
        strategy_id: &str,
        now: i64,
    ) -> Vec<TradeRecord> {
        let pct = pct.clamp(0.0, 1.0);
        let mut portfolio = self.portfolio.write();
        let symbols: Vec<String> = portfolio.positions.keys().cloned().collect();
        let mut trades = Vec::new();

        for symbol in symbols {
            let (entry_price, size) = {
                let position = &portfolio.positions[&symbol];
                (position.avg_entry_price, position.size)
            };
            let price = mark_prices.get(&symbol).copied().unwrap_or(entry_price);
            let closed_size = size * pct;
            if closed_size <= 1e-12 {
                continue;
            }
            let remaining = size - closed_size;
            let pnl = closed_size * (price - entry_price);
            portfolio.cash += closed_size * price;
            if remaining < min_closeable_size {
                portfolio.positions.remove(&symbol);
            } else {
                portfolio.positions.get_mut(&symbol).unwrap().size = remaining;
            }

            trades.push(TradeRecord {
                id: TradeRecord::new_id(),
                ts: now,
                symbol,
                action: Action::Sell,
                strategy_id: strategy_id.to_string(),
                signal_price: price,
                execution_price: price,
                size: closed_size,
                commission: 0.0,
                slippage_bps: 0.0,
                pnl: Some(pnl),
                portfolio_equity_after: portfolio.equity(mark_prices),
            });
        }

        trades
    }

    /// Emergency action: close every open position at `mark_prices`,
    /// crediting cash at the current mark. Equivalent to a 100% reduction.
    pub fn flatten_all(&self, mark_prices: &HashMap<String, f64>, strategy_id: &str, now: i64) -> Vec<TradeRecord> {
        self.reduce_positions(1.0, mark_prices, f64::INFINITY, strategy_id, now)
    }

    /// Crash recovery step 1: reset the live portfolio to a durable
    /// checkpoint, discarding whatever in-memory state preceded it.
    pub fn restore_from_checkpoint(&self, checkpoint: &PortfolioCheckpoint) {
        let mut portfolio = self.portfolio.write();
        portfolio.cash = checkpoint.cash;
        portfolio.positions = checkpoint.positions.clone();
    }

    /// Crash recovery step 2: re-apply a single trade recorded after the
    /// checkpoint, using the same mutation path as a live fill so replay and
    /// live execution can never diverge in semantics.
    pub fn replay_trade(&self, trade: &TradeRecord) {
        self.apply_fill_raw(&trade.symbol, trade.action, &trade.strategy_id, trade.size, trade.execution_price, trade.ts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimClock;
    use crate::types::OrderType;

    fn plan(side: Action, size: f64) -> ExecutionPlan {
        ExecutionPlan {
            symbol: "AAA".to_string(),
            side,
            total_amount: size,
            order_type: OrderType::Market,
            orders: vec![ChildOrder { order_type: OrderType::Market, size, limit_price: None, delay_seconds: 0.0 }],
            estimated_commission_bps: 5.0,
            estimated_slippage_bps: 5.0,
            deadline_seconds: 5.0,
        }
    }

    #[tokio::test]
    async fn buy_opens_a_position_and_debits_cash() {
        let clock = Arc::new(SimClock::new(0, 1));
        let venue = Arc::new(SimulatedOrderVenue::new(clock, 5.0, 5.0));
        let engine = ExecutionEngine::new(venue, 10_000.0);

        let trade = engine.execute(&plan(Action::Buy, 10.0), "momentum", 100.0, 0.0, 0, &HashMap::new()).await.unwrap();
        assert!(trade.size > 0.0);
        assert!(engine.portfolio_snapshot().cash < 10_000.0);
        assert!(engine.portfolio_snapshot().positions.contains_key("AAA"));
    }

    #[tokio::test]
    async fn sell_realises_pnl_on_a_closing_trade() {
        let clock = Arc::new(SimClock::new(0, 1));
        let venue = Arc::new(SimulatedOrderVenue::new(clock, 0.0, 0.0));
        let engine = ExecutionEngine::new(venue, 10_000.0);

        engine.execute(&plan(Action::Buy, 10.0), "momentum", 100.0, 0.0, 0, &HashMap::new()).await.unwrap();
        let trade = engine.execute(&plan(Action::Sell, 10.0), "momentum", 110.0, 0.0, 1, &HashMap::new()).await.unwrap();
        assert!(trade.pnl.is_some());
    }

    #[tokio::test]
    async fn empty_plan_is_rejected() {
        let clock = Arc::new(SimClock::new(0, 1));
        let venue = Arc::new(SimulatedOrderVenue::new(clock, 0.0, 0.0));
        let engine = ExecutionEngine::new(venue, 10_000.0);
        let empty = ExecutionPlan::empty("AAA", Action::Buy);
        assert!(engine.execute(&empty, "momentum", 100.0, 0.0, 0, &HashMap::new()).await.is_err());
    }

    #[tokio::test]
    async fn deterministic_fills_under_fixed_seed() {
        let clock_a = Arc::new(SimClock::new(0, 42));
        let clock_b = Arc::new(SimClock::new(0, 42));
        let engine_a = ExecutionEngine::new(Arc::new(SimulatedOrderVenue::new(clock_a, 5.0, 5.0)), 10_000.0);
        let engine_b = ExecutionEngine::new(Arc::new(SimulatedOrderVenue::new(clock_b, 5.0, 5.0)), 10_000.0);

        let trade_a = engine_a.execute(&plan(Action::Buy, 10.0), "m", 100.0, 0.0, 0, &HashMap::new()).await.unwrap();
        let trade_b = engine_b.execute(&plan(Action::Buy, 10.0), "m", 100.0, 0.0, 0, &HashMap::new()).await.unwrap();
        assert!((trade_a.execution_price - trade_b.execution_price).abs() < 1e-9);
    }

    #[tokio::test]
    async fn reduce_positions_halves_size_and_credits_cash() {
        let clock = Arc::new(SimClock::new(0, 1));
        let venue = Arc::new(SimulatedOrderVenue::new(clock, 0.0, 0.0));
        let engine = ExecutionEngine::new(venue, 10_000.0);
        engine.execute(&plan(Action::Buy, 10.0), "momentum", 100.0, 0.0, 0, &HashMap::new()).await.unwrap();

        let mut marks = HashMap::new();
        marks.insert("AAA".to_string(), 100.0);
        let trades = engine.reduce_positions(0.5, &marks, 0.001, "risk_emergency", 1);

        assert_eq!(trades.len(), 1);
        assert!((trades[0].size - 5.0).abs() < 1e-9);
        let position = engine.portfolio_snapshot().positions.get("AAA").unwrap().size;
        assert!((position - 5.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn reduce_positions_below_min_closeable_size_closes_outright() {
        let clock = Arc::new(SimClock::new(0, 1));
        let venue = Arc::new(SimulatedOrderVenue::new(clock, 0.0, 0.0));
        let engine = ExecutionEngine::new(venue, 10_000.0);
        engine.execute(&plan(Action::Buy, 10.0), "momentum", 100.0, 0.0, 0, &HashMap::new()).await.unwrap();

        let mut marks = HashMap::new();
        marks.insert("AAA".to_string(), 100.0);
        engine.reduce_positions(0.999, &marks, 1.0, "risk_emergency", 1);

        assert!(!engine.portfolio_snapshot().positions.contains_key("AAA"));
    }

    #[tokio::test]
    async fn flatten_all_closes_every_position() {
        let clock = Arc::new(SimClock::new(0, 1));
        let venue = Arc::new(SimulatedOrderVenue::new(clock, 0.0, 0.0));
        let engine = ExecutionEngine::new(venue, 10_000.0);
        engine.execute(&plan(Action::Buy, 10.0), "momentum", 100.0, 0.0, 0, &HashMap::new()).await.unwrap();

        let mut marks = HashMap::new();
        marks.insert("AAA".to_string(), 110.0);
        let trades = engine.flatten_all(&marks, "risk_emergency", 1);

        assert_eq!(trades.len(), 1);
        assert!(engine.portfolio_snapshot().positions.is_empty());
        assert!(trades[0].pnl.unwrap() > 0.0);
    }

    #[tokio::test]
    async fn restore_from_checkpoint_then_replay_reconstructs_portfolio() {
        let clock = Arc::new(SimClock::new(0, 1));
        let venue = Arc::new(SimulatedOrderVenue::new(clock, 0.0, 0.0));
        let engine = ExecutionEngine::new(venue, 10_000.0);

        let checkpoint = PortfolioCheckpoint {
            ts: 0,
            cash: 9_000.0,
            equity: 9_000.0,
            positions: std::collections::HashMap::new(),
        };
        engine.restore_from_checkpoint(&checkpoint);
        assert_eq!(engine.portfolio_snapshot().cash, 9_000.0);

        let trade = TradeRecord {
            id: "t1".to_string(),
            ts: 1,
            symbol: "AAA".to_string(),
            action: Action::Buy,
            strategy_id: "momentum".to_string(),
            signal_price: 100.0,
            execution_price: 100.0,
            size: 10.0,
            commission: 0.0,
            slippage_bps: 0.0,
            pnl: None,
            portfolio_equity_after: 9_000.0,
        };
        engine.replay_trade(&trade);

        let portfolio = engine.portfolio_snapshot();
        assert_eq!(portfolio.cash, 8_000.0);
        assert_eq!(portfolio.positions.get("AAA").unwrap().size, 10.0);
    }
}
