// =============================================================================
// Shared types used across the ensemble trading engine
// =============================================================================

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Trade direction a strategy or the ensemble can express.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
            Self::Hold => write!(f, "HOLD"),
        }
    }
}

/// Which side of a liquidation event was forcibly closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquidationSide {
    Long,
    Short,
}

/// A time-indexed OHLCV record for one `(venue, symbol, interval)`, plus the
/// derived features C2/C3 attach. Immutable once constructed; strategies only
/// ever see a finished frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketFrame {
    pub venue: String,
    pub symbol: String,
    pub interval: String,
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub bid_size: Option<f64>,
    pub ask_size: Option<f64>,
    /// Realised volatility attached by C3; `None` until normalised.
    #[serde(default)]
    pub volatility: Option<f64>,
    /// Bid/ask spread in basis points; `None` until normalised.
    #[serde(default)]
    pub spread_bps: Option<f64>,
    /// Z-scored features keyed by name, clipped to `[-3, 3]`, attached by C3.
    #[serde(default)]
    pub z_features: HashMap<String, f64>,
}

impl MarketFrame {
    pub fn mid_price(&self) -> f64 {
        match (self.bid, self.ask) {
            (Some(b), Some(a)) => (b + a) / 2.0,
            _ => self.close,
        }
    }
}

/// One strategy's opinion for a symbol within a single tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub strategy_id: String,
    pub symbol: String,
    pub action: Action,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    pub entry_price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// How C8 combined contributing signals into a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VotingMethod {
    WeightedAverage,
    Majority,
    Blend,
}

/// The ensemble's single output per tick for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleDecision {
    pub symbol: String,
    pub action: Action,
    pub confidence: f64,
    pub entry_price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub voting_method: VotingMethod,
    pub contributing_signals: Vec<Signal>,
    pub weights_snapshot: HashMap<String, f64>,
}

/// Rolling performance record for one strategy, updated on every fill.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyPerformance {
    pub strategy_id: String,
    /// Realised returns, most recent last, capped at `performance_window`.
    pub returns: Vec<f64>,
    pub trade_count: u64,
    pub win_count: u64,
}

impl StrategyPerformance {
    pub fn win_rate(&self) -> f64 {
        if self.trade_count == 0 {
            0.0
        } else {
            self.win_count as f64 / self.trade_count as f64
        }
    }

    /// Sharpe-like score: mean return / stdev, with a small epsilon floor to
    /// avoid division by zero on a near-constant return series.
    pub fn sharpe(&self) -> f64 {
        let n = self.returns.len();
        if n < 2 {
            return 0.0;
        }
        let mean = self.returns.iter().sum::<f64>() / n as f64;
        let var = self.returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n as f64;
        let stdev = var.sqrt();
        if stdev < 1e-12 {
            0.0
        } else {
            mean / stdev
        }
    }
}

/// `strategy_id -> weight`. Invariant: weights sum to 1 and each lies in
/// `[min_weight, 1]`.
pub type AllocationWeights = HashMap<String, f64>;

/// One open position in the portfolio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub size: f64,
    pub avg_entry_price: f64,
    pub opened_at: i64,
    pub strategy_id: String,
}

/// Cash + open positions. Mutated only by the execution engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub cash: f64,
    pub positions: HashMap<String, Position>,
}

impl Portfolio {
    pub fn new(starting_cash: f64) -> Self {
        Self {
            cash: starting_cash,
            positions: HashMap::new(),
        }
    }

    /// `equity = cash + sum(position.size * mark_price)`.
    pub fn equity(&self, mark_prices: &HashMap<String, f64>) -> f64 {
        let positions_value: f64 = self
            .positions
            .values()
            .map(|p| p.size * mark_prices.get(&p.symbol).copied().unwrap_or(p.avg_entry_price))
            .sum();
        self.cash + positions_value
    }
}

/// Circuit-breaker severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitLevel {
    Green,
    Yellow1,
    Yellow2,
    Red,
}

impl std::fmt::Display for CircuitLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Green => write!(f, "GREEN"),
            Self::Yellow1 => write!(f, "YELLOW_1"),
            Self::Yellow2 => write!(f, "YELLOW_2"),
            Self::Red => write!(f, "RED"),
        }
    }
}

/// One historical circuit-breaker transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerTrigger {
    pub ts: i64,
    pub level: CircuitLevel,
    pub daily_drawdown: f64,
}

/// Current circuit-breaker state machine snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub level: CircuitLevel,
    pub triggered_at: Option<i64>,
    pub cooldown_until: Option<i64>,
    #[serde(default)]
    pub history: Vec<CircuitBreakerTrigger>,
}

impl Default for CircuitBreakerState {
    fn default() -> Self {
        Self {
            level: CircuitLevel::Green,
            triggered_at: None,
            cooldown_until: None,
            history: Vec::new(),
        }
    }
}

/// A forced liquidation observed on a venue, fed to C5.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationEvent {
    pub timestamp: i64,
    pub symbol: String,
    pub size: f64,
    pub price: f64,
    pub side: LiquidationSide,
}

/// Action C13 takes when C5 reports a triggered cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CascadeAction {
    Halt,
    Reduce50,
    Flatten,
}

/// An order type an `ExecutionPlan` may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    Iceberg,
    Twap,
    Vwap,
}

/// One child order within an `ExecutionPlan`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildOrder {
    pub order_type: OrderType,
    pub size: f64,
    pub limit_price: Option<f64>,
    /// Seconds after plan creation this child should be submitted.
    pub delay_seconds: f64,
}

/// Concrete execution plan produced by C10 for one `EnsembleDecision`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub symbol: String,
    pub side: Action,
    pub total_amount: f64,
    pub order_type: OrderType,
    pub orders: Vec<ChildOrder>,
    pub estimated_commission_bps: f64,
    pub estimated_slippage_bps: f64,
    pub deadline_seconds: f64,
}

impl ExecutionPlan {
    /// An empty plan signals "decision skipped" (below venue minimum size).
    pub fn empty(symbol: impl Into<String>, side: Action) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            total_amount: 0.0,
            order_type: OrderType::Market,
            orders: Vec::new(),
            estimated_commission_bps: 0.0,
            estimated_slippage_bps: 0.0,
            deadline_seconds: 0.0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

/// Fill outcome reported back by an `OrderVenue` for one child order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillStatus {
    Filled,
    Partial,
    Cancelled,
    Rejected,
}

/// Result of submitting a single child order to a venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillReport {
    pub order_id: String,
    pub filled_size: f64,
    pub avg_price: f64,
    pub commission: f64,
    pub status: FillStatus,
}

impl FillReport {
    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }
}

/// Immutable row appended by C11 and persisted by C12.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: String,
    pub ts: i64,
    pub symbol: String,
    pub action: Action,
    pub strategy_id: String,
    pub signal_price: f64,
    pub execution_price: f64,
    pub size: f64,
    pub commission: f64,
    pub slippage_bps: f64,
    pub pnl: Option<f64>,
    pub portfolio_equity_after: f64,
}

impl TradeRecord {
    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }
}

/// Durable snapshot of the portfolio, written periodically by C12.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioCheckpoint {
    pub ts: i64,
    pub cash: f64,
    pub equity: f64,
    pub positions: HashMap<String, Position>,
}

/// Control-plane command accepted by `PipelineRunner::command`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Command {
    Pause,
    Resume,
    Flatten,
    /// Reduce every open position by this fraction, e.g. `0.5` = 50%.
    Reduce(f64),
    Halt,
}

/// Health-endpoint payload for `PipelineRunner::status()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub iteration: u64,
    pub last_tick_ts: i64,
    pub portfolio_equity: f64,
    pub cb_state: CircuitLevel,
    pub open_positions_count: usize,
    pub degraded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn portfolio_equity_uses_mark_price() {
        let mut p = Portfolio::new(1_000.0);
        p.positions.insert(
            "AAA".to_string(),
            Position {
                symbol: "AAA".to_string(),
                size: 10.0,
                avg_entry_price: 100.0,
                opened_at: 0,
                strategy_id: "momentum".to_string(),
            },
        );
        let mut marks = HashMap::new();
        marks.insert("AAA".to_string(), 110.0);
        assert!((p.equity(&marks) - 2_100.0).abs() < 1e-9);
    }

    #[test]
    fn portfolio_equity_falls_back_to_entry_price_without_mark() {
        let mut p = Portfolio::new(0.0);
        p.positions.insert(
            "AAA".to_string(),
            Position {
                symbol: "AAA".to_string(),
                size: 5.0,
                avg_entry_price: 20.0,
                opened_at: 0,
                strategy_id: "s".to_string(),
            },
        );
        assert!((p.equity(&HashMap::new()) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn empty_execution_plan_has_no_orders() {
        let plan = ExecutionPlan::empty("AAA", Action::Buy);
        assert!(plan.is_empty());
    }

    #[test]
    fn strategy_performance_sharpe_zero_on_short_history() {
        let perf = StrategyPerformance::default();
        assert_eq!(perf.sharpe(), 0.0);
    }
}
