// =============================================================================
// Order Optimiser — turns an ensemble decision into a concrete execution
// plan: order type, child-order split, and fee-tier-aware cost estimate.
// =============================================================================
//
// Strategy selection, grounded on `order_optimizer.py`:
//   AGGRESSIVE_MARKET — single market order, used for high-confidence/urgent
//   PATIENT_MAKER     — single limit order at the passive side of the book
//   HYBRID            — market vs. limit chosen from a blended market-score
//   SIZE_AWARE        — tiered: <= 1000 notional -> HYBRID, <= 5000 -> 3-way
//                        split, > 5000 -> TWAP
// =============================================================================

use parking_lot::RwLock;

use crate::config::{FeeTier, OrderOptimizerConfig};
use crate::types::{Action, ChildOrder, EnsembleDecision, ExecutionPlan, OrderType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizationStrategy {
    AggressiveMarket,
    PatientMaker,
    Hybrid,
    SizeAware,
}

/// Maker orders rest on the book (limit); taker orders cross the spread
/// (market). Fee schedules commonly price these differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeKind {
    Maker,
    Taker,
}

/// Venue commission schedule: `flat_fee_bps` (if set) short-circuits
/// everything else; otherwise a maker/taker base fee is replaced by the
/// highest-threshold volume tier the trailing 30-day volume clears, then
/// scaled by the loyalty-token discount. Mirrors
/// `ExchangeCommissionConfig.get_effective_fee`.
#[derive(Debug, Clone)]
pub struct FeeSchedule {
    maker_fee_bps: f64,
    taker_fee_bps: f64,
    flat_fee_bps: Option<f64>,
    loyalty_discount: f64,
    volume_tiers: Vec<FeeTier>,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        FeeSchedule::from(&OrderOptimizerConfig::default())
    }
}

impl From<&OrderOptimizerConfig> for FeeSchedule {
    fn from(config: &OrderOptimizerConfig) -> Self {
        Self {
            maker_fee_bps: config.maker_fee_bps,
            taker_fee_bps: config.taker_fee_bps,
            flat_fee_bps: config.flat_fee_bps,
            loyalty_discount: config.loyalty_discount,
            volume_tiers: config.volume_tiers.clone(),
        }
    }
}

impl FeeSchedule {
    /// `effective_fee(kind, volume_30d, has_loyalty_token)` per SPEC_FULL
    /// §4.10: a flat-fee venue ignores tiers and loyalty discount entirely.
    pub fn lookup(&self, kind: FeeKind, trailing_30d_volume: f64, has_loyalty_token: bool) -> f64 {
        if let Some(flat) = self.flat_fee_bps {
            return flat;
        }

        let mut fee = match kind {
            FeeKind::Maker => self.maker_fee_bps,
            FeeKind::Taker => self.taker_fee_bps,
        };

        let best_tier = self
            .volume_tiers
            .iter()
            .filter(|tier| trailing_30d_volume >= tier.min_volume_30d)
            .max_by(|a, b| a.min_volume_30d.partial_cmp(&b.min_volume_30d).unwrap());
        if let Some(tier) = best_tier {
            fee = match kind {
                FeeKind::Maker => tier.maker_fee_bps,
                FeeKind::Taker => tier.taker_fee_bps,
            };
        }

        if has_loyalty_token {
            fee *= 1.0 - self.loyalty_discount;
        }
        fee
    }
}

struct RunningStats {
    plans_built: u64,
    commission_saved_bps: f64,
}

/// C10 — Order Optimiser.
pub struct OrderOptimizer {
    config: OrderOptimizerConfig,
    fees: FeeSchedule,
    strategy: OptimizationStrategy,
    min_order_size: f64,
    /// Whether this account holds the venue's loyalty/discount token.
    /// Defaults to `false`, mirroring the source optimizer's `has_bnb`.
    has_loyalty_token: bool,
    stats: RwLock<RunningStats>,
}

impl OrderOptimizer {
    pub fn new(config: OrderOptimizerConfig, strategy: OptimizationStrategy, min_order_size: f64) -> Self {
        let fees = FeeSchedule::from(&config);
        Self {
            config,
            fees,
            strategy,
            min_order_size,
            has_loyalty_token: false,
            stats: RwLock::new(RunningStats { plans_built: 0, commission_saved_bps: 0.0 }),
        }
    }

    pub fn plan(
        &self,
        decision: &EnsembleDecision,
        size: f64,
        trailing_30d_volume: f64,
        volatility: f64,
        liquidity_rank: f64,
    ) -> ExecutionPlan {
        if size < self.min_order_size {
            return ExecutionPlan::empty(&decision.symbol, decision.action);
        }

        let maker_fee_bps = self.fees.lookup(FeeKind::Maker, trailing_30d_volume, self.has_loyalty_token);
        let taker_fee_bps = self.fees.lookup(FeeKind::Taker, trailing_30d_volume, self.has_loyalty_token);
        let score = self.market_score(decision, size, volatility, liquidity_rank);
        let plan = match self.strategy {
            OptimizationStrategy::AggressiveMarket => self.plan_aggressive_market(decision, size, taker_fee_bps),
            OptimizationStrategy::PatientMaker => self.plan_patient_maker(decision, size, maker_fee_bps),
            OptimizationStrategy::Hybrid => self.plan_hybrid(decision, size, maker_fee_bps, taker_fee_bps, score),
            OptimizationStrategy::SizeAware => {
                self.plan_size_aware(decision, size, maker_fee_bps, taker_fee_bps, score)
            }
        };

        let mut stats = self.stats.write();
        stats.plans_built += 1;
        stats.commission_saved_bps += (taker_fee_bps - plan.estimated_commission_bps).max(0.0);

        plan
    }

    /// `0.4*confidence + 0.2*(1 - size_factor) + 0.2*(1 - liquidity_factor) +
    /// 0.2*(1 - vol_factor)`, each sub-factor clamped to `[0, 1]` so a larger
    /// order, thinner book, or higher volatility all pull the score down
    /// toward the patient side.
    fn market_score(&self, decision: &EnsembleDecision, amount: f64, volatility: f64, liquidity_rank: f64) -> f64 {
        let size_factor = (amount / 5_000.0).min(1.0);
        let liquidity_factor = (liquidity_rank / 5.0).min(1.0);
        let vol_factor = (volatility / 0.05).min(1.0);
        0.4 * decision.confidence + 0.2 * (1.0 - size_factor) + 0.2 * (1.0 - liquidity_factor) + 0.2 * (1.0 - vol_factor)
    }

    /// Passive-side limit price: a touch through the mid, favorable to the
    /// resting order (below mid on a buy, above mid on a sell).
    fn favourable_limit_price(&self, decision: &EnsembleDecision) -> f64 {
        match decision.action {
            Action::Buy => decision.entry_price * (1.0 - 0.001),
            Action::Sell => decision.entry_price * (1.0 + 0.001),
            Action::Hold => decision.entry_price,
        }
    }

    fn plan_aggressive_market(&self, decision: &EnsembleDecision, size: f64, fee_bps: f64) -> ExecutionPlan {
        ExecutionPlan {
            symbol: decision.symbol.clone(),
            side: decision.action,
            total_amount: size,
            order_type: OrderType::Market,
            orders: vec![ChildOrder { order_type: OrderType::Market, size, limit_price: None, delay_seconds: 0.0 }],
            estimated_commission_bps: fee_bps,
            estimated_slippage_bps: 8.0,
            deadline_seconds: 5.0,
        }
    }

    fn plan_patient_maker(&self, decision: &EnsembleDecision, size: f64, maker_fee_bps: f64) -> ExecutionPlan {
        ExecutionPlan {
            symbol: decision.symbol.clone(),
            side: decision.action,
            total_amount: size,
            order_type: OrderType::Limit,
            orders: vec![ChildOrder {
                order_type: OrderType::Limit,
                size,
                limit_price: Some(self.favourable_limit_price(decision)),
                delay_seconds: 0.0,
            }],
            estimated_commission_bps: maker_fee_bps,
            estimated_slippage_bps: 1.0,
            deadline_seconds: self.config.max_execution_time_secs,
        }
    }

    /// Strict `> high` -> AGGRESSIVE_MARKET, strict `< low` -> PATIENT_MAKER;
    /// in between, split 40% immediate market / 60% resting limit.
    fn plan_hybrid(
        &self,
        decision: &EnsembleDecision,
        size: f64,
        maker_fee_bps: f64,
        taker_fee_bps: f64,
        score: f64,
    ) -> ExecutionPlan {
        if score > self.config.hybrid_market_score_high {
            self.plan_aggressive_market(decision, size, taker_fee_bps)
        } else if score < self.config.hybrid_market_score_low {
            self.plan_patient_maker(decision, size, maker_fee_bps)
        } else {
            self.plan_hybrid_split(decision, size, maker_fee_bps, taker_fee_bps)
        }
    }

    /// 40% of size as an immediate market child, 60% as a resting limit
    /// child placed with no delay.
    fn plan_hybrid_split(
        &self,
        decision: &EnsembleDecision,
        size: f64,
        maker_fee_bps: f64,
        taker_fee_bps: f64,
    ) -> ExecutionPlan {
        let market_size = size * 0.4;
        let limit_size = size * 0.6;
        let orders = vec![
            ChildOrder { order_type: OrderType::Market, size: market_size, limit_price: None, delay_seconds: 20.0 },
            ChildOrder {
                order_type: OrderType::Limit,
                size: limit_size,
                limit_price: Some(self.favourable_limit_price(decision)),
                delay_seconds: 0.0,
            },
        ];
        ExecutionPlan {
            symbol: decision.symbol.clone(),
            side: decision.action,
            total_amount: size,
            order_type: OrderType::Limit,
            orders,
            estimated_commission_bps: 0.4 * taker_fee_bps + 0.6 * maker_fee_bps,
            estimated_slippage_bps: 5.0,
            deadline_seconds: self.config.max_execution_time_secs,
        }
    }

    fn plan_size_aware(
        &self,
        decision: &EnsembleDecision,
        size: f64,
        maker_fee_bps: f64,
        taker_fee_bps: f64,
        score: f64,
    ) -> ExecutionPlan {
        if size <= 1_000.0 {
            self.plan_hybrid(decision, size, maker_fee_bps, taker_fee_bps, score)
        } else if size <= 5_000.0 {
            self.plan_size_aware_split(decision, size, maker_fee_bps, taker_fee_bps)
        } else {
            self.plan_twap(decision, size, maker_fee_bps)
        }
    }

    /// One limit child placed immediately plus two equal market children
    /// staggered 30s/60s out, each a third of the total size.
    fn plan_size_aware_split(
        &self,
        decision: &EnsembleDecision,
        size: f64,
        maker_fee_bps: f64,
        taker_fee_bps: f64,
    ) -> ExecutionPlan {
        let child_size = size / 3.0;
        let orders = vec![
            ChildOrder {
                order_type: OrderType::Limit,
                size: child_size,
                limit_price: Some(self.favourable_limit_price(decision)),
                delay_seconds: 0.0,
            },
            ChildOrder { order_type: OrderType::Market, size: child_size, limit_price: None, delay_seconds: 30.0 },
            ChildOrder { order_type: OrderType::Market, size: child_size, limit_price: None, delay_seconds: 60.0 },
        ];
        ExecutionPlan {
            symbol: decision.symbol.clone(),
            side: decision.action,
            total_amount: size,
            order_type: OrderType::Limit,
            orders,
            estimated_commission_bps: (maker_fee_bps + 2.0 * taker_fee_bps) / 3.0,
            estimated_slippage_bps: 3.0,
            deadline_seconds: self.config.max_execution_time_secs,
        }
    }

    /// Equal limit children spread across `max_execution_time_secs`, sliced
    /// `N = max(5, floor(amount / 2000))` ways.
    fn plan_twap(&self, decision: &EnsembleDecision, size: f64, maker_fee_bps: f64) -> ExecutionPlan {
        let slices = ((size / 2_000.0).floor() as usize).max(5);
        let child_size = size / slices as f64;
        let interval = self.config.max_execution_time_secs / slices as f64;
        let orders = (0..slices)
            .map(|i| ChildOrder {
                order_type: OrderType::Limit,
                size: child_size,
                limit_price: Some(self.favourable_limit_price(decision)),
                delay_seconds: i as f64 * interval,
            })
            .collect();
        ExecutionPlan {
            symbol: decision.symbol.clone(),
            side: decision.action,
            total_amount: size,
            order_type: OrderType::Twap,
            orders,
            estimated_commission_bps: maker_fee_bps,
            estimated_slippage_bps: 4.0,
            deadline_seconds: self.config.max_execution_time_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use crate::types::VotingMethod;

    fn decision(confidence: f64) -> EnsembleDecision {
        EnsembleDecision {
            symbol: "AAA".to_string(),
            action: Action::Buy,
            confidence,
            entry_price: 100.0,
            stop_loss: None,
            take_profit: None,
            voting_method: VotingMethod::WeightedAverage,
            contributing_signals: Vec::new(),
            weights_snapshot: HashMap::new(),
        }
    }

    #[test]
    fn below_min_order_size_yields_empty_plan() {
        let optimizer = OrderOptimizer::new(OrderOptimizerConfig::default(), OptimizationStrategy::Hybrid, 10.0);
        let plan = optimizer.plan(&decision(0.9), 1.0, 0.0, 0.0, 0.0);
        assert!(plan.is_empty());
    }

    #[test]
    fn size_aware_splits_mid_tier_into_three_children() {
        let optimizer = OrderOptimizer::new(OrderOptimizerConfig::default(), OptimizationStrategy::SizeAware, 1.0);
        let plan = optimizer.plan(&decision(0.9), 3_000.0, 0.0, 0.0, 0.0);
        assert_eq!(plan.orders.len(), 3);
    }

    #[test]
    fn size_aware_large_order_becomes_twap() {
        let optimizer = OrderOptimizer::new(OrderOptimizerConfig::default(), OptimizationStrategy::SizeAware, 1.0);
        let plan = optimizer.plan(&decision(0.9), 10_000.0, 0.0, 0.0, 0.0);
        assert_eq!(plan.order_type, OrderType::Twap);
        assert_eq!(plan.orders.len(), 5);
    }

    #[test]
    fn twap_slice_count_scales_with_order_size() {
        let optimizer = OrderOptimizer::new(OrderOptimizerConfig::default(), OptimizationStrategy::SizeAware, 1.0);
        let plan = optimizer.plan(&decision(0.9), 20_000.0, 0.0, 0.0, 0.0);
        assert_eq!(plan.orders.len(), 10);
        assert!(plan.orders.iter().all(|o| o.order_type == OrderType::Limit));
    }

    #[test]
    fn fee_schedule_drops_with_volume() {
        let fees = FeeSchedule::default();
        assert!(fees.lookup(FeeKind::Taker, 2_000_000.0, false) < fees.lookup(FeeKind::Taker, 0.0, false));
    }

    #[test]
    fn maker_fee_is_cheaper_than_taker_at_same_tier() {
        let fees = FeeSchedule::default();
        assert!(fees.lookup(FeeKind::Maker, 10_000.0, false) < fees.lookup(FeeKind::Taker, 10_000.0, false));
    }

    #[test]
    fn flat_fee_venue_ignores_tiers_and_loyalty_discount() {
        let config = OrderOptimizerConfig { flat_fee_bps: Some(7.5), loyalty_discount: 0.5, ..Default::default() };
        let fees = FeeSchedule::from(&config);
        assert_eq!(fees.lookup(FeeKind::Taker, 2_000_000.0, true), 7.5);
    }

    #[test]
    fn loyalty_token_discounts_the_looked_up_fee() {
        let config = OrderOptimizerConfig { loyalty_discount: 0.25, ..Default::default() };
        let fees = FeeSchedule::from(&config);
        let full = fees.lookup(FeeKind::Taker, 0.0, false);
        let discounted = fees.lookup(FeeKind::Taker, 0.0, true);
        assert!((discounted - full * 0.75).abs() < 1e-9);
    }

    #[test]
    fn hybrid_picks_aggressive_market_for_high_score() {
        let optimizer = OrderOptimizer::new(OrderOptimizerConfig::default(), OptimizationStrategy::Hybrid, 1.0);
        let plan = optimizer.plan(&decision(0.9), 100.0, 0.0, 0.0, 0.0);
        assert_eq!(plan.order_type, OrderType::Market);
    }

    #[test]
    fn hybrid_picks_patient_maker_for_low_score() {
        let optimizer = OrderOptimizer::new(OrderOptimizerConfig::default(), OptimizationStrategy::Hybrid, 1.0);
        let plan = optimizer.plan(&decision(0.1), 4_000.0, 0.0, 0.05, 5.0);
        assert_eq!(plan.order_type, OrderType::Limit);
        assert_eq!(plan.orders.len(), 1);
    }

    #[test]
    fn hybrid_mid_score_splits_forty_sixty() {
        let optimizer = OrderOptimizer::new(OrderOptimizerConfig::default(), OptimizationStrategy::Hybrid, 1.0);
        let plan = optimizer.plan(&decision(0.5), 1_000.0, 0.0, 0.025, 2.5);
        assert_eq!(plan.orders.len(), 2);
        let market_child = plan.orders.iter().find(|o| o.order_type == OrderType::Market).unwrap();
        assert!((market_child.size - 400.0).abs() < 1e-9);
    }

    #[test]
    fn patient_maker_places_limit_price_below_mid_on_a_buy() {
        let optimizer = OrderOptimizer::new(OrderOptimizerConfig::default(), OptimizationStrategy::PatientMaker, 1.0);
        let plan = optimizer.plan(&decision(0.9), 100.0, 0.0, 0.0, 0.0);
        let limit_price = plan.orders[0].limit_price.unwrap();
        assert!(limit_price < 100.0);
        assert!((limit_price - 99.9).abs() < 1e-6);
    }
}
