// =============================================================================
// Pipeline Orchestrator — ties every component into one trading tick and
// owns the control-plane surface (`status`, `command`, graceful shutdown).
// =============================================================================
//
// One tick, in order:
//   1. C1  fetch market data for configured symbols
//   2. C2  validate frames, dropping malformed/stale ones
//   3. C3  attach normalised features
//   4. C4  fan out to strategies for signals
//   5. C7  record returns, compute correlation penalty
//   6. C5  evaluate liquidation cascade risk per symbol
//   7. C8  ensemble-vote signals into decisions
//   8. C6  rebalance allocation weights (on its own interval)
//   9. C9  size the decision via Kelly + correlation + circuit breaker
//  10. C10 build an execution plan
//  11. C11 submit the plan, update the portfolio
//  12. C12 checkpoint/persist on its own interval
//
// If the wall-clock tick exceeds 80% of `tick_interval_secs`, a warning is
// logged (not a failure).
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, instrument, warn};

use crate::allocator::AdaptiveAllocator;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::correlation::CorrelationManager;
use crate::ensemble::EnsembleVoter;
use crate::error::{EngineError, EngineResult};
use crate::execution::{ExecutionEngine, OrderOptimizer};
use crate::liquidation::LiquidationDetector;
use crate::market_data::MarketFeed;
use crate::normalizer::FeatureNormalizer;
use crate::risk::RiskManager;
use crate::state_store::{recover, StateStore};
use crate::strategy::StrategyRegistry;
use crate::types::{
    CascadeAction, Command, PipelineStatus, PortfolioCheckpoint, StrategyPerformance, TradeRecord,
};
use crate::validator::DataValidator;

/// Mid-tier placeholder used wherever a real order-book depth rank isn't
/// wired up yet: 0 is the deepest book, 5 the thinnest, per
/// `OrderOptimizer::market_score`.
const DEFAULT_LIQUIDITY_RANK: f64 = 3.0;

pub struct PipelineRunner {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    market_feed: MarketFeed,
    validator: RwLock<DataValidator>,
    normalizer: RwLock<FeatureNormalizer>,
    strategies: StrategyRegistry,
    correlation: RwLock<CorrelationManager>,
    liquidation: RwLock<HashMap<String, LiquidationDetector>>,
    ensemble: RwLock<EnsembleVoter>,
    allocator: RwLock<AdaptiveAllocator>,
    risk: RiskManager,
    order_optimizer: OrderOptimizer,
    execution: ExecutionEngine,
    state_store: Arc<dyn StateStore>,
    performances: RwLock<HashMap<String, StrategyPerformance>>,
    symbols: Vec<String>,
    /// Latest tick's mid prices, kept so `status()`/`checkpoint()` can mark
    /// positions between ticks instead of falling back to entry price.
    last_mark_prices: RwLock<HashMap<String, f64>>,

    iteration: AtomicU64,
    last_tick_ts: AtomicU64,
    paused: AtomicBool,
    halted: AtomicBool,
    degraded: AtomicBool,
}

impl PipelineRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        market_feed: MarketFeed,
        strategies: StrategyRegistry,
        order_optimizer: OrderOptimizer,
        execution: ExecutionEngine,
        state_store: Arc<dyn StateStore>,
        symbols: Vec<String>,
    ) -> Self {
        let validator = DataValidator::new(config.validator.clone());
        let normalizer = FeatureNormalizer::new(config.normaliser.clone());
        let correlation = CorrelationManager::new(config.correlation.clone());
        let ensemble = EnsembleVoter::new(config.ensemble.clone());
        let allocator = AdaptiveAllocator::new(config.allocator.clone());
        let risk = RiskManager::new(config.risk.clone(), config.orchestrator.starting_cash);

        Self {
            config,
            clock,
            market_feed,
            validator: RwLock::new(validator),
            normalizer: RwLock::new(normalizer),
            strategies,
            correlation: RwLock::new(correlation),
            liquidation: RwLock::new(HashMap::new()),
            ensemble: RwLock::new(ensemble),
            allocator: RwLock::new(allocator),
            risk,
            order_optimizer,
            execution,
            state_store,
            performances: RwLock::new(HashMap::new()),
            symbols,
            last_mark_prices: RwLock::new(HashMap::new()),
            iteration: AtomicU64::new(0),
            last_tick_ts: AtomicU64::new(0),
            paused: AtomicBool::new(false),
            halted: AtomicBool::new(false),
            degraded: AtomicBool::new(false),
        }
    }

    /// Replay trades since the latest checkpoint to reconstruct the
    /// portfolio before the first tick. A corrupt log entry past the
    /// checkpoint puts the runner in DEGRADED mode rather than guessing.
    pub async fn recover(&self) -> EngineResult<()> {
        match recover(self.state_store.as_ref()).await {
            Ok(state) => {
                if let Some(checkpoint) = &state.checkpoint {
                    self.execution.restore_from_checkpoint(checkpoint);
                }
                for trade in &state.replay_trades {
                    self.execution.replay_trade(trade);
                }
                info!(
                    had_checkpoint = state.checkpoint.is_some(),
                    replayed = state.replay_trades.len(),
                    "recovery complete"
                );
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "recovery failed, entering degraded mode");
                self.degraded.store(true, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    pub fn portfolio_snapshot(&self) -> crate::types::Portfolio {
        self.execution.portfolio_snapshot()
    }

    /// Run the tick loop until `shutdown` resolves.
    pub async fn run(&self, mut shutdown: tokio::sync::oneshot::Receiver<()>) -> EngineResult<()> {
        let tick_interval = std::time::Duration::from_secs_f64(self.config.orchestrator.tick_interval_secs);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown signal received, stopping pipeline");
                    return Ok(());
                }
                _ = self.clock.sleep(tick_interval) => {
                    if self.halted.load(Ordering::SeqCst) {
                        return Ok(());
                    }
                    if !self.paused.load(Ordering::SeqCst) {
                        self.tick().await;
                    }
                }
            }
        }
    }

    #[instrument(skip(self))]
    async fn tick(&self) {
        let tick_start = self.clock.now();
        self.iteration.fetch_add(1, Ordering::SeqCst);
        self.last_tick_ts.store(tick_start.max(0) as u64, Ordering::SeqCst);

        let raw_frames = self.market_feed.fetch(&self.symbols).await;
        let tick_interval = self.config.orchestrator.tick_interval_secs as i64;
        let validated = self.validator.write().validate(tick_start, tick_interval, raw_frames);
        if validated.is_empty() {
            warn!("no surviving frames this tick, skipping");
            return;
        }
        let frames = self.normalizer.write().normalize(validated);
        let mark_prices: HashMap<String, f64> = frames.iter().map(|(s, f)| (s.clone(), f.mid_price())).collect();
        *self.last_mark_prices.write() = mark_prices.clone();

        let raw_signals = self.strategies.generate_all(&frames).await;

        // Pre-vote correlation adjustment (SPEC_FULL §4.7, §4.13 step 6):
        // a signal from a strategy highly correlated with one already
        // holding a position has its confidence discounted before C8 votes.
        let held_strategies: Vec<String> = self
            .execution
            .portfolio_snapshot()
            .positions
            .values()
            .map(|p| p.strategy_id.clone())
            .collect();
        let signals = self.correlation.read().adjust(&raw_signals, &held_strategies);

        let mut cascaded_symbols = std::collections::HashSet::new();
        for symbol in frames.keys() {
            let cascade = {
                let mut liquidation = self.liquidation.write();
                let detector = liquidation
                    .entry(symbol.clone())
                    .or_insert_with(|| LiquidationDetector::new(self.config.liquidation.clone()));
                detector.evaluate(tick_start)
            };
            if cascade.triggered {
                warn!(symbol = %symbol, score = cascade.score, "liquidation cascade detected");
                cascaded_symbols.insert(symbol.clone());
                self.handle_cascade(symbol, &mark_prices, tick_start).await;
                if self.halted.load(Ordering::SeqCst) {
                    return;
                }
            }
        }

        let weights = {
            let performances = self.performances.read();
            self.allocator.write().rebalance(&performances, self.clock.as_ref(), tick_start)
        };
        self.ensemble.write().set_weights(weights);

        for symbol in frames.keys() {
            if cascaded_symbols.contains(symbol) {
                continue;
            }
            let decision = self.ensemble.write().vote(symbol, &signals);
            let Some(decision) = decision else { continue };

            let equity = self.execution.portfolio_snapshot().equity(&mark_prices);
            self.risk.update_equity(equity, tick_start);

            let win_probability = decision.confidence;
            let correlation = self.correlation.read();
            let size = self.risk.correlation_aware_size(
                win_probability,
                1.5,
                &held_strategies,
                &correlation,
            );
            drop(correlation);

            if size <= 0.0 {
                continue;
            }

            let volatility = frames.get(symbol).map(|f| f.volatility).unwrap_or(0.0);
            // No upstream order-book depth feature feeds a real liquidity
            // rank yet; fall back to this engine's mid-tier default.
            let liquidity_rank = DEFAULT_LIQUIDITY_RANK;
            let plan = self.order_optimizer.plan(&decision, size, 0.0, volatility, liquidity_rank);
            if plan.is_empty() {
                continue;
            }

            let mark_price = frames.get(symbol).map(|f| f.mid_price()).unwrap_or(decision.entry_price);
            match self.execution.execute(&plan, "ensemble", mark_price, volatility, tick_start, &mark_prices).await {
                Ok(trade) => {
                    if let Err(e) = self.state_store.save_trade(&trade).await {
                        warn!(error = %e, "failed to persist trade");
                    }
                    self.record_performance(&trade.strategy_id, trade.pnl);
                }
                Err(e) => warn!(symbol = %symbol, error = %e, "execution failed"),
            }
        }

        if tick_start % self.config.state_store.checkpoint_interval_secs.max(1) == 0 {
            self.checkpoint(tick_start).await;
        }

        let elapsed = self.clock.now() - tick_start;
        let budget = (self.config.orchestrator.tick_interval_secs * 0.8) as i64;
        if elapsed > budget {
            warn!(elapsed_secs = elapsed, budget_secs = budget, "tick exceeded wall-clock budget");
        }
    }

    /// Executes this engine's configured emergency response to a detected
    /// liquidation cascade for one symbol: `HALT` stops the tick loop,
    /// `REDUCE_50` halves every open position, `FLATTEN` closes everything.
    async fn handle_cascade(&self, symbol: &str, mark_prices: &HashMap<String, f64>, now: i64) {
        match self.config.liquidation.cascade_action {
            CascadeAction::Halt => {
                warn!(symbol = %symbol, "cascade action HALT: pipeline stopping");
                self.halted.store(true, Ordering::SeqCst);
            }
            CascadeAction::Reduce50 => {
                let factor = self.risk.emergency_reduce_factor();
                let trades = self.execution.reduce_positions(
                    factor,
                    mark_prices,
                    self.config.risk.min_closeable_size,
                    "liquidation_cascade",
                    now,
                );
                self.persist_trades(trades).await;
            }
            CascadeAction::Flatten => {
                let trades = self.execution.flatten_all(mark_prices, "liquidation_cascade", now);
                self.persist_trades(trades).await;
            }
        }
    }

    async fn persist_trades(&self, trades: Vec<TradeRecord>) {
        for trade in trades {
            if let Err(e) = self.state_store.save_trade(&trade).await {
                warn!(error = %e, "failed to persist emergency-action trade");
            }
            self.record_performance(&trade.strategy_id, trade.pnl);
        }
    }

    fn record_performance(&self, strategy_id: &str, pnl: Option<f64>) {
        let mut performances = self.performances.write();
        let perf = performances.entry(strategy_id.to_string()).or_insert_with(|| StrategyPerformance {
            strategy_id: strategy_id.to_string(),
            returns: Vec::new(),
            trade_count: 0,
            win_count: 0,
        });
        perf.trade_count += 1;
        if let Some(pnl) = pnl {
            perf.returns.push(pnl);
            if pnl > 0.0 {
                perf.win_count += 1;
            }
            if perf.returns.len() > self.config.ensemble.performance_window {
                perf.returns.remove(0);
            }
            self.correlation.write().record_return(strategy_id, pnl);
        }
    }

    async fn checkpoint(&self, now: i64) {
        let portfolio = self.execution.portfolio_snapshot();
        let mark_prices = self.last_mark_prices.read().clone();
        let checkpoint = PortfolioCheckpoint {
            ts: now,
            cash: portfolio.cash,
            equity: portfolio.equity(&mark_prices),
            positions: portfolio.positions,
        };
        if let Err(e) = self.state_store.save_checkpoint(&checkpoint).await {
            warn!(error = %e, "failed to persist checkpoint");
        }
        if let Err(e) = self.state_store.prune(self.config.state_store.retention_days, now).await {
            warn!(error = %e, "failed to prune state store");
        }
    }

    pub fn status(&self) -> PipelineStatus {
        let portfolio = self.execution.portfolio_snapshot();
        let mark_prices = self.last_mark_prices.read().clone();
        PipelineStatus {
            iteration: self.iteration.load(Ordering::SeqCst),
            last_tick_ts: self.last_tick_ts.load(Ordering::SeqCst) as i64,
            portfolio_equity: portfolio.equity(&mark_prices),
            cb_state: self.risk.current_level(),
            open_positions_count: portfolio.positions.len(),
            degraded: self.degraded.load(Ordering::SeqCst),
        }
    }

    pub async fn command(&self, command: Command) -> EngineResult<()> {
        match command {
            Command::Pause => {
                self.paused.store(true, Ordering::SeqCst);
                Ok(())
            }
            Command::Resume => {
                self.paused.store(false, Ordering::SeqCst);
                Ok(())
            }
            Command::Halt => {
                self.halted.store(true, Ordering::SeqCst);
                Ok(())
            }
            Command::Flatten => {
                let mark_prices = self.last_mark_prices.read().clone();
                let trades = self.execution.flatten_all(&mark_prices, "manual_flatten", self.clock.now());
                self.persist_trades(trades).await;
                Ok(())
            }
            Command::Reduce(pct) => {
                if !(0.0..=1.0).contains(&pct) {
                    return Err(EngineError::validation("command", "reduce fraction must be in [0, 1]"));
                }
                let mark_prices = self.last_mark_prices.read().clone();
                let trades = self.execution.reduce_positions(
                    pct,
                    &mark_prices,
                    self.config.risk.min_closeable_size,
                    "manual_reduce",
                    self.clock.now(),
                );
                self.persist_trades(trades).await;
                Ok(())
            }
        }
    }
}

/// End-to-end scenarios chaining the real component APIs together, one per
/// pipeline behaviour this engine is expected to handle end to end. No
/// `tests/` directory: this crate is binary-only, so integration-style
/// coverage lives alongside the unit tests in each module.
#[cfg(test)]
mod integration_tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use crate::clock::{Clock, SimClock};
    use crate::config::{OrderOptimizerConfig, RiskConfig};
    use crate::correlation::CorrelationManager;
    use crate::ensemble::EnsembleVoter;
    use crate::execution::optimizer::OptimizationStrategy;
    use crate::execution::{ExecutionEngine, OrderOptimizer, SimulatedOrderVenue};
    use crate::liquidation::LiquidationDetector;
    use crate::risk::RiskManager;
    use crate::state_store::{recover, KvStateStore, StateStore};
    use crate::types::{Action, Command, LiquidationEvent, LiquidationSide, PortfolioCheckpoint, Signal, TradeRecord};

    fn signal(strategy: &str, action: Action, confidence: f64, price: f64) -> Signal {
        Signal {
            strategy_id: strategy.to_string(),
            symbol: "AAA".to_string(),
            action,
            confidence,
            entry_price: price,
            stop_loss: None,
            take_profit: None,
            metadata: HashMap::new(),
        }
    }

    fn tempdir() -> std::path::PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("ensemble-engine-orchestrator-test-{}", uuid::Uuid::new_v4()));
        dir
    }

    /// Scenario 1: two strategies agree BUY with equal weights; the ensemble
    /// decision sizes through risk management into a single executed trade
    /// that debits cash and opens a position.
    #[tokio::test]
    async fn happy_path_buy_opens_a_position() {
        let mut ensemble = EnsembleVoter::new(crate::config::EnsembleConfig {
            min_agreeing_strategies: 2,
            ..Default::default()
        });
        let signals = vec![
            signal("trend", Action::Buy, 0.8, 100.0),
            signal("momentum", Action::Buy, 0.7, 100.0),
        ];
        let decision = ensemble.vote("AAA", &signals).unwrap();
        assert_eq!(decision.action, Action::Buy);
        assert!(decision.confidence > 0.5);

        let risk = RiskManager::new(RiskConfig::default(), 10_000.0);
        risk.update_equity(10_000.0, 0);
        let correlation = CorrelationManager::new(Default::default());
        let size = risk.correlation_aware_size(decision.confidence, 1.5, &["trend".to_string()], &correlation);
        assert!(size > 0.0);

        let optimizer = OrderOptimizer::new(OrderOptimizerConfig::default(), OptimizationStrategy::AggressiveMarket, 0.01);
        let plan = optimizer.plan(&decision, size, 0.0, 0.0, 3.0);
        assert!(!plan.is_empty());

        let clock = Arc::new(SimClock::new(0, 1));
        let venue = Arc::new(SimulatedOrderVenue::new(clock, 5.0, 5.0));
        let execution = ExecutionEngine::new(venue, 10_000.0);
        let trade = execution.execute(&plan, "ensemble", 100.0, 0.0, 0, &HashMap::new()).await.unwrap();

        assert_eq!(trade.action, Action::Buy);
        assert!(execution.portfolio_snapshot().cash < 10_000.0);
        assert!(execution.portfolio_snapshot().positions.contains_key("AAA"));
    }

    /// Scenario 2: high correlation between two strategies shrinks the
    /// confidence-aware size relative to the uncorrelated baseline, but never
    /// below the 0.5 floor.
    #[test]
    fn correlation_penalty_shrinks_size_but_respects_floor() {
        let risk = RiskManager::new(RiskConfig::default(), 10_000.0);
        risk.update_equity(10_000.0, 0);

        let uncorrelated = CorrelationManager::new(Default::default());
        let baseline_size =
            risk.correlation_aware_size(0.75, 1.5, &["trend".to_string(), "momentum".to_string()], &uncorrelated);

        let mut correlated = CorrelationManager::new(Default::default());
        for i in 0..20 {
            correlated.record_return("trend", i as f64 * 0.01);
            correlated.record_return("momentum", i as f64 * 0.01);
        }
        let penalised_size =
            risk.correlation_aware_size(0.75, 1.5, &["trend".to_string(), "momentum".to_string()], &correlated);

        assert!(penalised_size < baseline_size);
        assert!(penalised_size >= baseline_size * 0.5 - 1e-9);
    }

    /// Scenario 3: a 16% drawdown trips the circuit breaker to RED, refuses
    /// new entries, and keeps refusing through the cooldown window even once
    /// equity recovers.
    #[test]
    fn circuit_breaker_red_refuses_entries_through_cooldown() {
        let risk = RiskManager::new(RiskConfig::default(), 10_000.0);
        let level = risk.update_equity(8_400.0, 0);
        assert_eq!(level, crate::types::CircuitLevel::Red);
        assert!(risk.authorize_entry(1.0).is_err());

        let recovered_level = risk.update_equity(10_000.0, 60);
        assert_eq!(recovered_level, crate::types::CircuitLevel::Red, "cooldown has not elapsed yet");
        assert!(risk.authorize_entry(1.0).is_err());
    }

    /// Scenario 4: a dense, heavily one-sided burst of liquidations crosses
    /// the cascade threshold; the emergency reduce factor halves sizing.
    #[test]
    fn liquidation_cascade_triggers_and_halves_sizing() {
        let mut detector = LiquidationDetector::new(crate::config::LiquidationConfig::default());
        for i in 0..12 {
            detector.record(LiquidationEvent {
                timestamp: i * 4,
                symbol: "AAA".to_string(),
                size: 100.0,
                price: 100.0 - i as f64 * 0.5,
                side: LiquidationSide::Long,
            });
        }
        let score = detector.evaluate(44);
        assert!(score.triggered, "expected cascade score {} to cross threshold", score.score);

        let risk = RiskManager::new(RiskConfig::default(), 10_000.0);
        assert_eq!(risk.emergency_reduce_factor(), 0.5);
    }

    /// Scenario 5: after a checkpoint and two fills, a simulated crash
    /// recovers the checkpoint plus both trades and the reconstructed
    /// equity reflects their PnL.
    #[tokio::test]
    async fn crash_recovery_replays_checkpoint_and_trades() {
        let dir = tempdir();
        let store = KvStateStore::new(&dir).unwrap();

        store
            .save_checkpoint(&PortfolioCheckpoint { ts: 100, cash: 10_500.0, equity: 10_500.0, positions: HashMap::new() })
            .await
            .unwrap();
        store
            .save_trade(&TradeRecord {
                id: TradeRecord::new_id(),
                ts: 101,
                symbol: "AAA".to_string(),
                action: Action::Sell,
                strategy_id: "m".to_string(),
                signal_price: 100.0,
                execution_price: 100.0,
                size: 1.0,
                commission: 0.0,
                slippage_bps: 0.0,
                pnl: Some(50.0),
                portfolio_equity_after: 10_550.0,
            })
            .await
            .unwrap();
        store
            .save_trade(&TradeRecord {
                id: TradeRecord::new_id(),
                ts: 102,
                symbol: "AAA".to_string(),
                action: Action::Sell,
                strategy_id: "m".to_string(),
                signal_price: 100.0,
                execution_price: 100.0,
                size: 1.0,
                commission: 0.0,
                slippage_bps: 0.0,
                pnl: Some(-20.0),
                portfolio_equity_after: 10_530.0,
            })
            .await
            .unwrap();

        let recovered = recover(&store).await.unwrap();
        let checkpoint = recovered.checkpoint.unwrap();
        assert_eq!(checkpoint.ts, 100);
        assert_eq!(recovered.replay_trades.len(), 2);

        let replayed_pnl: f64 = recovered.replay_trades.iter().filter_map(|t| t.pnl).sum();
        let reconstructed_equity = checkpoint.equity + replayed_pnl;
        assert!((reconstructed_equity - 10_530.0).abs() < 1e-9);

        std::fs::remove_dir_all(&dir).ok();
    }

    /// Scenario 6: a large order under the size-aware strategy becomes a
    /// 6-slice TWAP whose child sizes sum back to the requested notional.
    #[test]
    fn large_order_becomes_six_slice_twap() {
        let optimizer = OrderOptimizer::new(
            OrderOptimizerConfig { max_execution_time_secs: 300.0, ..Default::default() },
            OptimizationStrategy::SizeAware,
            1.0,
        );
        let decision = crate::types::EnsembleDecision {
            symbol: "AAA".to_string(),
            action: Action::Buy,
            confidence: 0.9,
            entry_price: 2_000.0,
            stop_loss: None,
            take_profit: None,
            voting_method: crate::types::VotingMethod::WeightedAverage,
            contributing_signals: Vec::new(),
            weights_snapshot: HashMap::new(),
        };
        let plan = optimizer.plan(&decision, 12_000.0, 0.0, 0.0, 3.0);

        assert_eq!(plan.order_type, crate::types::OrderType::Twap);
        assert_eq!(plan.orders.len(), 6);
        let total: f64 = plan.orders.iter().map(|o| o.size).sum();
        assert!((total - 12_000.0).abs() < 1e-6);

        let delays: Vec<f64> = plan.orders.iter().map(|o| o.delay_seconds).collect();
        for window in delays.windows(2) {
            assert!(window[1] > window[0]);
        }
    }

    /// A paused runner's command surface toggles halt/pause flags without
    /// needing a full tick to observe the effect.
    #[tokio::test]
    async fn halt_command_is_reflected_in_status() {
        let clock: Arc<dyn Clock> = Arc::new(SimClock::new(0, 1));
        let source = crate::market_data::SimulatedMarketDataSource::new(clock.clone(), vec!["AAA".to_string()], 100.0);
        let market_feed = crate::market_data::MarketFeed::new(vec![Box::new(source)], Default::default());
        let strategies = crate::strategy::StrategyRegistry::new(Default::default());
        let optimizer = OrderOptimizer::new(OrderOptimizerConfig::default(), OptimizationStrategy::SizeAware, 1.0);
        let venue = Arc::new(SimulatedOrderVenue::new(clock.clone(), 5.0, 5.0));
        let execution = ExecutionEngine::new(venue, 10_000.0);
        let dir = tempdir();
        let store: Arc<dyn StateStore> = Arc::new(KvStateStore::new(&dir).unwrap());

        let runner = super::PipelineRunner::new(
            crate::config::EngineConfig::default(),
            clock,
            market_feed,
            strategies,
            optimizer,
            execution,
            store,
            vec!["AAA".to_string()],
        );

        runner.command(Command::Pause).await.unwrap();
        runner.command(Command::Resume).await.unwrap();
        runner.command(Command::Halt).await.unwrap();
        runner.command(Command::Flatten).await.unwrap();
        assert!(runner.command(Command::Reduce(1.5)).await.is_err(), "reduce fraction out of [0,1] must be rejected");
        std::fs::remove_dir_all(&dir).ok();
    }

    /// Scenario 7: a manual REDUCE(50%) command halves an existing position
    /// and persists the closing trade through the state store.
    #[tokio::test]
    async fn reduce_command_shrinks_an_open_position() {
        let clock: Arc<dyn Clock> = Arc::new(SimClock::new(0, 1));
        let source = crate::market_data::SimulatedMarketDataSource::new(clock.clone(), vec!["AAA".to_string()], 100.0);
        let market_feed = crate::market_data::MarketFeed::new(vec![Box::new(source)], Default::default());
        let strategies = crate::strategy::StrategyRegistry::new(Default::default());
        let optimizer = OrderOptimizer::new(OrderOptimizerConfig::default(), OptimizationStrategy::SizeAware, 1.0);
        let venue = Arc::new(SimulatedOrderVenue::new(clock.clone(), 0.0, 0.0));
        let execution = ExecutionEngine::new(venue, 10_000.0);
        let dir = tempdir();
        let store: Arc<dyn StateStore> = Arc::new(KvStateStore::new(&dir).unwrap());

        let plan = crate::types::ExecutionPlan {
            symbol: "AAA".to_string(),
            side: Action::Buy,
            total_amount: 10.0,
            order_type: crate::types::OrderType::Market,
            orders: vec![crate::types::ChildOrder {
                order_type: crate::types::OrderType::Market,
                size: 10.0,
                limit_price: None,
                delay_seconds: 0.0,
            }],
            estimated_commission_bps: 0.0,
            estimated_slippage_bps: 0.0,
            deadline_seconds: 5.0,
        };
        execution.execute(&plan, "momentum", 100.0, 0.0, 0, &HashMap::new()).await.unwrap();
        assert_eq!(execution.portfolio_snapshot().positions.get("AAA").unwrap().size, 10.0);

        let runner = super::PipelineRunner::new(
            crate::config::EngineConfig::default(),
            clock,
            market_feed,
            strategies,
            optimizer,
            execution,
            store.clone(),
            vec!["AAA".to_string()],
        );

        runner.command(Command::Reduce(0.5)).await.unwrap();
        assert!((runner.portfolio_snapshot().positions.get("AAA").unwrap().size - 5.0).abs() < 1e-9);

        let trades = store.trades_since(-1).await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].strategy_id, "manual_reduce");
        std::fs::remove_dir_all(&dir).ok();
    }
}
