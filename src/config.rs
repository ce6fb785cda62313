// =============================================================================
// EngineConfig — typed configuration surface (ConfigProvider)
// =============================================================================
//
// Every tunable parameter used by any component lives here, grouped per
// component. Loading from YAML/env is out of scope: callers construct an
// `EngineConfig` however they like (tests via `Default`); this crate only
// ever consumes an already-typed value.
//
// Every field carries `#[serde(default = "...")]` so that adding a field
// later never breaks deserialising an older config document, and persistence
// uses the atomic tmp + rename pattern used throughout this codebase.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::CascadeAction;

fn default_tick_interval_secs() -> f64 {
    30.0
}
fn default_source_timeout_secs() -> f64 {
    10.0
}

fn default_max_staleness_multiplier() -> f64 {
    2.0
}
fn default_outlier_mad_k() -> f64 {
    5.0
}

fn default_normaliser_window() -> usize {
    252
}
fn default_zscore_clip() -> f64 {
    3.0
}

fn default_strategy_timeout_secs() -> f64 {
    1.0
}
fn default_max_consecutive_faults() -> u32 {
    10
}

fn default_cascade_threshold() -> f64 {
    0.6
}
fn default_liquidation_window_secs() -> i64 {
    300
}
fn default_volume_spike_multiplier() -> f64 {
    3.0
}
fn default_clustering_window_secs() -> i64 {
    60
}
fn default_min_events_for_cascade() -> usize {
    5
}
fn default_cascade_action() -> CascadeAction {
    CascadeAction::Reduce50
}

fn default_min_closeable_size() -> f64 {
    0.001
}

fn default_price_impact_normalizer() -> f64 {
    0.05
}

fn default_rebalance_interval_secs() -> i64 {
    3_600
}
fn default_allocator_alpha() -> f64 {
    0.7
}
fn default_min_weight() -> f64 {
    0.02
}

fn default_correlation_lookback_minutes() -> usize {
    60
}
fn default_correlation_threshold() -> f64 {
    0.7
}

fn default_confidence_threshold() -> f64 {
    0.5
}
fn default_min_agreeing_strategies() -> usize {
    3
}
fn default_performance_window() -> usize {
    20
}

fn default_kelly_fraction() -> f64 {
    0.25
}
fn default_min_probability() -> f64 {
    0.5
}
fn default_min_size() -> f64 {
    0.0
}
fn default_max_size() -> f64 {
    0.1
}
fn default_level_1_drawdown() -> f64 {
    -0.05
}
fn default_level_2_drawdown() -> f64 {
    -0.10
}
fn default_level_3_drawdown() -> f64 {
    -0.15
}
fn default_cooldown_minutes() -> i64 {
    30
}

fn default_max_execution_time_secs() -> f64 {
    300.0
}
fn default_hybrid_market_score_high() -> f64 {
    0.65
}
fn default_hybrid_market_score_low() -> f64 {
    0.35
}
fn default_market_impact_bps() -> f64 {
    5.0
}
fn default_maker_fee_bps() -> f64 {
    10.0
}
fn default_taker_fee_bps() -> f64 {
    10.0
}
fn default_loyalty_discount() -> f64 {
    0.0
}
fn default_volume_tiers() -> Vec<FeeTier> {
    vec![
        FeeTier { min_volume_30d: 1_000_000.0, maker_fee_bps: 1.0, taker_fee_bps: 2.0 },
        FeeTier { min_volume_30d: 100_000.0, maker_fee_bps: 2.0, taker_fee_bps: 4.0 },
        FeeTier { min_volume_30d: 10_000.0, maker_fee_bps: 4.0, taker_fee_bps: 6.0 },
    ]
}

fn default_checkpoint_interval_secs() -> i64 {
    300
}
fn default_disk_backup_interval_secs() -> i64 {
    3_600
}
fn default_retention_days() -> i64 {
    30
}

fn default_starting_cash() -> f64 {
    10_000.0
}

// ---------------------------------------------------------------------------
// Sub-configs, one per component
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketFeedConfig {
    #[serde(default = "default_source_timeout_secs")]
    pub source_timeout_secs: f64,
}

impl Default for MarketFeedConfig {
    fn default() -> Self {
        Self {
            source_timeout_secs: default_source_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    #[serde(default = "default_max_staleness_multiplier")]
    pub max_staleness_multiplier: f64,
    #[serde(default = "default_outlier_mad_k")]
    pub outlier_mad_k: f64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_staleness_multiplier: default_max_staleness_multiplier(),
            outlier_mad_k: default_outlier_mad_k(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormaliserConfig {
    #[serde(default = "default_normaliser_window")]
    pub window: usize,
    #[serde(default = "default_zscore_clip")]
    pub zscore_clip: f64,
}

impl Default for NormaliserConfig {
    fn default() -> Self {
        Self {
            window: default_normaliser_window(),
            zscore_clip: default_zscore_clip(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyRegistryConfig {
    #[serde(default = "default_strategy_timeout_secs")]
    pub per_strategy_timeout_secs: f64,
    #[serde(default = "default_max_consecutive_faults")]
    pub max_consecutive_faults: u32,
}

impl Default for StrategyRegistryConfig {
    fn default() -> Self {
        Self {
            per_strategy_timeout_secs: default_strategy_timeout_secs(),
            max_consecutive_faults: default_max_consecutive_faults(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationConfig {
    #[serde(default = "default_cascade_threshold")]
    pub cascade_threshold: f64,
    #[serde(default = "default_liquidation_window_secs")]
    pub window_secs: i64,
    #[serde(default = "default_volume_spike_multiplier")]
    pub volume_spike_multiplier: f64,
    #[serde(default = "default_clustering_window_secs")]
    pub clustering_window_secs: i64,
    #[serde(default = "default_min_events_for_cascade")]
    pub min_events_for_cascade: usize,
    #[serde(default = "default_price_impact_normalizer")]
    pub price_impact_normalizer: f64,
    /// Action C13 takes when a cascade trigger fires for a symbol.
    #[serde(default = "default_cascade_action")]
    pub cascade_action: CascadeAction,
}

impl Default for LiquidationConfig {
    fn default() -> Self {
        Self {
            cascade_threshold: default_cascade_threshold(),
            window_secs: default_liquidation_window_secs(),
            volume_spike_multiplier: default_volume_spike_multiplier(),
            clustering_window_secs: default_clustering_window_secs(),
            min_events_for_cascade: default_min_events_for_cascade(),
            price_impact_normalizer: default_price_impact_normalizer(),
            cascade_action: default_cascade_action(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationMethod {
    PerformanceWeighted,
    ThompsonSampling,
}

impl Default for AllocationMethod {
    fn default() -> Self {
        Self::PerformanceWeighted
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocatorConfig {
    #[serde(default)]
    pub method: AllocationMethod,
    #[serde(default = "default_rebalance_interval_secs")]
    pub rebalance_interval_secs: i64,
    #[serde(default = "default_allocator_alpha")]
    pub alpha: f64,
    #[serde(default = "default_min_weight")]
    pub min_weight: f64,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            method: AllocationMethod::default(),
            rebalance_interval_secs: default_rebalance_interval_secs(),
            alpha: default_allocator_alpha(),
            min_weight: default_min_weight(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorrelationMethod {
    Pearson,
    Spearman,
}

impl Default for CorrelationMethod {
    fn default() -> Self {
        Self::Pearson
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationConfig {
    #[serde(default)]
    pub method: CorrelationMethod,
    #[serde(default = "default_correlation_lookback_minutes")]
    pub lookback_minutes: usize,
    #[serde(default = "default_correlation_threshold")]
    pub threshold: f64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            method: CorrelationMethod::default(),
            lookback_minutes: default_correlation_lookback_minutes(),
            threshold: default_correlation_threshold(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VotingMethodConfig {
    WeightedAverage,
    Majority,
    Blend,
}

impl Default for VotingMethodConfig {
    fn default() -> Self {
        Self::WeightedAverage
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleConfig {
    #[serde(default)]
    pub method: VotingMethodConfig,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    #[serde(default = "default_min_agreeing_strategies")]
    pub min_agreeing_strategies: usize,
    #[serde(default = "default_performance_window")]
    pub performance_window: usize,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            method: VotingMethodConfig::default(),
            confidence_threshold: default_confidence_threshold(),
            min_agreeing_strategies: default_min_agreeing_strategies(),
            performance_window: default_performance_window(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KellyConfig {
    #[serde(default = "default_kelly_fraction")]
    pub fraction: f64,
    #[serde(default = "default_min_probability")]
    pub min_probability: f64,
    #[serde(default = "default_min_size")]
    pub min_size: f64,
    #[serde(default = "default_max_size")]
    pub max_size: f64,
}

impl Default for KellyConfig {
    fn default() -> Self {
        Self {
            fraction: default_kelly_fraction(),
            min_probability: default_min_probability(),
            min_size: default_min_size(),
            max_size: default_max_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_level_1_drawdown")]
    pub level_1_drawdown: f64,
    #[serde(default = "default_level_2_drawdown")]
    pub level_2_drawdown: f64,
    #[serde(default = "default_level_3_drawdown")]
    pub level_3_drawdown: f64,
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: i64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            level_1_drawdown: default_level_1_drawdown(),
            level_2_drawdown: default_level_2_drawdown(),
            level_3_drawdown: default_level_3_drawdown(),
            cooldown_minutes: default_cooldown_minutes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default)]
    pub kelly: KellyConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    /// Below this remaining size, an emergency reduction closes the position
    /// outright instead of leaving a dust remainder.
    #[serde(default = "default_min_closeable_size")]
    pub min_closeable_size: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            kelly: KellyConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            min_closeable_size: default_min_closeable_size(),
        }
    }
}

/// One volume-tier override: at or above `min_volume_30d`, this tier's
/// maker/taker fees replace the venue's base fees. Mirrors
/// `ExchangeCommissionConfig.volume_tier_discounts`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeeTier {
    pub min_volume_30d: f64,
    pub maker_fee_bps: f64,
    pub taker_fee_bps: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderOptimizerConfig {
    #[serde(default = "default_max_execution_time_secs")]
    pub max_execution_time_secs: f64,
    #[serde(default = "default_hybrid_market_score_high")]
    pub hybrid_market_score_high: f64,
    #[serde(default = "default_hybrid_market_score_low")]
    pub hybrid_market_score_low: f64,
    /// Fixed venue-impact add-on folded into the simulated slippage model.
    #[serde(default = "default_market_impact_bps")]
    pub market_impact_bps: f64,
    /// Base taker fee before any volume tier or loyalty discount applies.
    #[serde(default = "default_taker_fee_bps")]
    pub taker_fee_bps: f64,
    /// Base maker fee before any volume tier or loyalty discount applies.
    #[serde(default = "default_maker_fee_bps")]
    pub maker_fee_bps: f64,
    /// Venue charging a flat subscription-style fee ignores tiers and the
    /// loyalty discount entirely (e.g. Finst in the source venue list).
    #[serde(default)]
    pub flat_fee_bps: Option<f64>,
    /// `(1 − loyalty_discount)` multiplier applied when the account holds
    /// the venue's loyalty/discount token (e.g. Binance's BNB discount).
    #[serde(default = "default_loyalty_discount")]
    pub loyalty_discount: f64,
    #[serde(default = "default_volume_tiers")]
    pub volume_tiers: Vec<FeeTier>,
}

impl Default for OrderOptimizerConfig {
    fn default() -> Self {
        Self {
            max_execution_time_secs: default_max_execution_time_secs(),
            hybrid_market_score_high: default_hybrid_market_score_high(),
            hybrid_market_score_low: default_hybrid_market_score_low(),
            market_impact_bps: default_market_impact_bps(),
            taker_fee_bps: default_taker_fee_bps(),
            maker_fee_bps: default_maker_fee_bps(),
            flat_fee_bps: None,
            loyalty_discount: default_loyalty_discount(),
            volume_tiers: default_volume_tiers(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateStoreBackend {
    Sql,
    EmbeddedKv,
}

impl Default for StateStoreBackend {
    fn default() -> Self {
        Self::EmbeddedKv
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateStoreConfig {
    #[serde(default)]
    pub backend: StateStoreBackend,
    #[serde(default = "default_checkpoint_interval_secs")]
    pub checkpoint_interval_secs: i64,
    #[serde(default = "default_disk_backup_interval_secs")]
    pub disk_backup_interval_secs: i64,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    /// File path (embedded-KV) or connection string (SQL).
    #[serde(default = "default_state_path")]
    pub path: String,
}

fn default_state_path() -> String {
    "./data/state".to_string()
}

impl Default for StateStoreConfig {
    fn default() -> Self {
        Self {
            backend: StateStoreBackend::default(),
            checkpoint_interval_secs: default_checkpoint_interval_secs(),
            disk_backup_interval_secs: default_disk_backup_interval_secs(),
            retention_days: default_retention_days(),
            path: default_state_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: f64,
    #[serde(default = "default_starting_cash")]
    pub starting_cash: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            starting_cash: default_starting_cash(),
        }
    }
}

// ---------------------------------------------------------------------------
// Top-level EngineConfig
// ---------------------------------------------------------------------------

/// Typed configuration handed to the orchestrator at construction. Every
/// field has a serde default so that an older JSON document missing new
/// fields still deserialises correctly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub market_feed: MarketFeedConfig,
    #[serde(default)]
    pub validator: ValidatorConfig,
    #[serde(default)]
    pub normaliser: NormaliserConfig,
    #[serde(default)]
    pub strategy_registry: StrategyRegistryConfig,
    #[serde(default)]
    pub liquidation: LiquidationConfig,
    #[serde(default)]
    pub allocator: AllocatorConfig,
    #[serde(default)]
    pub correlation: CorrelationConfig,
    #[serde(default)]
    pub ensemble: EnsembleConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub order_optimizer: OrderOptimizerConfig,
    #[serde(default)]
    pub state_store: StateStoreConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

impl EngineConfig {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;
        info!(path = %path.display(), "engine config loaded");
        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename) to avoid corruption on crash.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content =
            serde_json::to_string_pretty(self).context("failed to serialise engine config")?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;
        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }
}
