// =============================================================================
// Adaptive Allocator — turns per-strategy performance into capital weights.
// =============================================================================
//
// Two interchangeable allocation methods: performance-weighted (Sharpe-based
// score, EWMA-smoothed against the previous weight) and Thompson Sampling
// (Beta-posterior win/loss counters sampled via order statistics). Both
// enforce a `min_weight` floor and renormalise to sum to 1.
// =============================================================================

use std::collections::HashMap;

use tracing::instrument;

use crate::clock::Clock;
use crate::config::{AllocationMethod, AllocatorConfig};
use crate::types::{AllocationWeights, StrategyPerformance};

#[derive(Debug, Clone, Default)]
struct ThompsonCounters {
    alpha: f64,
    beta: f64,
}

impl ThompsonCounters {
    fn new() -> Self {
        Self { alpha: 1.0, beta: 1.0 }
    }
}

pub struct AdaptiveAllocator {
    config: AllocatorConfig,
    last_weights: AllocationWeights,
    last_rebalance: Option<i64>,
    thompson: HashMap<String, ThompsonCounters>,
}

impl AdaptiveAllocator {
    pub fn new(config: AllocatorConfig) -> Self {
        Self { config, last_weights: HashMap::new(), last_rebalance: None, thompson: HashMap::new() }
    }

    /// Feed a closed trade's outcome into the Thompson counters. Only used
    /// when `config.method == ThompsonSampling`; harmless no-op otherwise.
    pub fn record_outcome(&mut self, strategy_id: &str, won: bool) {
        let counters = self.thompson.entry(strategy_id.to_string()).or_insert_with(ThompsonCounters::new);
        if won {
            counters.alpha += 1.0;
        } else {
            counters.beta += 1.0;
        }
    }

    #[instrument(skip(self, performances, clock))]
    pub fn rebalance(
        &mut self,
        performances: &HashMap<String, StrategyPerformance>,
        clock: &dyn Clock,
        now: i64,
    ) -> AllocationWeights {
        if let Some(last) = self.last_rebalance {
            if now - last < self.config.rebalance_interval_secs && !self.last_weights.is_empty() {
                return self.last_weights.clone();
            }
        }

        let raw = match self.config.method {
            AllocationMethod::PerformanceWeighted => self.performance_weighted_scores(performances),
            AllocationMethod::ThompsonSampling => self.thompson_sampled_scores(performances, clock),
        };

        let smoothed = self.smooth_and_floor(raw);
        self.last_weights = smoothed;
        self.last_rebalance = Some(now);
        self.last_weights.clone()
    }

    fn performance_weighted_scores(
        &self,
        performances: &HashMap<String, StrategyPerformance>,
    ) -> HashMap<String, f64> {
        performances
            .iter()
            .map(|(id, perf)| (id.clone(), perf.sharpe().max(0.0) + 1e-6))
            .collect()
    }

    fn thompson_sampled_scores(
        &self,
        performances: &HashMap<String, StrategyPerformance>,
        clock: &dyn Clock,
    ) -> HashMap<String, f64> {
        performances
            .keys()
            .map(|id| {
                let counters = self.thompson.get(id).cloned().unwrap_or_else(ThompsonCounters::new);
                let sample = sample_beta(counters.alpha, counters.beta, clock);
                (id.clone(), sample.max(1e-6))
            })
            .collect()
    }

    /// Normalise the raw scores to proportions first, *then* EWMA-blend
    /// against the previous (also normalised) weight, then re-apply the
    /// floor. Blending pre-normalisation would let the scale of this round's
    /// raw scores silently skew how much they deviate from last round's
    /// weights.
    fn smooth_and_floor(&self, raw: HashMap<String, f64>) -> HashMap<String, f64> {
        let normalized = normalize_proportions(raw);
        let blended: HashMap<String, f64> = normalized
            .into_iter()
            .map(|(id, score)| {
                let prev = self.last_weights.get(&id).copied().unwrap_or(score);
                let value = self.config.alpha * score + (1.0 - self.config.alpha) * prev;
                (id, value)
            })
            .collect();
        normalize_with_floor(blended, self.config.min_weight)
    }
}

/// Normalise raw non-negative scores to proportions summing to 1. Falls back
/// to an equal split when the total is negligible.
fn normalize_proportions(scores: HashMap<String, f64>) -> HashMap<String, f64> {
    let n = scores.len();
    if n == 0 {
        return scores;
    }
    let total: f64 = scores.values().sum();
    if total < 1e-12 {
        let share = 1.0 / n as f64;
        scores.keys().map(|k| (k.clone(), share)).collect()
    } else {
        scores.into_iter().map(|(k, v)| (k, v / total)).collect()
    }
}

/// Draws from `Beta(alpha, beta)` via order statistics: since `alpha`/`beta`
/// always land on integers here (a uniform(1, 1) prior incremented by one
/// per win/loss), the k-th order statistic of `alpha + beta - 1` i.i.d.
/// `Uniform(0, 1)` draws is exactly `Beta(alpha, beta)`-distributed. This
/// needs nothing beyond the clock's own `uniform`, so simulated runs stay
/// reproducible under a fixed seed without pulling in a distributions crate.
fn sample_beta(alpha: f64, beta: f64, clock: &dyn Clock) -> f64 {
    let a = alpha.round().max(1.0) as usize;
    let b = beta.round().max(1.0) as usize;
    let n = a + b - 1;
    let mut draws: Vec<f64> = (0..n).map(|_| clock.uniform(0.0, 1.0)).collect();
    draws.sort_by(|x, y| x.partial_cmp(y).unwrap());
    draws[a - 1]
}

/// Normalise to proportions summing to 1, then water-fill: any entry below
/// `min_weight` is pinned there, and the remaining mass is redistributed
/// proportionally among the entries still above floor, repeating until every
/// entry clears the floor. Falls back to an equal split when the floor isn't
/// feasible at all (`min_weight * n >= 1`).
fn normalize_with_floor(scores: HashMap<String, f64>, min_weight: f64) -> HashMap<String, f64> {
    let n = scores.len();
    if n == 0 {
        return scores;
    }
    let n_f = n as f64;
    if min_weight * n_f >= 1.0 {
        return scores.keys().map(|k| (k.clone(), 1.0 / n_f)).collect();
    }

    let mut props = normalize_proportions(scores);

    let mut pinned: HashMap<String, f64> = HashMap::new();
    loop {
        let free: Vec<String> = props.keys().filter(|k| !pinned.contains_key(*k)).cloned().collect();
        let newly_pinned: Vec<String> = free.iter().filter(|k| props[k.as_str()] < min_weight - 1e-12).cloned().collect();
        if newly_pinned.is_empty() {
            break;
        }
        for k in newly_pinned {
            pinned.insert(k.clone(), min_weight);
            props.insert(k, min_weight);
        }

        let pinned_total: f64 = pinned.values().sum();
        let remaining = (1.0 - pinned_total).max(0.0);
        let free_now: Vec<String> = props.keys().filter(|k| !pinned.contains_key(*k)).cloned().collect();
        let free_sum: f64 = free_now.iter().map(|k| props[k.as_str()]).sum();
        if free_sum > 1e-12 {
            for k in &free_now {
                let v = props[k.as_str()] / free_sum * remaining;
                props.insert(k.clone(), v);
            }
        } else if !free_now.is_empty() {
            let share = remaining / free_now.len() as f64;
            for k in &free_now {
                props.insert(k.clone(), share);
            }
        }
    }
    props
}
