// =============================================================================
// Correlation Manager — pairwise return correlation across open positions,
// used by the risk manager to penalise concentrated, correlated bets.
// =============================================================================
//
// Plain rolling return buffers plus a hand-rolled Pearson/Spearman
// coefficient — no external statistics crate. The confidence-penalty
// multiplier is clamped with a hard floor of 0.5 so a buggy correlation
// input above `1 + threshold` can never push sizing to zero.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use crate::config::{CorrelationConfig, CorrelationMethod};
use crate::types::Signal;

pub struct CorrelationManager {
    config: CorrelationConfig,
    returns: HashMap<String, VecDeque<f64>>,
}

impl CorrelationManager {
    pub fn new(config: CorrelationConfig) -> Self {
        Self { config, returns: HashMap::new() }
    }

    /// Appends one realised return to a strategy's rolling history (keyed by
    /// `strategy_id`, not by symbol — correlation is tracked between
    /// strategies, per SPEC_FULL §4.7/§3 `CorrelationMatrix`).
    pub fn record_return(&mut self, strategy_id: &str, ret: f64) {
        let buf = self.returns.entry(strategy_id.to_string()).or_default();
        buf.push_back(ret);
        if buf.len() > self.config.lookback_minutes {
            buf.pop_front();
        }
    }

    pub fn correlation(&self, a: &str, b: &str) -> Option<f64> {
        let xa = self.returns.get(a)?;
        let xb = self.returns.get(b)?;
        let n = xa.len().min(xb.len());
        if n < 2 {
            return None;
        }
        let xa: Vec<f64> = xa.iter().rev().take(n).copied().collect();
        let xb: Vec<f64> = xb.iter().rev().take(n).copied().collect();
        Some(match self.config.method {
            CorrelationMethod::Pearson => pearson(&xa, &xb),
            CorrelationMethod::Spearman => pearson(&rank(&xa), &rank(&xb)),
        })
    }

    /// Portfolio-level correlation: mean of the upper-triangle pairwise
    /// correlations across every strategy with enough history.
    pub fn portfolio_correlation(&self, strategy_ids: &[String]) -> f64 {
        let mut sum = 0.0;
        let mut count = 0;
        for i in 0..strategy_ids.len() {
            for j in (i + 1)..strategy_ids.len() {
                if let Some(c) = self.correlation(&strategy_ids[i], &strategy_ids[j]) {
                    sum += c.abs();
                    count += 1;
                }
            }
        }
        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }

    /// Multiplier applied to a candidate position's size: 1.0 below the
    /// threshold, decaying toward 0.5 as correlation rises, never below 0.5.
    pub fn confidence_penalty(&self, strategy_ids: &[String]) -> f64 {
        let corr = self.portfolio_correlation(strategy_ids);
        if corr <= self.config.threshold {
            return 1.0;
        }
        let excess = (corr - self.config.threshold).max(0.0);
        (1.0 - excess).max(0.5)
    }

    /// Average absolute correlation between `strategy_id` and the strategies
    /// currently holding a position (excluding itself). 0.0 if either side
    /// lacks history.
    fn position_correlation(&self, strategy_id: &str, held_strategies: &[String]) -> f64 {
        let correlations: Vec<f64> = held_strategies
            .iter()
            .filter(|s| s.as_str() != strategy_id)
            .filter_map(|s| self.correlation(strategy_id, s))
            .map(|c| c.abs())
            .collect();
        if correlations.is_empty() {
            0.0
        } else {
            correlations.iter().sum::<f64>() / correlations.len() as f64
        }
    }

    /// Pre-vote signal adjustment (SPEC_FULL §4.7, §4.13 step 6): scales each
    /// signal's confidence down when its strategy is highly correlated with
    /// strategies already holding a position, mirroring the original's
    /// `adjust_for_correlation`. Signals from strategies with no correlation
    /// history, or below `threshold`, pass through unchanged.
    pub fn adjust(&self, signals: &[Signal], held_strategies: &[String]) -> Vec<Signal> {
        signals
            .iter()
            .cloned()
            .map(|mut signal| {
                let corr = self.position_correlation(&signal.strategy_id, held_strategies);
                if corr > self.config.threshold {
                    let penalty = (1.0 - (corr - self.config.threshold)).max(0.5);
                    signal.confidence *= penalty;
                }
                signal
            })
            .collect()
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len();
    let ma = mean(a);
    let mb = mean(b);
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..n {
        let da = a[i] - ma;
        let db = b[i] - mb;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    let denom = (var_a * var_b).sqrt();
    if denom < 1e-12 {
        0.0
    } else {
        cov / denom
    }
}

/// Ranks (average rank on ties), feeding a Pearson correlation of ranks,
/// which is the definition of Spearman's rho.
fn rank(values: &[f64]) -> Vec<f64> {
    let mut indexed: Vec<(usize, f64)> = values.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());

    let mut ranks = vec![0.0; values.len()];
    let mut i = 0;
    while i < indexed.len() {
        let mut j = i;
        while j + 1 < indexed.len() && (indexed[j + 1].1 - indexed[i].1).abs() < 1e-12 {
            j += 1;
        }
        let avg_rank = ((i + j) as f64 / 2.0) + 1.0;
        for k in i..=j {
            ranks[indexed[k].0] = avg_rank;
        }
        i = j + 1;
    }
    ranks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfectly_correlated_series_scores_one() {
        let mut mgr = CorrelationManager::new(CorrelationConfig::default());
        for i in 0..10 {
            mgr.record_return("A", i as f64);
            mgr.record_return("B", i as f64 * 2.0);
        }
        let c = mgr.correlation("A", "B").unwrap();
        assert!((c - 1.0).abs() < 1e-6);
    }

    #[test]
    fn uncorrelated_series_has_low_magnitude() {
        let mut mgr = CorrelationManager::new(CorrelationConfig::default());
        let a = [1.0, -1.0, 1.0, -1.0, 1.0, -1.0];
        let b = [1.0, 1.0, -1.0, -1.0, 1.0, 1.0];
        for i in 0..a.len() {
            mgr.record_return("A", a[i]);
            mgr.record_return("B", b[i]);
        }
        let c = mgr.correlation("A", "B").unwrap();
        assert!(c.abs() < 0.7);
    }

    #[test]
    fn confidence_penalty_has_hard_floor_at_half() {
        let mut config = CorrelationConfig::default();
        config.threshold = 0.1;
        let mut mgr = CorrelationManager::new(config);
        for i in 0..10 {
            mgr.record_return("A", i as f64);
            mgr.record_return("B", i as f64);
        }
        let penalty = mgr.confidence_penalty(&["A".to_string(), "B".to_string()]);
        assert!(penalty >= 0.5);
    }

    #[test]
    fn below_threshold_penalty_is_full_weight() {
        let mut config = CorrelationConfig::default();
        config.threshold = 0.9;
        let mgr = CorrelationManager::new(config);
        let penalty = mgr.confidence_penalty(&["A".to_string(), "B".to_string()]);
        assert_eq!(penalty, 1.0);
    }

    #[test]
    fn insufficient_history_returns_none() {
        let mut mgr = CorrelationManager::new(CorrelationConfig::default());
        mgr.record_return("A", 1.0);
        mgr.record_return("B", 1.0);
        assert!(mgr.correlation("A", "B").is_none());
    }

    fn signal(strategy_id: &str, confidence: f64) -> Signal {
        Signal {
            strategy_id: strategy_id.to_string(),
            symbol: "AAA".to_string(),
            action: crate::types::Action::Buy,
            confidence,
            entry_price: 100.0,
            stop_loss: None,
            take_profit: None,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn adjust_penalises_signal_correlated_with_held_strategy() {
        let mut config = CorrelationConfig::default();
        config.threshold = 0.1;
        let mut mgr = CorrelationManager::new(config);
        for i in 0..10 {
            mgr.record_return("momentum", i as f64);
            mgr.record_return("meanrev", i as f64);
        }
        let signals = vec![signal("momentum", 0.8)];
        let adjusted = mgr.adjust(&signals, &["meanrev".to_string()]);
        assert!(adjusted[0].confidence < 0.8);
        assert!(adjusted[0].confidence >= 0.8 * 0.5);
    }

    #[test]
    fn adjust_leaves_uncorrelated_signal_unchanged() {
        let config = CorrelationConfig { threshold: 0.9, ..CorrelationConfig::default() };
        let mgr = CorrelationManager::new(config);
        let signals = vec![signal("momentum", 0.8)];
        let adjusted = mgr.adjust(&signals, &["meanrev".to_string()]);
        assert_eq!(adjusted[0].confidence, 0.8);
    }
}
