// =============================================================================
// Ensemble Voter — combines per-strategy signals for a symbol into one
// decision using one of three voting methods.
// =============================================================================
//
// Three voting methods (weighted average, majority, blend) over a
// strategy-weight map. HOLD signals never participate in any vote. A
// decision is suppressed (returns `None`) unless both `confidence_threshold`
// and `min_agreeing_strategies` are met. Ties in weighted-average and
// majority favor BUY (the order in which those methods compare action
// totals); blend's explicit buy-vs-sell comparison favors SELL on a tie.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use crate::config::{EnsembleConfig, VotingMethodConfig};
use crate::types::{Action, EnsembleDecision, Signal, VotingMethod};

pub struct EnsembleVoter {
    config: EnsembleConfig,
    weights: HashMap<String, f64>,
    history: VecDeque<EnsembleDecision>,
}

const HISTORY_CAP: usize = 200;

/// Result of one voting method: the winning side, its confidence, and the
/// highest-confidence signal on that side (source of entry_price/stop_loss/
/// take_profit for the final decision).
struct VoteOutcome<'a> {
    action: Action,
    confidence: f64,
    representative: &'a Signal,
}

impl EnsembleVoter {
    pub fn new(config: EnsembleConfig) -> Self {
        Self { config, weights: HashMap::new(), history: VecDeque::new() }
    }

    pub fn set_weights(&mut self, weights: HashMap<String, f64>) {
        self.weights = weights;
    }

    pub fn vote(&mut self, symbol: &str, signals: &[Signal]) -> Option<EnsembleDecision> {
        let active: Vec<&Signal> =
            signals.iter().filter(|s| s.symbol == symbol && s.action != Action::Hold).collect();
        if active.is_empty() || active.len() < self.config.min_agreeing_strategies {
            return None;
        }

        let method = match self.config.method {
            VotingMethodConfig::WeightedAverage => VotingMethod::WeightedAverage,
            VotingMethodConfig::Majority => VotingMethod::Majority,
            VotingMethodConfig::Blend => VotingMethod::Blend,
        };

        let outcome = match method {
            VotingMethod::WeightedAverage => self.weighted_average_vote(&active),
            VotingMethod::Majority => self.majority_vote(&active),
            VotingMethod::Blend => self.blend_vote(&active),
        }?;

        if outcome.confidence < self.config.confidence_threshold {
            return None;
        }

        let agreeing = active.iter().filter(|s| s.action == outcome.action).count();
        if agreeing < self.config.min_agreeing_strategies {
            return None;
        }

        let representative = outcome.representative;
        let decision = EnsembleDecision {
            symbol: symbol.to_string(),
            action: outcome.action,
            confidence: outcome.confidence,
            entry_price: representative.entry_price,
            stop_loss: representative.stop_loss,
            take_profit: representative.take_profit,
            voting_method: method,
            contributing_signals: active.into_iter().cloned().collect(),
            weights_snapshot: self.weights.clone(),
        };

        self.history.push_back(decision.clone());
        if self.history.len() > HISTORY_CAP {
            self.history.pop_front();
        }

        Some(decision)
    }

    /// Falls back to an equal `1/n` split across the active signal count
    /// when a strategy carries no explicit allocation weight.
    fn weight_of(&self, strategy_id: &str, active_count: usize) -> f64 {
        self.weights.get(strategy_id).copied().unwrap_or(1.0 / active_count.max(1) as f64)
    }

    fn representative<'a>(signals: &[&'a Signal], action: Action) -> Option<&'a Signal> {
        signals
            .iter()
            .filter(|s| s.action == action)
            .max_by(|a, b| a.confidence.partial_cmp(&b.confidence).unwrap())
            .copied()
    }

    /// Winner = side with the larger summed strategy weight (ties favor
    /// BUY); confidence = weighted average of every active signal's
    /// confidence, not just the winning side's.
    fn weighted_average_vote<'a>(&self, signals: &[&'a Signal]) -> Option<VoteOutcome<'a>> {
        let n = signals.len();
        let mut buy_votes = 0.0;
        let mut sell_votes = 0.0;
        let mut weighted_confidence_sum = 0.0;
        for s in signals {
            let w = self.weight_of(&s.strategy_id, n);
            match s.action {
                Action::Buy => buy_votes += w,
                Action::Sell => sell_votes += w,
                Action::Hold => {}
            }
            weighted_confidence_sum += s.confidence * w;
        }
        let total_weight = buy_votes + sell_votes;
        if total_weight < 1e-12 {
            return None;
        }
        let action = if buy_votes >= sell_votes { Action::Buy } else { Action::Sell };
        let confidence = weighted_confidence_sum / total_weight;
        let representative = Self::representative(signals, action)?;
        Some(VoteOutcome { action, confidence, representative })
    }

    /// Winner = side with more votes by raw count (ties favor BUY), gated by
    /// a strict majority `(n + 1) / 2`; confidence = mean confidence of the
    /// winning side only.
    fn majority_vote<'a>(&self, signals: &[&'a Signal]) -> Option<VoteOutcome<'a>> {
        let mut buy_count = 0usize;
        let mut sell_count = 0usize;
        let mut buy_confidences = Vec::new();
        let mut sell_confidences = Vec::new();
        for s in signals {
            match s.action {
                Action::Buy => {
                    buy_count += 1;
                    buy_confidences.push(s.confidence);
                }
                Action::Sell => {
                    sell_count += 1;
                    sell_confidences.push(s.confidence);
                }
                Action::Hold => {}
            }
        }
        let action = if buy_count >= sell_count { Action::Buy } else { Action::Sell };
        let required_majority = (signals.len() + 1) / 2;
        let (count, confidences) =
            if action == Action::Buy { (buy_count, &buy_confidences) } else { (sell_count, &sell_confidences) };
        if count < required_majority {
            return None;
        }
        let confidence = confidences.iter().sum::<f64>() / confidences.len() as f64;
        let representative = Self::representative(signals, action)?;
        Some(VoteOutcome { action, confidence, representative })
    }

    /// Winner = side with the larger share of total weighted confidence
    /// (ties favor SELL, from the strict `buy > sell` comparison);
    /// confidence = that side's normalised share.
    fn blend_vote<'a>(&self, signals: &[&'a Signal]) -> Option<VoteOutcome<'a>> {
        let n = signals.len();
        let mut buy_confidence = 0.0;
        let mut sell_confidence = 0.0;
        for s in signals {
            let w = self.weight_of(&s.strategy_id, n);
            match s.action {
                Action::Buy => buy_confidence += s.confidence * w,
                Action::Sell => sell_confidence += s.confidence * w,
                Action::Hold => {}
            }
        }
        let total = buy_confidence + sell_confidence;
        if total < 1e-12 {
            return None;
        }
        let buy_share = buy_confidence / total;
        let sell_share = sell_confidence / total;
        let (action, confidence) =
            if buy_share > sell_share { (Action::Buy, buy_share) } else { (Action::Sell, sell_share) };
        let representative = Self::representative(signals, action)?;
        Some(VoteOutcome { action, confidence, representative })
    }
}
