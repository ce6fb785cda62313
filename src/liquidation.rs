// =============================================================================
// Liquidation Cascade Detector — watches a rolling window of forced
// liquidation events and scores the likelihood of a cascading unwind.
// =============================================================================
//
// Four weighted sub-scores combine into one cascade score in [0, 1]:
// volume spike (35%), time clustering (25%), directional bias (20%), and
// price impact (20%). When the detector has too little history to compute a
// volume-spike baseline it falls back to a simple event-count heuristic
// rather than reporting a meaningless zero.
// =============================================================================

use std::collections::VecDeque;

use tracing::{info, instrument};

use crate::config::LiquidationConfig;
use crate::types::{LiquidationEvent, LiquidationSide};

#[derive(Debug, Clone)]
pub struct CascadeScore {
    pub score: f64,
    pub triggered: bool,
    pub volume_spike: f64,
    pub time_clustering: f64,
    pub directional_bias: f64,
    pub price_impact: f64,
}

/// C5 — Liquidation Detector. One instance covers one symbol's window of
/// recent liquidation events.
pub struct LiquidationDetector {
    config: LiquidationConfig,
    events: VecDeque<LiquidationEvent>,
}

impl LiquidationDetector {
    pub fn new(config: LiquidationConfig) -> Self {
        Self { config, events: VecDeque::new() }
    }

    pub fn record(&mut self, event: LiquidationEvent) {
        self.events.push_back(event);
        self.prune();
    }

    fn prune(&mut self) {
        if let Some(latest) = self.events.back().map(|e| e.timestamp) {
            let cutoff = latest - self.config.window_secs;
            while matches!(self.events.front(), Some(e) if e.timestamp < cutoff) {
                self.events.pop_front();
            }
        }
    }

    #[instrument(skip(self))]
    pub fn evaluate(&self, now: i64) -> CascadeScore {
        let window_events: Vec<&LiquidationEvent> = self
            .events
            .iter()
            .filter(|e| now - e.timestamp <= self.config.window_secs)
            .collect();

        if window_events.is_empty() {
            return CascadeScore {
                score: 0.0,
                triggered: false,
                volume_spike: 0.0,
                time_clustering: 0.0,
                directional_bias: 0.0,
                price_impact: 0.0,
            };
        }

        let volume_spike = self.volume_spike_score(&window_events);
        let time_clustering = self.time_clustering_score(&window_events);
        let directional_bias = self.directional_bias_score(&window_events);
        let price_impact = self.price_impact_score(&window_events);

        let score = volume_spike * 0.35
            + time_clustering * 0.25
            + directional_bias * 0.20
            + price_impact * 0.20;

        let triggered = score >= self.config.cascade_threshold;
        if triggered {
            info!(score, "liquidation cascade threshold crossed");
        }

        CascadeScore { score, triggered, volume_spike, time_clustering, directional_bias, price_impact }
    }

    /// Compares recent-half volume against baseline-half volume. When the
    /// baseline half is empty (not enough history yet to split in two), falls
    /// back to an event-count heuristic: a burst of events with no baseline
    /// to compare against is itself suspicious once it clears
    /// `min_events_for_cascade`.
    fn volume_spike_score(&self, events: &[&LiquidationEvent]) -> f64 {
        if events.len() < 2 {
            return if events.len() >= self.config.min_events_for_cascade { 0.7 } else { 0.0 };
        }
        let mid = events.len() / 2;
        let (baseline, recent) = events.split_at(mid);
        let baseline_volume: f64 = baseline.iter().map(|e| e.size).sum();
        let recent_volume: f64 = recent.iter().map(|e| e.size).sum();

        if baseline_volume < 1e-9 {
            return if events.len() >= self.config.min_events_for_cascade { 0.7 } else { 0.0 };
        }

        let ratio = recent_volume / baseline_volume;
        ((ratio / self.config.volume_spike_multiplier).min(1.0)).max(0.0)
    }

    /// Fraction of consecutive event-gaps (sorted by timestamp) that fall at
    /// or under `clustering_window_secs` — 0 when spread out, 1 when every
    /// gap is tight.
    fn time_clustering_score(&self, events: &[&LiquidationEvent]) -> f64 {
        if events.len() < 2 {
            return 0.0;
        }
        let mut sorted: Vec<&LiquidationEvent> = events.to_vec();
        sorted.sort_by_key(|e| e.timestamp);

        let gaps = sorted.len() - 1;
        let clustered_gaps = sorted
            .windows(2)
            .filter(|pair| pair[1].timestamp - pair[0].timestamp <= self.config.clustering_window_secs)
            .count();
        clustered_gaps as f64 / gaps as f64
    }

    fn directional_bias_score(&self, events: &[&LiquidationEvent]) -> f64 {
        let long_count = events.iter().filter(|e| e.side == LiquidationSide::Long).count();
        let short_count = events.len() - long_count;
        let total = events.len() as f64;
        if total < 1e-9 {
            return 0.0;
        }
        ((long_count as f64 - short_count as f64).abs() / total).min(1.0)
    }

    /// Range over the full window, not a two-endpoint delta: a price that
    /// overshoots and returns still moved the book, even if it ends up near
    /// where it started.
    fn price_impact_score(&self, events: &[&LiquidationEvent]) -> f64 {
        let mut min_price = f64::MAX;
        let mut max_price = f64::MIN;
        let mut sum_price = 0.0;
        for e in events {
            min_price = min_price.min(e.price);
            max_price = max_price.max(e.price);
            sum_price += e.price;
        }
        let mid = sum_price / events.len() as f64;
        if mid < 1e-9 {
            return 0.0;
        }
        let pct_move = (max_price - min_price) / mid;
        (pct_move / self.config.price_impact_normalizer).min(1.0)
    }
}
