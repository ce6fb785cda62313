// =============================================================================
// Feature Normaliser — attaches rolling z-scored features to a market frame
// without disturbing the raw OHLCV values strategies key off of.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use crate::config::NormaliserConfig;
use crate::types::MarketFrame;

struct SymbolWindow {
    closes: VecDeque<f64>,
    volumes: VecDeque<f64>,
}

impl SymbolWindow {
    fn new() -> Self {
        Self { closes: VecDeque::new(), volumes: VecDeque::new() }
    }
}

/// C3 — Feature Normaliser. Maintains a rolling window (default 252 bars) of
/// close/volume per symbol and attaches z-scored, clipped features plus a
/// realised-volatility and spread-bps estimate to each incoming frame.
pub struct FeatureNormalizer {
    config: NormaliserConfig,
    windows: HashMap<String, SymbolWindow>,
}

impl FeatureNormalizer {
    pub fn new(config: NormaliserConfig) -> Self {
        Self { config, windows: HashMap::new() }
    }

    pub fn normalize(&mut self, mut frames: HashMap<String, MarketFrame>) -> HashMap<String, MarketFrame> {
        for (symbol, frame) in frames.iter_mut() {
            let window = self.windows.entry(symbol.clone()).or_insert_with(SymbolWindow::new);

            window.closes.push_back(frame.close);
            window.volumes.push_back(frame.volume);
            if window.closes.len() > self.config.window {
                window.closes.pop_front();
            }
            if window.volumes.len() > self.config.window {
                window.volumes.pop_front();
            }

            let clip = self.config.zscore_clip;
            let close_z = zscore(&window.closes, frame.close).clamp(-clip, clip);
            let volume_z = zscore(&window.volumes, frame.volume).clamp(-clip, clip);

            frame.z_features.insert("close_z".to_string(), close_z);
            frame.z_features.insert("volume_z".to_string(), volume_z);
            frame.volatility = Some(stdev(&window.closes) / mean(&window.closes).max(1e-12));

            if let (Some(bid), Some(ask)) = (frame.bid, frame.ask) {
                let mid = (bid + ask) / 2.0;
                if mid > 1e-12 {
                    frame.spread_bps = Some(((ask - bid) / mid) * 10_000.0);
                }
            }
        }
        frames
    }
}

fn mean(values: &VecDeque<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn stdev(values: &VecDeque<f64>) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// `(x - mean) / stdev` over the window including `x`; 0 if the window is too
/// short or degenerate (constant series).
fn zscore(window: &VecDeque<f64>, x: f64) -> f64 {
    if window.len() < 2 {
        return 0.0;
    }
    let m = mean(window);
    let s = stdev(window);
    if s < 1e-12 {
        0.0
    } else {
        (x - m) / s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(symbol: &str, close: f64) -> MarketFrame {
        MarketFrame {
            venue: "sim".to_string(),
            symbol: symbol.to_string(),
            interval: "1m".to_string(),
            timestamp: 0,
            open: close,
            high: close,
            low: close,
            close,
            volume: 10.0,
            bid: Some(close - 0.01),
            ask: Some(close + 0.01),
            bid_size: None,
            ask_size: None,
            volatility: None,
            spread_bps: None,
            z_features: HashMap::new(),
        }
    }

    #[test]
    fn zscore_clipped_to_configured_bound() {
        let mut norm = FeatureNormalizer::new(NormaliserConfig { window: 252, zscore_clip: 3.0 });
        for i in 0..20 {
            let mut frames = HashMap::new();
            frames.insert("AAA".to_string(), frame("AAA", 100.0 + i as f64 * 0.01));
            norm.normalize(frames);
        }
        let mut frames = HashMap::new();
        frames.insert("AAA".to_string(), frame("AAA", 10_000.0));
        let out = norm.normalize(frames);
        let z = out["AAA"].z_features["close_z"];
        assert!(z <= 3.0 && z >= -3.0);
    }

    #[test]
    fn preserves_raw_price_fields() {
        let mut norm = FeatureNormalizer::new(NormaliserConfig::default());
        let mut frames = HashMap::new();
        frames.insert("AAA".to_string(), frame("AAA", 123.45));
        let out = norm.normalize(frames);
        assert_eq!(out["AAA"].close, 123.45);
    }

    #[test]
    fn spread_bps_computed_from_bid_ask() {
        let mut norm = FeatureNormalizer::new(NormaliserConfig::default());
        let mut frames = HashMap::new();
        frames.insert("AAA".to_string(), frame("AAA", 100.0));
        let out = norm.normalize(frames);
        assert!(out["AAA"].spread_bps.unwrap() > 0.0);
    }

    #[test]
    fn single_sample_zscore_is_zero() {
        let mut norm = FeatureNormalizer::new(NormaliserConfig::default());
        let mut frames = HashMap::new();
        frames.insert("AAA".to_string(), frame("AAA", 100.0));
        let out = norm.normalize(frames);
        assert_eq!(out["AAA"].z_features["close_z"], 0.0);
    }
}
