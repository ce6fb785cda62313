use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::EngineResult;
use crate::types::{Action, MarketFrame, Signal};

use super::Strategy;

/// Simple reference strategy: goes long when the close's z-score feature
/// (attached by the normaliser) exceeds a threshold, short below its
/// negative. Exists to exercise the registry end to end; real deployments
/// register their own strategies.
pub struct MomentumStrategy {
    id: String,
    z_entry: f64,
}

impl MomentumStrategy {
    pub fn new(id: impl Into<String>, z_entry: f64) -> Self {
        Self { id: id.into(), z_entry }
    }
}

#[async_trait]
impl Strategy for MomentumStrategy {
    fn name(&self) -> &str {
        &self.id
    }

    async fn generate_signal(
        &self,
        frames: &HashMap<String, MarketFrame>,
    ) -> EngineResult<Vec<Signal>> {
        let mut signals = Vec::new();
        for (symbol, frame) in frames {
            let z = frame.z_features.get("close_z").copied().unwrap_or(0.0);
            if z.abs() < self.z_entry {
                continue;
            }
            let action = if z > 0.0 { Action::Buy } else { Action::Sell };
            signals.push(Signal {
                strategy_id: self.id.clone(),
                symbol: symbol.clone(),
                action,
                confidence: (z.abs() / 3.0).min(1.0),
                entry_price: frame.close,
                stop_loss: None,
                take_profit: None,
                metadata: HashMap::new(),
            });
        }
        Ok(signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn generates_buy_on_strong_positive_z() {
        let strat = MomentumStrategy::new("momentum", 1.5);
        let mut frames = HashMap::new();
        let mut frame = MarketFrame {
            venue: "sim".to_string(),
            symbol: "AAA".to_string(),
            interval: "1m".to_string(),
            timestamp: 0,
            open: 100.0,
            high: 100.0,
            low: 100.0,
            close: 100.0,
            volume: 1.0,
            bid: None,
            ask: None,
            bid_size: None,
            ask_size: None,
            volatility: None,
            spread_bps: None,
            z_features: HashMap::new(),
        };
        frame.z_features.insert("close_z".to_string(), 2.0);
        frames.insert("AAA".to_string(), frame);

        let signals = strat.generate_signal(&frames).await.unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].action, Action::Buy);
    }

    #[tokio::test]
    async fn no_signal_below_entry_threshold() {
        let strat = MomentumStrategy::new("momentum", 1.5);
        let mut frames = HashMap::new();
        let mut frame = MarketFrame {
            venue: "sim".to_string(),
            symbol: "AAA".to_string(),
            interval: "1m".to_string(),
            timestamp: 0,
            open: 100.0,
            high: 100.0,
            low: 100.0,
            close: 100.0,
            volume: 1.0,
            bid: None,
            ask: None,
            bid_size: None,
            ask_size: None,
            volatility: None,
            spread_bps: None,
            z_features: HashMap::new(),
        };
        frame.z_features.insert("close_z".to_string(), 0.2);
        frames.insert("AAA".to_string(), frame);

        let signals = strat.generate_signal(&frames).await.unwrap();
        assert!(signals.is_empty());
    }
}
