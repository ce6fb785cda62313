use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{instrument, warn};

use crate::config::StrategyRegistryConfig;
use crate::types::{MarketFrame, Signal};

use super::Strategy;

struct Entry {
    strategy: Arc<dyn Strategy>,
    consecutive_faults: AtomicU32,
    disabled: std::sync::atomic::AtomicBool,
}

/// C4 — Strategy Registry. Fans out to every registered strategy in
/// parallel with a per-strategy timeout; a strategy that times out or
/// returns an error counts as one fault. After `max_consecutive_faults` in a
/// row it is auto-disabled and skipped on subsequent ticks until manually
/// re-enabled.
pub struct StrategyRegistry {
    entries: Vec<Entry>,
    config: StrategyRegistryConfig,
}

impl StrategyRegistry {
    pub fn new(config: StrategyRegistryConfig) -> Self {
        Self { entries: Vec::new(), config }
    }

    pub fn register(&mut self, strategy: Arc<dyn Strategy>) {
        self.entries.push(Entry {
            strategy,
            consecutive_faults: AtomicU32::new(0),
            disabled: std::sync::atomic::AtomicBool::new(false),
        });
    }

    pub fn is_enabled(&self, name: &str) -> Option<bool> {
        self.entries
            .iter()
            .find(|e| e.strategy.name() == name)
            .map(|e| !e.disabled.load(Ordering::SeqCst))
    }

    #[instrument(skip(self, frames))]
    pub async fn generate_all(&self, frames: &HashMap<String, MarketFrame>) -> Vec<Signal> {
        let timeout = Duration::from_secs_f64(self.config.per_strategy_timeout_secs);
        let mut handles = Vec::new();

        for entry in &self.entries {
            if entry.disabled.load(Ordering::SeqCst) {
                continue;
            }
            let strategy = entry.strategy.clone();
            let frames = frames.clone();
            handles.push((entry, tokio::spawn(async move {
                strategy.generate_signal(&frames).await
            })));
        }

        let mut out = Vec::new();
        for (entry, handle) in handles {
            let name = entry.strategy.name().to_string();
            let result = tokio::time::timeout(timeout, handle).await;
            match result {
                Ok(Ok(Ok(signals))) => {
                    entry.consecutive_faults.store(0, Ordering::SeqCst);
                    out.extend(signals);
                }
                Ok(Ok(Err(e))) => {
                    warn!(strategy = %name, error = %e, "strategy returned an error");
                    self.record_fault(entry, &name);
                }
                Ok(Err(join_err)) => {
                    warn!(strategy = %name, error = %join_err, "strategy task panicked");
                    self.record_fault(entry, &name);
                }
                Err(_) => {
                    warn!(strategy = %name, timeout_secs = self.config.per_strategy_timeout_secs, "strategy timed out");
                    self.record_fault(entry, &name);
                }
            }
        }

        out
    }

    fn record_fault(&self, entry: &Entry, name: &str) {
        let faults = entry.consecutive_faults.fetch_add(1, Ordering::SeqCst) + 1;
        if faults >= self.config.max_consecutive_faults {
            entry.disabled.store(true, Ordering::SeqCst);
            warn!(strategy = %name, faults, "strategy auto-disabled after consecutive faults");
        }
    }
}
