pub mod source;

pub use source::{MarketDataSource, SimulatedMarketDataSource};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tracing::{instrument, warn};

use crate::config::MarketFeedConfig;
use crate::types::MarketFrame;

/// C1 — Market Feed. Fans out to configured sources in parallel; a
/// per-source timeout yields an empty partial result rather than aborting
/// the tick.
pub struct MarketFeed {
    sources: Vec<Arc<dyn MarketDataSource>>,
    config: MarketFeedConfig,
}

impl MarketFeed {
    pub fn new(sources: Vec<Box<dyn MarketDataSource>>, config: MarketFeedConfig) -> Self {
        Self {
            sources: sources.into_iter().map(Arc::from).collect(),
            config,
        }
    }

    /// Pull a ticker snapshot for every symbol from every source in
    /// parallel, merging the results keyed by symbol. A source that times
    /// out contributes nothing for this tick rather than failing the whole
    /// fetch; rate-limit compliance is that source's own responsibility.
    #[instrument(skip(self, symbols))]
    pub async fn fetch(&self, symbols: &[String]) -> HashMap<String, MarketFrame> {
        let timeout = Duration::from_secs_f64(self.config.source_timeout_secs);

        let tasks = self.sources.iter().cloned().map(|source| {
            let symbols = symbols.to_vec();
            let timeout = timeout;
            tokio::spawn(async move {
                let mut frames = Vec::new();
                for symbol in &symbols {
                    match tokio::time::timeout(timeout, source.fetch_ticker(symbol)).await {
                        Ok(Ok(frame)) => frames.push(frame),
                        Ok(Err(e)) => {
                            warn!(symbol, error = %e, "market data fetch failed");
                        }
                        Err(_) => {
                            warn!(symbol, timeout_secs = timeout.as_secs_f64(), "market data fetch timed out");
                        }
                    }
                }
                frames
            })
        });

        let mut out = HashMap::new();
        for result in join_all(tasks).await {
            match result {
                Ok(frames) => {
                    for frame in frames {
                        out.insert(frame.symbol.clone(), frame);
                    }
                }
                Err(join_err) => warn!(error = %join_err, "market data source task panicked"),
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimClock;
    use std::sync::Arc;

    #[tokio::test]
    async fn fetch_merges_across_sources() {
        let clock = Arc::new(SimClock::new(1_000, 1));
        let source = SimulatedMarketDataSource::new(clock, vec!["AAA".to_string()], 100.0);
        let feed = MarketFeed::new(vec![Box::new(source)], MarketFeedConfig::default());
        let frames = feed.fetch(&["AAA".to_string()]).await;
        assert!(frames.contains_key("AAA"));
    }

    #[tokio::test]
    async fn fetch_skips_unknown_symbols() {
        let clock = Arc::new(SimClock::new(1_000, 1));
        let source = SimulatedMarketDataSource::new(clock, vec!["AAA".to_string()], 100.0);
        let feed = MarketFeed::new(vec![Box::new(source)], MarketFeedConfig::default());
        let frames = feed.fetch(&["ZZZ".to_string()]).await;
        assert!(frames.is_empty());
    }
}
