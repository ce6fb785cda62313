// =============================================================================
// Data Validator — rejects malformed or stale market frames before they reach
// the normaliser or any strategy.
// =============================================================================

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::config::ValidatorConfig;
use crate::types::MarketFrame;

/// Reason a frame was dropped, attached to the `debug!`/`warn!` log only —
/// callers just get the surviving subset back.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectionReason {
    NonPositiveClose,
    Stale { age_secs: i64, max_secs: i64 },
    Outlier { close: f64, median: f64, mad: f64 },
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonPositiveClose => write!(f, "close price is not positive"),
            Self::Stale { age_secs, max_secs } => {
                write!(f, "frame age {age_secs}s exceeds max staleness {max_secs}s")
            }
            Self::Outlier { close, median, mad } => {
                write!(f, "close {close} deviates from median {median} by more than MAD {mad}")
            }
        }
    }
}

/// C2 — Data Validator. Holds a short rolling history of closes per symbol to
/// compute a median-absolute-deviation outlier bound; stateless otherwise.
pub struct DataValidator {
    config: ValidatorConfig,
    history: HashMap<String, Vec<f64>>,
    history_len: usize,
}

impl DataValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self {
            config,
            history: HashMap::new(),
            history_len: 30,
        }
    }

    /// Validate and filter a tick's frames. Ticks with zero surviving symbols
    /// are not an error: the caller simply skips strategy generation for this
    /// tick and tries again next interval.
    pub fn validate(
        &mut self,
        now: i64,
        tick_interval_secs: i64,
        frames: HashMap<String, MarketFrame>,
    ) -> HashMap<String, MarketFrame> {
        let max_staleness = (tick_interval_secs as f64 * self.config.max_staleness_multiplier) as i64;
        let mut out = HashMap::new();

        for (symbol, frame) in frames {
            if let Some(reason) = self.check(&symbol, &frame, now, max_staleness) {
                warn!(symbol = %symbol, reason = %reason, "rejected market frame");
                continue;
            }
            self.record(&symbol, frame.close);
            debug!(symbol = %symbol, close = frame.close, "accepted market frame");
            out.insert(symbol, frame);
        }

        out
    }

    fn check(
        &self,
        symbol: &str,
        frame: &MarketFrame,
        now: i64,
        max_staleness: i64,
    ) -> Option<RejectionReason> {
        if frame.close <= 0.0 {
            return Some(RejectionReason::NonPositiveClose);
        }

        let age = now - frame.timestamp;
        if age > max_staleness {
            return Some(RejectionReason::Stale { age_secs: age, max_secs: max_staleness });
        }

        if let Some(hist) = self.history.get(symbol) {
            if hist.len() >= 5 {
                let (median, mad) = median_and_mad(hist);
                if mad > 1e-12 {
                    let deviation = (frame.close - median).abs();
                    if deviation > self.config.outlier_mad_k * mad {
                        return Some(RejectionReason::Outlier { close: frame.close, median, mad });
                    }
                }
            }
        }

        None
    }

    fn record(&mut self, symbol: &str, close: f64) {
        let hist = self.history.entry(symbol.to_string()).or_default();
        hist.push(close);
        if hist.len() > self.history_len {
            hist.remove(0);
        }
    }
}

fn median_and_mad(values: &[f64]) -> (f64, f64) {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let median = percentile_50(&sorted);
    let mut deviations: Vec<f64> = values.iter().map(|v| (v - median).abs()).collect();
    deviations.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mad = percentile_50(&deviations);
    (median, mad)
}

fn percentile_50(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}
