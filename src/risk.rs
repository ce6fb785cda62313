// =============================================================================
// Risk Manager — Kelly sizing, correlation-aware sizing, and a 3-level
// circuit breaker protecting capital against drawdown.
// =============================================================================
//
// Circuit breaker levels, checked against the *daily* drawdown from the
// day's starting equity (fixed at day-open, never chased upward intraday):
//   GREEN     — no breach, full size multiplier (1.0)
//   YELLOW_1  — breach of level_1_drawdown, size multiplier 0.5
//   YELLOW_2  — breach of level_2_drawdown, size multiplier 0.25
//   RED       — breach of level_3_drawdown, size multiplier 0.0, new entries
//               refused until `cooldown_minutes` elapse past the trigger
//
// A separate all-time `peak` (which does chase new highs) backs a
// max-drawdown statistic exposed for reporting; it never gates the breaker
// itself, so a strategy that gains then gives it all back intraday still
// trips on the daily anchor.
//
// YELLOW_1 and YELLOW_2 are kept as two distinct levels with distinct
// multipliers (0.5 / 0.25); the state machine never conflates them into one.
//
// Daily statistics reset on date rollover.
// =============================================================================

use chrono::{NaiveDate, Utc};
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::correlation::CorrelationManager;
use crate::error::{EngineError, EngineResult};
use crate::types::{CircuitBreakerState, CircuitBreakerTrigger, CircuitLevel};

use crate::config::RiskConfig;

struct Inner {
    current_date: NaiveDate,
    /// Equity at the start of the current UTC day; reset only on date
    /// rollover, never chased upward intraday. Drives the daily drawdown
    /// that gates the circuit breaker.
    daily_start: f64,
    /// All-time high water mark, updated whenever equity rises. Tracked
    /// separately so a reporting max-drawdown figure isn't conflated with
    /// the daily breaker anchor.
    peak: f64,
    last_max_drawdown: f64,
    cb: CircuitBreakerState,
}

/// C9 — Risk Manager.
pub struct RiskManager {
    config: RiskConfig,
    inner: RwLock<Inner>,
}

impl RiskManager {
    pub fn new(config: RiskConfig, starting_equity: f64) -> Self {
        Self {
            config,
            inner: RwLock::new(Inner {
                current_date: Utc::now().date_naive(),
                daily_start: starting_equity,
                peak: starting_equity,
                last_max_drawdown: 0.0,
                cb: CircuitBreakerState::default(),
            }),
        }
    }

    fn maybe_reset_daily(&self, equity: f64) {
        let today = Utc::now().date_naive();
        let mut inner = self.inner.write();
        if inner.current_date != today {
            info!(prev = %inner.current_date, new = %today, "risk manager daily reset");
            inner.current_date = today;
            inner.daily_start = equity;
        }
    }

    /// Kelly-criterion fraction: raw Kelly `(b*p - q) / b`, scaled down by the
    /// configured safety factor `kelly.fraction` (default 0.25), clamped to
    /// `[min_size, max_size]` and zeroed out below `min_probability`.
    pub fn kelly_fraction(&self, win_probability: f64, win_loss_ratio: f64) -> f64 {
        if win_probability < self.config.kelly.min_probability {
            return 0.0;
        }
        let q = 1.0 - win_probability;
        let b = win_loss_ratio.max(1e-9);
        let raw = (b * win_probability - q) / b;
        let scaled = raw * self.config.kelly.fraction;
        scaled.clamp(self.config.kelly.min_size, self.config.kelly.max_size)
    }

    /// Kelly size further scaled by the correlation penalty and the active
    /// circuit breaker's size multiplier.
    pub fn correlation_aware_size(
        &self,
        win_probability: f64,
        win_loss_ratio: f64,
        strategy_ids: &[String],
        correlation: &CorrelationManager,
    ) -> f64 {
        let kelly = self.kelly_fraction(win_probability, win_loss_ratio);
        let corr_penalty = correlation.confidence_penalty(strategy_ids);
        let cb_multiplier = self.inner.read().cb.level.size_multiplier();
        kelly * corr_penalty * cb_multiplier
    }

    /// Update equity, recompute the day's drawdown (from the fixed daily
    /// start, never the intraday high) and advance the circuit breaker state
    /// machine. Returns the current level.
    pub fn update_equity(&self, equity: f64, now: i64) -> CircuitLevel {
        self.maybe_reset_daily(equity);
        let mut inner = self.inner.write();

        if equity > inner.peak {
            inner.peak = equity;
        }
        inner.last_max_drawdown = if inner.peak > 1e-9 { (equity - inner.peak) / inner.peak } else { 0.0 };

        let daily_dd = if inner.daily_start > 1e-9 {
            (equity - inner.daily_start) / inner.daily_start
        } else {
            0.0
        };

        // Cooldown: once RED, refuse to clear until it elapses, even if
        // equity has since recovered above the trigger thresholds.
        if inner.cb.level == CircuitLevel::Red {
            if let Some(until) = inner.cb.cooldown_until {
                if now < until {
                    return CircuitLevel::Red;
                }
            }
        }

        let new_level = if daily_dd <= self.config.circuit_breaker.level_3_drawdown {
            CircuitLevel::Red
        } else if daily_dd <= self.config.circuit_breaker.level_2_drawdown {
            CircuitLevel::Yellow2
        } else if daily_dd <= self.config.circuit_breaker.level_1_drawdown {
            CircuitLevel::Yellow1
        } else {
            CircuitLevel::Green
        };

        if new_level != inner.cb.level {
            warn!(from = %inner.cb.level, to = %new_level, daily_dd, "circuit breaker level change");
            inner.cb.history.push(CircuitBreakerTrigger { ts: now, level: new_level, daily_drawdown: daily_dd });
            inner.cb.level = new_level;
            inner.cb.triggered_at = Some(now);
            inner.cb.cooldown_until = if new_level == CircuitLevel::Red {
                Some(now + self.config.circuit_breaker.cooldown_minutes * 60)
            } else {
                None
            };
        }

        inner.cb.level
    }

    pub fn current_level(&self) -> CircuitLevel {
        self.inner.read().cb.level
    }

    /// All-time drawdown from the highest equity ever observed, tracked
    /// independently of the daily breaker anchor.
    pub fn max_drawdown(&self) -> f64 {
        self.inner.read().last_max_drawdown
    }

    pub fn state_snapshot(&self) -> CircuitBreakerState {
        self.inner.read().cb.clone()
    }

    /// A size request for a new entry is refused outright at RED.
    pub fn authorize_entry(&self, requested_size: f64) -> EngineResult<f64> {
        let level = self.current_level();
        if level == CircuitLevel::Red {
            return Err(EngineError::risk_refusal("circuit breaker RED: new entries refused"));
        }
        Ok(requested_size * level.size_multiplier())
    }

    /// Emergency action: halve every requested size, used when C5 reports a
    /// cascade at the Reduce50 severity.
    pub fn emergency_reduce_factor(&self) -> f64 {
        0.5
    }
}

impl CircuitLevel {
    pub fn size_multiplier(&self) -> f64 {
        match self {
            Self::Green => 1.0,
            Self::Yellow1 => 0.5,
            Self::Yellow2 => 0.25,
            Self::Red => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> RiskManager {
        RiskManager::new(RiskConfig::default(), 10_000.0)
    }

    #[test]
    fn kelly_zero_below_min_probability() {
        let mgr = manager();
        let k = mgr.kelly_fraction(0.3, 2.0);
        assert_eq!(k, 0.0);
    }

    #[test]
    fn kelly_clamped_to_max_size() {
        let mgr = manager();
        let k = mgr.kelly_fraction(0.9, 5.0);
        assert!(k <= mgr.config.kelly.max_size + 1e-9);
    }

    #[test]
    fn circuit_breaker_levels_are_distinct() {
        let mgr = manager();
        let l1 = mgr.update_equity(9_400.0, 1); // -6% -> YELLOW_1
        assert_eq!(l1, CircuitLevel::Yellow1);
        let l2 = mgr.update_equity(8_900.0, 2); // -11% -> YELLOW_2
        assert_eq!(l2, CircuitLevel::Yellow2);
        assert_ne!(l1, l2);
        assert_eq!(CircuitLevel::Yellow1.size_multiplier(), 0.5);
        assert_eq!(CircuitLevel::Yellow2.size_multiplier(), 0.25);
    }

    #[test]
    fn red_triggers_cooldown_and_refuses_entries() {
        let mgr = manager();
        mgr.update_equity(8_000.0, 1); // -20% -> RED
        assert_eq!(mgr.current_level(), CircuitLevel::Red);
        assert!(mgr.authorize_entry(1.0).is_err());
    }

    #[test]
    fn red_does_not_clear_before_cooldown_elapses() {
        let mgr = manager();
        mgr.update_equity(8_000.0, 0);
        assert_eq!(mgr.current_level(), CircuitLevel::Red);
        let level = mgr.update_equity(10_000.0, 10);
        assert_eq!(level, CircuitLevel::Red);
    }

    #[test]
    fn gain_then_giveback_still_trips_on_daily_start_not_peak() {
        let mgr = manager();
        mgr.update_equity(11_000.0, 0); // new intraday high; daily_start stays at 10,000
        assert_eq!(mgr.max_drawdown(), 0.0);
        let level = mgr.update_equity(8_000.0, 1); // -20% vs daily_start, far below the peak
        assert_eq!(level, CircuitLevel::Red);
        assert!(mgr.max_drawdown() < -0.25, "max drawdown from the 11,000 peak should also register");
    }

    #[test]
    fn green_allows_full_size() {
        let mgr = manager();
        let size = mgr.authorize_entry(1.0).unwrap();
        assert_eq!(size, 1.0);
    }
}
