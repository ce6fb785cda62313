// =============================================================================
// Error taxonomy — closed set of kinds every component boundary converts into
// =============================================================================
//
// Components do I/O with `anyhow::Result` + `.context()` (venue calls, state
// store access) and convert into one of these variants before the error
// crosses the component boundary, so the orchestrator always matches on a
// closed enum rather than inspecting error strings or backend-specific types.
// =============================================================================

use thiserror::Error;

/// One of the seven error kinds the engine distinguishes. Each kind has a
/// prescribed handling policy; see the orchestrator for where each is caught.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("transient I/O failure in {component}: {source}")]
    TransientIo {
        component: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("validation rejected {item}: {reason}")]
    Validation { item: String, reason: String },

    #[error("strategy '{strategy_id}' faulted: {source}")]
    StrategyFault {
        strategy_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("execution failed for {symbol}: {reason}")]
    ExecutionFailure { symbol: String, reason: String },

    #[error("risk manager refused trade: {reason}")]
    RiskRefusal { reason: String },

    #[error("persistence failure: {reason}")]
    Persistence { reason: String },

    #[error("fatal initialisation error: {reason}")]
    FatalInit { reason: String },
}

impl EngineError {
    pub fn transient_io(component: impl Into<String>, source: anyhow::Error) -> Self {
        Self::TransientIo {
            component: component.into(),
            source,
        }
    }

    pub fn validation(item: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            item: item.into(),
            reason: reason.into(),
        }
    }

    pub fn strategy_fault(strategy_id: impl Into<String>, source: anyhow::Error) -> Self {
        Self::StrategyFault {
            strategy_id: strategy_id.into(),
            source,
        }
    }

    pub fn execution_failure(symbol: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ExecutionFailure {
            symbol: symbol.into(),
            reason: reason.into(),
        }
    }

    pub fn risk_refusal(reason: impl Into<String>) -> Self {
        Self::RiskRefusal {
            reason: reason.into(),
        }
    }

    pub fn persistence(reason: impl Into<String>) -> Self {
        Self::Persistence {
            reason: reason.into(),
        }
    }

    pub fn fatal_init(reason: impl Into<String>) -> Self {
        Self::FatalInit {
            reason: reason.into(),
        }
    }

    /// Exit code for `main` per the CLI surface: fatal init errors exit 1,
    /// a degraded-state refusal exits 2, everything else is handled in-tick
    /// and never reaches `main`.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::FatalInit { .. } => 1,
            Self::Persistence { .. } => 2,
            _ => 1,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
