//! Error taxonomy shared by the store, exchange port, circuit breaker and strategy.
//!
//! The runner classifies every error it sees against the five classes the
//! design calls for: Validation, Transport, Exchange-semantic, Local-state
//! (`FatalLocal`), and `Stopped`. Modeling them as explicit variants lets the
//! supervisory loop `match` on behavior instead of inspecting strings.

use thiserror::Error;

/// Errors the exchange port returns, classified per the external-interface
/// contract (§4.3/§6): idle transport failures vs. typed exchange semantics.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("insufficient balance")]
    InsufficientBalance,

    #[error("duplicate order (client_id={client_id:?})")]
    DuplicateOrder { client_id: Option<String> },

    #[error("order not found")]
    OrderNotFound,

    #[error("order rejected: {reason}")]
    OrderRejected { reason: String },

    #[error("order expired")]
    OrderExpired,

    #[error("transport error: {0}")]
    Transport(String),
}

impl ExchangeError {
    /// Binance-style numeric error codes surface through this predicate so
    /// callers can match on code without string-parsing the message.
    pub fn matches_code(&self, code: i64) -> bool {
        matches!((self, code), (ExchangeError::OrderNotFound, -2013))
    }

    pub fn is_order_not_found(&self) -> bool {
        matches!(self, ExchangeError::OrderNotFound)
    }
}

/// Raised by [`crate::circuit_breaker::CircuitBreakers`] when a circuit is
/// (or just became) open. Shared between `StrategyError` and `RunnerError`
/// so either layer can match on it without one owning the other.
#[derive(Debug, Error, Clone)]
#[error("circuit open: action={action} failures={failures} last_error={last_error}")]
pub struct CircuitOpenError {
    pub action: &'static str,
    pub failures: u32,
    pub last_error: String,
}

/// Errors the store returns. Any non-transient store failure is local-state
/// fatal: it does not trip the reconnect breaker, it stops the runner.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("instance lock already held")]
    InstanceLockExists,

    #[error("instance lock owner process is still running")]
    OwnerProcessRunning,

    #[error("instance lock is not stale yet")]
    LockNotStale,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Errors the `SpotDual` strategy itself can raise.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("invalid order: {0}")]
    InvalidOrder(String),

    #[error("strategy already initialized")]
    AlreadyInitialized,

    #[error("strategy is stopped")]
    Stopped,

    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),
}

impl StrategyError {
    pub fn is_stopped(&self) -> bool {
        matches!(self, StrategyError::Stopped)
    }
}

/// Top-level runner error, the union the supervisory loop matches on.
///
/// `FatalLocal` wraps any error whose root cause is local (store/ledger
/// write failure, a strategy invariant violation): these never trip the
/// reconnect breaker, they stop the process and ask for human attention.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("transport error: {0}")]
    Transport(#[from] ExchangeError),

    #[error("fatal local error: {0}")]
    FatalLocal(String),

    #[error("manual intervention required: {reason}")]
    ManualIntervention { reason: String },

    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    #[error("cancelled")]
    Cancelled,

    #[error("stopped")]
    Stopped,
}

impl From<StoreError> for RunnerError {
    fn from(e: StoreError) -> Self {
        RunnerError::FatalLocal(e.to_string())
    }
}

impl From<StrategyError> for RunnerError {
    fn from(e: StrategyError) -> Self {
        match e {
            StrategyError::Stopped => RunnerError::Stopped,
            StrategyError::Exchange(ex) => RunnerError::Transport(ex),
            StrategyError::Store(se) => RunnerError::FatalLocal(se.to_string()),
            StrategyError::CircuitOpen(co) => RunnerError::CircuitOpen(co),
            other => RunnerError::FatalLocal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchange_error_code_predicate() {
        let e = ExchangeError::OrderNotFound;
        assert!(e.matches_code(-2013));
        assert!(!ExchangeError::OrderExpired.matches_code(-2013));
    }

    #[test]
    fn strategy_stopped_maps_to_runner_stopped() {
        let e: RunnerError = StrategyError::Stopped.into();
        assert!(matches!(e, RunnerError::Stopped));
    }

    #[test]
    fn store_error_maps_to_fatal_local() {
        let e: RunnerError = StoreError::LockNotStale.into();
        assert!(matches!(e, RunnerError::FatalLocal(_)));
    }
}
