//! gridbot-core: the engineering core of a single-instrument geometric
//! grid trading bot for a spot exchange.
//!
//! ## Modules
//! - `model`: shared data types (Order, Trade, Rules, GridState, ...)
//! - `rules`: decimal rounding and order normalization (C1)
//! - `store`: crash-safe snapshots, trade ledger, instance lock (C2)
//! - `exchange`: the abstract exchange port the strategy/runner consume (C3)
//! - `circuit_breaker`: the three-circuit breaker (C4)
//! - `backoff`: exponential backoff for the reconnect loop
//! - `alerts`: bounded async alert queue (C7)
//! - `error`: shared error taxonomy

pub mod alerts;
pub mod backoff;
pub mod circuit_breaker;
pub mod error;
pub mod exchange;
pub mod model;
pub mod rules;
pub mod store;

pub use anyhow::{Error, Result};

pub mod prelude {
    pub use crate::alerts::{AlertEvent, AlertQueue, LogNotifier, Notifier};
    pub use crate::circuit_breaker::{Action, CircuitBreakerConfig, CircuitBreakers, CircuitState};
    pub use crate::error::{CircuitOpenError, ExchangeError, RunnerError, StoreError, StrategyError};
    pub use crate::exchange::{ClientIdGenerator, ExchangePort, UserStream};
    pub use crate::model::*;
    pub use crate::rules::{ceil_to_step, floor_to_step, normalize_order};
    pub use crate::store::{InstanceLock, LockOptions, Store};
    pub use crate::{Error, Result};
}
