//! Abstract exchange port (C3): the only surface the strategy and runner
//! use to touch the outside world. Concrete implementations (a real
//! REST/WS client, a backtest simulator) live outside this crate.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::ExchangeError;
use crate::model::{Balances, Order, OrderQuery, Rules, Trade};

/// A lazily-consumed stream of user trade events. `next()` blocks until an
/// event arrives and returns an error on disconnect: the caller (the live
/// runner) treats that as a transport failure and reconnects.
#[async_trait]
pub trait UserStream: Send {
    async fn next(&mut self) -> Result<Trade, ExchangeError>;
}

/// Everything the strategy/runner need from an exchange, kept deliberately
/// narrow. The runner owns the concrete client; the strategy only ever
/// holds a `dyn ExchangePort` so strategy <-> exchange has no back-edge.
#[async_trait]
pub trait ExchangePort: Send + Sync {
    async fn get_rules(&self, symbol: &str) -> Result<Rules, ExchangeError>;

    async fn ticker_price(&self, symbol: &str) -> Result<Decimal, ExchangeError>;

    async fn balances(&self) -> Result<Balances, ExchangeError>;

    /// Orders belonging to this instance (filtered by client-id prefix).
    async fn open_orders(&self, symbol: &str) -> Result<Vec<Order>, ExchangeError>;

    async fn place_order(&self, order: Order) -> Result<Order, ExchangeError>;

    /// `OrderNotFound` is treated by callers as idempotent success.
    async fn cancel_order(&self, symbol: &str, id: &str) -> Result<(), ExchangeError>;

    async fn query_order(&self, symbol: &str, id: &str) -> Result<OrderQuery, ExchangeError>;

    async fn user_stream(&self, symbol: &str) -> Result<Box<dyn UserStream>, ExchangeError>;
}

/// Generates `"<prefix>-<ts36>-<seq36>"` client ids and owns the per-process
/// monotonic sequence (§9: one client per process is the contract, so the
/// counter lives on the client instance, never as global state).
pub struct ClientIdGenerator {
    prefix: String,
    seq: std::sync::atomic::AtomicU64,
}

const MAX_CLIENT_ID_LEN: usize = 36;

impl ClientIdGenerator {
    pub fn new(instance_id: &str) -> Self {
        let sanitized: String = instance_id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        // Leave room for "-<ts36>-<seq36>" (roughly 8 + 1 + 11 + 1 chars).
        let prefix = sanitized.chars().take(MAX_CLIENT_ID_LEN - 20).collect();
        Self { prefix, seq: std::sync::atomic::AtomicU64::new(0) }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn next_client_id(&self, now_nanos: u128) -> String {
        let seq = self.seq.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let ts36 = to_base36(now_nanos);
        let seq36 = to_base36(seq as u128);
        let id = format!("{}-{}-{}", self.prefix, ts36, seq36);
        id.chars().take(MAX_CLIENT_ID_LEN).collect()
    }

    /// True if `client_id` belongs to this instance: exact prefix match or
    /// `prefix-` as a leading segment.
    pub fn owns(&self, client_id: &str) -> bool {
        client_id == self.prefix || client_id.starts_with(&format!("{}-", self.prefix))
    }
}

fn to_base36(mut n: u128) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::new();
    while n > 0 {
        buf.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    buf.reverse();
    String::from_utf8(buf).unwrap()
}
