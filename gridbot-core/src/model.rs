//! Shared data model: orders, trades, rules, grid state and runtime status.
//!
//! Every persisted type here round-trips through `serde_json` untouched:
//! the store writes these structs directly, field names are the wire
//! format.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }
}

/// Internal order representation (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub client_id: Option<String>,
    pub symbol: String,
    pub side: Side,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub price: Decimal,
    pub qty: Decimal,
    pub status: OrderStatus,
    pub created_at: i64,
    /// Signed; 0 is anchor, positive = sell above, negative = buy below.
    pub grid_index: i32,
}

/// Execution report delivered by the user-trade stream or synthesized
/// during reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub order_id: String,
    pub trade_id: String,
    pub symbol: String,
    pub side: Side,
    pub price: Decimal,
    pub qty: Decimal,
    pub status: OrderStatus,
    /// Monotonic, non-zero.
    pub time: i64,
}

/// Symbol trading constraints. A zero field disables the corresponding check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rules {
    pub min_qty: Decimal,
    pub min_notional: Decimal,
    pub price_tick: Decimal,
    pub qty_step: Decimal,
}

/// Persisted grid snapshot (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridState {
    pub anchor: Decimal,
    pub ratio: Decimal,
    pub sell_ratio: Decimal,
    pub base_ratio: Decimal,
    pub ratio_step: Decimal,
    pub levels: i32,
    pub shift_levels: i32,
    pub min_level: i32,
    pub max_level: i32,
    pub qty: Decimal,
    pub min_qty_multiple: Decimal,
    pub initialized: bool,
    pub stopped: bool,
    pub stop_price: Decimal,
    pub last_down_shift_price: Option<Decimal>,
    pub last_down_shift_at: Option<i64>,
    pub snapshot_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrdersSnapshot {
    pub snapshot_id: String,
    pub orders: Vec<Order>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Backtest,
    Testnet,
    Live,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Starting,
    Running,
    Degraded,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeStatus {
    pub mode: RunMode,
    pub symbol: String,
    pub instance_id: String,
    pub pid: u32,
    pub state: RunState,
    pub started_at: i64,
    pub updated_at: i64,
    pub last_error: Option<String>,
    pub reconnect_attempts: u32,
    pub disconnected_at: Option<i64>,
}

/// Balances returned by the exchange port.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Balances {
    pub base: Decimal,
    pub quote: Decimal,
}

/// Result of `query_order`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderQuery {
    pub order: Order,
    pub executed_qty: Decimal,
    pub cumulative_quote_qty: Decimal,
    pub update_time: i64,
}

/// Arbitrary extra fields carried by an alert event.
pub type AlertFields = HashMap<String, String>;
