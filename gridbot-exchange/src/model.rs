//! Binance spot REST/WS wire shapes (§10.6). Only the fields this client
//! actually reads are modeled; everything else is ignored by serde.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    pub code: i64,
    pub msg: String,
}

#[derive(Debug, Deserialize)]
pub struct ExchangeInfoResponse {
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    #[serde(rename = "baseAsset")]
    pub base_asset: String,
    #[serde(rename = "quoteAsset")]
    pub quote_asset: String,
    pub filters: Vec<SymbolFilter>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "filterType")]
pub enum SymbolFilter {
    #[serde(rename = "PRICE_FILTER")]
    PriceFilter {
        #[serde(rename = "tickSize")]
        tick_size: String,
    },
    #[serde(rename = "LOT_SIZE")]
    LotSize {
        #[serde(rename = "stepSize")]
        step_size: String,
        #[serde(rename = "minQty")]
        min_qty: String,
    },
    #[serde(rename = "MIN_NOTIONAL")]
    MinNotional {
        #[serde(rename = "minNotional", default)]
        min_notional: Option<String>,
    },
    #[serde(rename = "NOTIONAL")]
    Notional {
        #[serde(rename = "minNotional", default)]
        min_notional: Option<String>,
    },
    /// Catch-all for filter kinds this client doesn't need.
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct TickerPriceResponse {
    pub price: String,
}

#[derive(Debug, Deserialize)]
pub struct AccountResponse {
    pub balances: Vec<BalanceEntry>,
}

#[derive(Debug, Deserialize)]
pub struct BalanceEntry {
    pub asset: String,
    pub free: String,
    pub locked: String,
}

/// Shared shape of `POST /order`, `GET /order`, `GET /openOrders` responses.
#[derive(Debug, Deserialize)]
pub struct OrderResponse {
    pub symbol: String,
    #[serde(rename = "orderId")]
    pub order_id: i64,
    #[serde(rename = "clientOrderId", default)]
    pub client_order_id: String,
    pub side: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub price: String,
    #[serde(rename = "origQty")]
    pub orig_qty: String,
    #[serde(rename = "executedQty", default)]
    pub executed_qty: String,
    #[serde(rename = "cummulativeQuoteQty", default)]
    pub cumulative_quote_qty: String,
    pub status: String,
    #[serde(default)]
    pub time: i64,
    #[serde(rename = "updateTime", default)]
    pub update_time: i64,
}

#[derive(Debug, Deserialize)]
pub struct ListenKeyResponse {
    #[serde(rename = "listenKey")]
    pub listen_key: String,
}

/// The subset of the user-data-stream `executionReport` event this client
/// turns into a [`gridbot_core::model::Trade`].
#[derive(Debug, Deserialize)]
pub struct ExecutionReport {
    #[serde(rename = "e")]
    pub event_type: String,
    #[serde(rename = "i")]
    pub order_id: i64,
    #[serde(rename = "t")]
    pub trade_id: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "S")]
    pub side: String,
    #[serde(rename = "L")]
    pub last_fill_price: String,
    #[serde(rename = "l")]
    pub last_fill_qty: String,
    #[serde(rename = "z")]
    pub cumulative_filled_qty: String,
    #[serde(rename = "X")]
    pub order_status: String,
    #[serde(rename = "T")]
    pub transaction_time: i64,
}
