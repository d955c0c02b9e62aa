//! `BinanceSpotClient` (§10.6): a thin `ExchangePort` implementation against
//! Binance-spot-style REST/WS semantics. Scoped to one symbol, matching the
//! single-instrument bot it serves.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use gridbot_core::error::ExchangeError;
use gridbot_core::exchange::{ClientIdGenerator, ExchangePort, UserStream};
use gridbot_core::model::{Balances, Order, OrderQuery, OrderStatus, OrderType, Rules, Side};
use reqwest::{Method, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;

use crate::model::{AccountResponse, ErrorResponse, ExchangeInfoResponse, ListenKeyResponse, OrderResponse, SymbolFilter, TickerPriceResponse};
use crate::signing::sign;
use crate::ws::{spawn_keepalive, BinanceUserStream};

const RECV_WINDOW_MS: u64 = 5_000;
const LISTEN_KEY_KEEPALIVE: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, thiserror::Error)]
pub enum ClientBuildError {
    #[error("http client build failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("exchange: {0}")]
    Exchange(#[from] ExchangeError),
}

pub struct BinanceSpotClient {
    http: reqwest::Client,
    base_url: String,
    ws_url: String,
    api_key: Option<String>,
    api_secret: Option<String>,
    symbol: String,
    base_asset: String,
    quote_asset: String,
    rules: Rules,
    client_ids: ClientIdGenerator,
}

impl BinanceSpotClient {
    /// Connects once to discover the symbol's trading rules and asset
    /// split, then caches them for the life of the client.
    pub async fn new(
        symbol: String,
        base_url: String,
        ws_url: String,
        api_key: Option<String>,
        api_secret: Option<String>,
        instance_id: String,
        timeout: Duration,
        _keepalive: Duration,
    ) -> Result<Self, ClientBuildError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = base_url.trim_end_matches('/').to_string();
        let ws_url = ws_url.trim_end_matches('/').to_string();

        let url = format!("{base_url}/api/v3/exchangeInfo?symbol={symbol}");
        let info: ExchangeInfoResponse = get_public(&http, &url).await?;
        let sym = info
            .symbols
            .into_iter()
            .find(|s| s.symbol == symbol)
            .ok_or_else(|| ExchangeError::Transport(format!("symbol {symbol} not found in exchangeInfo")))?;
        let rules = rules_from_filters(&sym.filters);

        Ok(Self {
            http,
            base_url,
            ws_url,
            api_key,
            api_secret,
            symbol,
            base_asset: sym.base_asset,
            quote_asset: sym.quote_asset,
            rules,
            client_ids: ClientIdGenerator::new(&instance_id),
        })
    }

    fn require_credentials(&self) -> Result<(&str, &str), ExchangeError> {
        match (&self.api_key, &self.api_secret) {
            (Some(k), Some(s)) => Ok((k.as_str(), s.as_str())),
            _ => Err(ExchangeError::Transport("no api credentials configured".to_string())),
        }
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
    }

    async fn signed_request<T: DeserializeOwned>(&self, method: Method, path: &str, mut query: Vec<(String, String)>) -> Result<T, ExchangeError> {
        let (key, secret) = self.require_credentials()?;
        query.push(("timestamp".to_string(), Self::timestamp_ms().to_string()));
        query.push(("recvWindow".to_string(), RECV_WINDOW_MS.to_string()));
        let qs = query.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("&");
        let signature = sign(secret, &qs);
        let url = format!("{}{}?{}&signature={}", self.base_url, path, qs, signature);

        let resp = self
            .http
            .request(method, &url)
            .header("X-MBX-APIKEY", key)
            .send()
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;
        parse_response(resp).await
    }

    fn order_qty_of(order: &Order) -> String {
        order.qty.normalize().to_string()
    }

    /// Duplicate-order fallback (§4.3): queries the order the exchange
    /// already holds for `client_id` and returns it as if it had just
    /// been placed, enabling idempotent place retries.
    async fn query_order_by_client_id(&self, symbol: &str, client_id: &str) -> Result<OrderResponse, ExchangeError> {
        let query = vec![("symbol".to_string(), symbol.to_string()), ("origClientOrderId".to_string(), client_id.to_string())];
        self.signed_request(Method::GET, "/api/v3/order", query).await
    }
}

async fn get_public<T: DeserializeOwned>(http: &reqwest::Client, url: &str) -> Result<T, ExchangeError> {
    let resp = http.get(url).send().await.map_err(|e| ExchangeError::Transport(e.to_string()))?;
    parse_response(resp).await
}

async fn parse_response<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ExchangeError> {
    let status = resp.status();
    let body = resp.text().await.map_err(|e| ExchangeError::Transport(e.to_string()))?;
    if status.is_success() {
        serde_json::from_str(&body).map_err(|e| ExchangeError::Transport(format!("decode error: {e} body={body}")))
    } else {
        Err(classify_error(status, &body))
    }
}

fn classify_error(status: StatusCode, body: &str) -> ExchangeError {
    if let Ok(err) = serde_json::from_str::<ErrorResponse>(body) {
        match err.code {
            -2013 => return ExchangeError::OrderNotFound,
            -2010 => return ExchangeError::InsufficientBalance,
            -2011 => return ExchangeError::OrderRejected { reason: err.msg },
            -2022 => return ExchangeError::DuplicateOrder { client_id: None },
            _ => return ExchangeError::Transport(format!("exchange error {} ({}): {}", err.code, status, err.msg)),
        }
    }
    ExchangeError::Transport(format!("http {status}: {body}"))
}

fn rules_from_filters(filters: &[SymbolFilter]) -> Rules {
    let mut rules = Rules { min_qty: Decimal::ZERO, min_notional: Decimal::ZERO, price_tick: Decimal::ZERO, qty_step: Decimal::ZERO };
    for f in filters {
        match f {
            SymbolFilter::PriceFilter { tick_size } => rules.price_tick = tick_size.parse().unwrap_or(Decimal::ZERO),
            SymbolFilter::LotSize { step_size, min_qty } => {
                rules.qty_step = step_size.parse().unwrap_or(Decimal::ZERO);
                rules.min_qty = min_qty.parse().unwrap_or(Decimal::ZERO);
            }
            SymbolFilter::MinNotional { min_notional } | SymbolFilter::Notional { min_notional } => {
                if let Some(v) = min_notional {
                    rules.min_notional = v.parse().unwrap_or(Decimal::ZERO);
                }
            }
            SymbolFilter::Other => {}
        }
    }
    rules
}

fn order_from_response(resp: OrderResponse) -> Order {
    Order {
        id: resp.order_id.to_string(),
        client_id: if resp.client_order_id.is_empty() { None } else { Some(resp.client_order_id) },
        symbol: resp.symbol,
        side: if resp.side == "BUY" { Side::Buy } else { Side::Sell },
        order_type: if resp.order_type == "MARKET" { OrderType::Market } else { OrderType::Limit },
        price: resp.price.parse().unwrap_or(Decimal::ZERO),
        qty: (resp.orig_qty.parse::<Decimal>().unwrap_or(Decimal::ZERO) - resp.executed_qty.parse::<Decimal>().unwrap_or(Decimal::ZERO)).max(Decimal::ZERO),
        status: status_from_str(&resp.status),
        created_at: if resp.time > 0 { resp.time } else { resp.update_time },
        grid_index: 0,
    }
}

fn status_from_str(s: &str) -> OrderStatus {
    match s {
        "NEW" => OrderStatus::New,
        "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
        "FILLED" => OrderStatus::Filled,
        "CANCELED" | "PENDING_CANCEL" => OrderStatus::Canceled,
        "REJECTED" => OrderStatus::Rejected,
        "EXPIRED" => OrderStatus::Expired,
        _ => OrderStatus::New,
    }
}

#[async_trait]
impl ExchangePort for BinanceSpotClient {
    async fn get_rules(&self, _symbol: &str) -> Result<Rules, ExchangeError> {
        Ok(self.rules)
    }

    async fn ticker_price(&self, _symbol: &str) -> Result<Decimal, ExchangeError> {
        let url = format!("{}/api/v3/ticker/price?symbol={}", self.base_url, self.symbol);
        let resp: TickerPriceResponse = get_public(&self.http, &url).await?;
        resp.price.parse().map_err(|_| ExchangeError::Transport("bad ticker price".to_string()))
    }

    async fn balances(&self) -> Result<Balances, ExchangeError> {
        let resp: AccountResponse = self.signed_request(Method::GET, "/api/v3/account", vec![]).await?;
        let mut base = Decimal::ZERO;
        let mut quote = Decimal::ZERO;
        for b in resp.balances {
            if b.asset == self.base_asset {
                base = b.free.parse().unwrap_or(Decimal::ZERO) + b.locked.parse().unwrap_or(Decimal::ZERO);
            } else if b.asset == self.quote_asset {
                quote = b.free.parse().unwrap_or(Decimal::ZERO) + b.locked.parse().unwrap_or(Decimal::ZERO);
            }
        }
        Ok(Balances { base, quote })
    }

    async fn open_orders(&self, symbol: &str) -> Result<Vec<Order>, ExchangeError> {
        let resp: Vec<OrderResponse> = self
            .signed_request(Method::GET, "/api/v3/openOrders", vec![("symbol".to_string(), symbol.to_string())])
            .await?;
        Ok(resp
            .into_iter()
            .map(order_from_response)
            .filter(|o| o.client_id.as_deref().map(|c| self.client_ids.owns(c)).unwrap_or(false))
            .collect())
    }

    async fn place_order(&self, order: Order) -> Result<Order, ExchangeError> {
        let client_id = self.client_ids.next_client_id(SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos());
        let mut query = vec![
            ("symbol".to_string(), order.symbol.clone()),
            ("side".to_string(), if order.side == Side::Buy { "BUY" } else { "SELL" }.to_string()),
            ("type".to_string(), if order.order_type == OrderType::Market { "MARKET" } else { "LIMIT" }.to_string()),
            ("quantity".to_string(), Self::order_qty_of(&order)),
            ("newClientOrderId".to_string(), client_id.clone()),
        ];
        if order.order_type == OrderType::Limit {
            query.push(("timeInForce".to_string(), "GTC".to_string()));
            query.push(("price".to_string(), order.price.normalize().to_string()));
        }
        let resp = match self.signed_request::<OrderResponse>(Method::POST, "/api/v3/order", query).await {
            Ok(resp) => resp,
            Err(ExchangeError::DuplicateOrder { .. }) => self.query_order_by_client_id(&order.symbol, &client_id).await?,
            Err(e) => return Err(e),
        };
        let mut placed = order_from_response(resp);
        placed.grid_index = order.grid_index;
        Ok(placed)
    }

    async fn cancel_order(&self, symbol: &str, id: &str) -> Result<(), ExchangeError> {
        let query = vec![("symbol".to_string(), symbol.to_string()), ("orderId".to_string(), id.to_string())];
        let _resp: OrderResponse = self.signed_request(Method::DELETE, "/api/v3/order", query).await?;
        Ok(())
    }

    async fn query_order(&self, symbol: &str, id: &str) -> Result<OrderQuery, ExchangeError> {
        let query = vec![("symbol".to_string(), symbol.to_string()), ("orderId".to_string(), id.to_string())];
        let resp: OrderResponse = self.signed_request(Method::GET, "/api/v3/order", query).await?;
        let executed_qty: Decimal = resp.executed_qty.parse().unwrap_or(Decimal::ZERO);
        let cumulative_quote_qty: Decimal = resp.cumulative_quote_qty.parse().unwrap_or(Decimal::ZERO);
        let update_time = resp.update_time;
        let order = order_from_response(resp);
        Ok(OrderQuery { order, executed_qty, cumulative_quote_qty, update_time })
    }

    async fn user_stream(&self, _symbol: &str) -> Result<Box<dyn UserStream>, ExchangeError> {
        let (key, _secret) = self.require_credentials()?;
        let url = format!("{}/api/v3/userDataStream", self.base_url);
        let resp = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", key)
            .send()
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;
        let listen_key: ListenKeyResponse = parse_response(resp).await?;

        let ws_url = format!("{}/ws/{}", self.ws_url, listen_key.listen_key);
        let (ws, _) = tokio_tungstenite::connect_async(&ws_url).await.map_err(|e| ExchangeError::Transport(e.to_string()))?;

        let keepalive = spawn_keepalive(self.http.clone(), self.base_url.clone(), listen_key.listen_key, LISTEN_KEY_KEEPALIVE);
        Ok(Box::new(BinanceUserStream::new(ws, keepalive)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SymbolFilter;

    #[test]
    fn rules_from_filters_picks_up_each_kind() {
        let filters = vec![
            SymbolFilter::PriceFilter { tick_size: "0.01".to_string() },
            SymbolFilter::LotSize { step_size: "0.001".to_string(), min_qty: "0.001".to_string() },
            SymbolFilter::MinNotional { min_notional: Some("10".to_string()) },
        ];
        let rules = rules_from_filters(&filters);
        assert_eq!(rules.price_tick, "0.01".parse().unwrap());
        assert_eq!(rules.qty_step, "0.001".parse().unwrap());
        assert_eq!(rules.min_notional, "10".parse::<Decimal>().unwrap());
    }

    #[test]
    fn classifies_known_error_codes() {
        let body = r#"{"code": -2013, "msg": "Order does not exist."}"#;
        assert!(matches!(classify_error(StatusCode::BAD_REQUEST, body), ExchangeError::OrderNotFound));
        let body = r#"{"code": -2010, "msg": "Account has insufficient balance."}"#;
        assert!(matches!(classify_error(StatusCode::BAD_REQUEST, body), ExchangeError::InsufficientBalance));
        let body = r#"{"code": -2022, "msg": "Duplicate order sent."}"#;
        assert!(matches!(classify_error(StatusCode::BAD_REQUEST, body), ExchangeError::DuplicateOrder { .. }));
    }
}
