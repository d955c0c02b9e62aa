//! User-data-stream consumer (§10.6): one `executionReport` event per fill,
//! turned into the core [`Trade`] shape `UserStream::next` hands to the runner.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use gridbot_core::error::ExchangeError;
use gridbot_core::model::{OrderStatus, Side, Trade};
use rust_decimal::Decimal;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::MaybeTlsStream;

use crate::model::ExecutionReport;

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub struct BinanceUserStream {
    ws: WsStream,
    keepalive: tokio::task::JoinHandle<()>,
}

impl BinanceUserStream {
    pub(crate) fn new(ws: WsStream, keepalive: tokio::task::JoinHandle<()>) -> Self {
        Self { ws, keepalive }
    }
}

impl Drop for BinanceUserStream {
    fn drop(&mut self) {
        self.keepalive.abort();
    }
}

#[async_trait]
impl gridbot_core::exchange::UserStream for BinanceUserStream {
    async fn next(&mut self) -> Result<Trade, ExchangeError> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    if let Some(trade) = parse_execution_report(&text)? {
                        return Ok(trade);
                    }
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_))) => continue,
                Some(Ok(Message::Close(frame))) => {
                    return Err(ExchangeError::Transport(format!("user stream closed: {frame:?}")));
                }
                Some(Err(e)) => return Err(ExchangeError::Transport(e.to_string())),
                None => return Err(ExchangeError::Transport("user stream ended".to_string())),
            }
        }
    }
}

/// Spawns the PUT `/api/v3/userDataStream` keepalive ping on an interval.
pub(crate) fn spawn_keepalive(http: reqwest::Client, base_url: String, listen_key: String, period: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await; // first tick fires immediately; skip it
        loop {
            ticker.tick().await;
            let url = format!("{base_url}/api/v3/userDataStream?listenKey={listen_key}");
            if let Err(e) = http.put(&url).send().await {
                tracing::warn!(event = "user_data_stream_keepalive_failed", error = %e);
            }
        }
    })
}

fn parse_execution_report(text: &str) -> Result<Option<Trade>, ExchangeError> {
    let report: ExecutionReport = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(_) => return Ok(None), // not an executionReport (e.g. outboundAccountPosition)
    };
    if report.event_type != "executionReport" {
        return Ok(None);
    }
    let fill_qty: Decimal = report.last_fill_qty.parse().unwrap_or(Decimal::ZERO);
    if fill_qty <= Decimal::ZERO {
        return Ok(None);
    }
    let side = match report.side.as_str() {
        "BUY" => Side::Buy,
        _ => Side::Sell,
    };
    let status = map_status(&report.order_status);
    let price: Decimal = report.last_fill_price.parse().map_err(|_| ExchangeError::Transport("bad fill price".into()))?;
    Ok(Some(Trade {
        order_id: report.order_id.to_string(),
        trade_id: report.trade_id.to_string(),
        symbol: report.symbol,
        side,
        price,
        qty: fill_qty,
        status,
        time: report.transaction_time,
    }))
}

fn map_status(status: &str) -> OrderStatus {
    match status {
        "NEW" => OrderStatus::New,
        "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
        "FILLED" => OrderStatus::Filled,
        "CANCELED" | "PENDING_CANCEL" => OrderStatus::Canceled,
        "REJECTED" => OrderStatus::Rejected,
        "EXPIRED" => OrderStatus::Expired,
        _ => OrderStatus::New,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fill_execution_report() {
        let text = r#"{
            "e": "executionReport", "i": 123, "t": 456, "s": "BTCUSDT",
            "S": "BUY", "L": "100.5", "l": "0.01", "z": "0.01",
            "X": "FILLED", "T": 1700000000000
        }"#;
        let trade = parse_execution_report(text).unwrap().unwrap();
        assert_eq!(trade.order_id, "123");
        assert_eq!(trade.trade_id, "456");
        assert_eq!(trade.side, Side::Buy);
        assert_eq!(trade.status, OrderStatus::Filled);
    }

    #[test]
    fn ignores_zero_qty_new_report() {
        let text = r#"{
            "e": "executionReport", "i": 123, "t": 0, "s": "BTCUSDT",
            "S": "BUY", "L": "0", "l": "0", "z": "0",
            "X": "NEW", "T": 1700000000000
        }"#;
        assert!(parse_execution_report(text).unwrap().is_none());
    }

    #[test]
    fn ignores_non_execution_report_events() {
        let text = r#"{"e": "outboundAccountPosition"}"#;
        assert!(parse_execution_report(text).unwrap().is_none());
    }
}
