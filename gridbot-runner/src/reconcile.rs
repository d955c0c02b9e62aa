//! `reconcile_missing` (§4.6.4): for each order the persisted snapshot
//! remembers but the exchange no longer reports open, decide its true fate.

use std::collections::HashMap;

use gridbot_core::alerts::AlertQueue;
use gridbot_core::error::RunnerError;
use gridbot_core::exchange::ExchangePort;
use gridbot_core::model::{Order, OrderStatus, Trade};
use gridbot_core::store::Store;
use gridbot_strategies::GridStrategy;
use rust_decimal::Decimal;

use crate::dedup::{event_key, has_ledger_key, DedupTracker};

pub async fn reconcile_missing(
    exchange: &dyn ExchangePort,
    symbol: &str,
    store: &Store,
    dedup: &mut DedupTracker,
    alerts: &AlertQueue,
    strategy: &mut dyn GridStrategy,
    open: Vec<Order>,
    persisted: &[Order],
) -> Result<Vec<Order>, RunnerError> {
    let open_ids: std::collections::HashSet<&str> = open.iter().map(|o| o.id.as_str()).collect();
    let mut still_open: Vec<Order> = Vec::new();
    let mut applied_trade = false;

    for missing in persisted.iter().filter(|o| !open_ids.contains(o.id.as_str())) {
        let query = match exchange.query_order(symbol, &missing.id).await {
            Ok(q) => q,
            Err(e) if e.is_order_not_found() || e.matches_code(-2013) => continue,
            Err(e) => {
                tracing::warn!(event = "reconcile_query_order_failed", order_id = %missing.id, error = %e);
                return Err(RunnerError::Transport(e));
            }
        };

        match query.order.status {
            OrderStatus::New | OrderStatus::PartiallyFilled => {
                let mut order = query.order.clone();
                order.qty = (order.qty - query.executed_qty).max(Decimal::ZERO);
                still_open.push(order);
            }
            OrderStatus::Filled => {
                let trade = synthesize_trade(&query.order, query.executed_qty, query.cumulative_quote_qty, query.update_time, OrderStatus::Filled);
                apply_reconciled_trade(store, dedup, strategy, trade).await?;
                applied_trade = true;
            }
            OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired if query.executed_qty > Decimal::ZERO => {
                let status = query.order.status;
                let trade = synthesize_trade(&query.order, query.executed_qty, query.cumulative_quote_qty, query.update_time, status);
                apply_reconciled_trade(store, dedup, strategy, trade).await?;
                applied_trade = true;
                alerts.important("order_closed_with_partial_fill", field("action", "auto_reconciled"));
            }
            OrderStatus::Canceled => {}
            OrderStatus::Rejected | OrderStatus::Expired => {
                alerts.important("order_rejected_or_expired", field("order_id", &missing.id));
            }
        }
    }

    let final_open = if applied_trade { exchange.open_orders(symbol).await.map_err(RunnerError::Transport)? } else { open };

    Ok(merge(final_open, still_open))
}

fn synthesize_trade(order: &Order, executed_qty: Decimal, cumulative_quote_qty: Decimal, update_time: i64, status: OrderStatus) -> Trade {
    let price = if executed_qty > Decimal::ZERO && cumulative_quote_qty > Decimal::ZERO {
        cumulative_quote_qty / executed_qty
    } else {
        order.price
    };
    Trade {
        order_id: order.id.clone(),
        trade_id: format!("reconcile-{}", order.id),
        symbol: order.symbol.clone(),
        side: order.side,
        price,
        qty: executed_qty,
        status,
        time: if update_time > 0 { update_time } else { now_millis() },
    }
}

async fn apply_reconciled_trade(
    store: &Store,
    dedup: &mut DedupTracker,
    strategy: &mut dyn GridStrategy,
    trade: Trade,
) -> Result<(), RunnerError> {
    let key = event_key(&trade);
    let ledger_eligible = has_ledger_key(&trade);
    if dedup.seen(&key, now_millis() / 1000) || (ledger_eligible && store.has_trade_ledger_key(&key)) {
        return Ok(());
    }
    let time = trade.time;
    strategy.on_fill(trade).await?;
    if ledger_eligible {
        store.record_trade_ledger_key(&key, time)?;
    }
    Ok(())
}

fn merge(open: Vec<Order>, still_open: Vec<Order>) -> Vec<Order> {
    let mut by_id: HashMap<String, Order> = open.into_iter().map(|o| (o.id.clone(), o)).collect();
    for o in still_open {
        by_id.entry(o.id.clone()).or_insert(o);
    }
    by_id.into_values().collect()
}

fn field(key: &str, value: &str) -> gridbot_core::model::AlertFields {
    let mut m = gridbot_core::model::AlertFields::new();
    m.insert(key.to_string(), value.to_string());
    m
}

fn now_millis() -> i64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}
