//! In-memory trade dedup tracker (§4.6.3): advisory LRU+TTL layer in front
//! of the persistent ledger, which is the authority across restarts.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use gridbot_core::model::Trade;

pub const DEFAULT_MAX_ENTRIES: usize = 10_000;
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// `"order:<id>|trade:<tid>"` when `trade_id` is present, otherwise the
/// fallback composite `order_id|time-rfc3339nano|price|qty` (§4.6.2 step 6).
pub fn event_key(trade: &Trade) -> String {
    if trade.trade_id.is_empty() {
        let time = DateTime::<Utc>::from_timestamp_millis(trade.time).unwrap_or_default();
        format!("{}|{}|{}|{}", trade.order_id, time.to_rfc3339_opts(SecondsFormat::Nanos, true), trade.price, trade.qty)
    } else {
        format!("order:{}|trade:{}", trade.order_id, trade.trade_id)
    }
}

/// The persistent ledger requires both ids (§4.6.2 step 6); a fallback
/// composite key is advisory-only and never written to or checked against it.
pub fn has_ledger_key(trade: &Trade) -> bool {
    !trade.trade_id.is_empty()
}

pub struct DedupTracker {
    max_entries: usize,
    ttl_secs: i64,
    seen: HashMap<String, i64>,
    order: VecDeque<String>,
}

impl DedupTracker {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self { max_entries, ttl_secs: ttl.as_secs() as i64, seen: HashMap::new(), order: VecDeque::new() }
    }

    /// `now` is a unix-seconds timestamp. Returns `true` if `key` had
    /// already been recorded; otherwise records it and returns `false`.
    /// Pruning runs inline on every call so work stays bounded.
    pub fn seen(&mut self, key: &str, now: i64) -> bool {
        if self.seen.contains_key(key) {
            return true;
        }
        self.seen.insert(key.to_string(), now);
        self.order.push_back(key.to_string());
        self.prune(now);
        false
    }

    fn prune(&mut self, now: i64) {
        while let Some(front) = self.order.front() {
            let stale_by_age = self
                .seen
                .get(front)
                .map(|&ts| now.saturating_sub(ts) >= self.ttl_secs)
                .unwrap_or(true);
            let over_capacity = self.order.len() > self.max_entries;
            if stale_by_age || over_capacity {
                let front = self.order.pop_front().unwrap();
                // a front entry whose timestamp no longer matches what's in
                // `seen` (already removed by a previous prune) is just dropped.
                self.seen.remove(&front);
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl Default for DedupTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES, DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridbot_core::model::{OrderStatus, Side};
    use rust_decimal_macros::dec;

    fn trade(order_id: &str, trade_id: &str) -> Trade {
        Trade {
            order_id: order_id.to_string(),
            trade_id: trade_id.to_string(),
            symbol: "BTCUSDT".to_string(),
            side: Side::Buy,
            price: dec!(100),
            qty: dec!(1),
            status: OrderStatus::Filled,
            time: 1_700_000_000_000,
        }
    }

    #[test]
    fn event_key_uses_canonical_form_when_trade_id_present() {
        assert_eq!(event_key(&trade("1", "2")), "order:1|trade:2");
        assert!(has_ledger_key(&trade("1", "2")));
    }

    #[test]
    fn event_key_falls_back_to_composite_when_trade_id_missing() {
        let a = trade("1", "");
        let mut b = trade("1", "");
        b.qty = dec!(2);
        assert_ne!(event_key(&a), event_key(&b));
        assert!(!has_ledger_key(&a));
    }

    #[test]
    fn first_sighting_is_not_seen() {
        let mut t = DedupTracker::default();
        assert!(!t.seen("order:1|trade:1", 100));
        assert!(t.seen("order:1|trade:1", 101));
    }

    #[test]
    fn entries_expire_after_ttl() {
        let mut t = DedupTracker::new(100, Duration::from_secs(10));
        assert!(!t.seen("k1", 0));
        // k1 is still within TTL until the next seen() call walks past it.
        assert!(!t.seen("k2", 20));
        assert!(!t.seen("k1", 21));
    }

    #[test]
    fn capacity_evicts_oldest_first() {
        let mut t = DedupTracker::new(2, Duration::from_secs(1000));
        assert!(!t.seen("k1", 0));
        assert!(!t.seen("k2", 0));
        assert!(!t.seen("k3", 0));
        assert_eq!(t.len(), 2);
        assert!(!t.seen("k1", 0));
    }
}
