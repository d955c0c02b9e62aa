//! Crash-safe state store (C2): atomic snapshots, trade ledger, daily trade
//! log, and the instance lock, all rooted at
//! `state/<mode>/<symbol>/<instance_id>/`.

mod atomic;
mod ledger;
mod lock;

pub use ledger::TradeLedger;
pub use lock::{InstanceLock, LockOptions};

use chrono::Utc;
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::model::{GridState, OpenOrdersSnapshot, RuntimeStatus, Trade};

pub struct Store {
    root: PathBuf,
    inner: Mutex<Inner>,
}

struct Inner {
    ledger: TradeLedger,
}

impl Store {
    /// Opens (creating if absent) the per-instance directory and its trade
    /// ledger. Does not acquire the instance lock: callers do that
    /// separately via [`InstanceLock::acquire`] against the same root.
    pub fn open(mode: &str, symbol: &str, instance_id: &str, base_dir: &Path) -> Result<Self, StoreError> {
        let root = base_dir.join("state").join(mode).join(symbol).join(instance_id);
        std::fs::create_dir_all(&root)?;
        std::fs::create_dir_all(root.join("trades"))?;
        let ledger = TradeLedger::open(root.join("trade_ledger.jsonl"))?;
        Ok(Self { root, inner: Mutex::new(Inner { ledger }) })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn write_grid_state(&self, state: &GridState) -> Result<(), StoreError> {
        let _guard = self.inner.lock();
        atomic::write_json_atomic(&self.root.join("state.json"), state)
    }

    pub fn read_grid_state(&self) -> Result<Option<GridState>, StoreError> {
        atomic::read_json(&self.root.join("state.json"))
    }

    pub fn write_open_orders(&self, snapshot: &OpenOrdersSnapshot) -> Result<(), StoreError> {
        let _guard = self.inner.lock();
        atomic::write_json_atomic(&self.root.join("open_orders.json"), snapshot)
    }

    pub fn read_open_orders(&self) -> Result<Option<OpenOrdersSnapshot>, StoreError> {
        atomic::read_json(&self.root.join("open_orders.json"))
    }

    pub fn write_runtime_status(&self, status: &RuntimeStatus) -> Result<(), StoreError> {
        let _guard = self.inner.lock();
        atomic::write_json_atomic(&self.root.join("runtime_status.json"), status)
    }

    pub fn read_runtime_status(&self) -> Result<Option<RuntimeStatus>, StoreError> {
        atomic::read_json(&self.root.join("runtime_status.json"))
    }

    /// Persists `GridState` and `OpenOrdersSnapshot` together under the
    /// store's mutex so the pair is never observed torn relative to each
    /// other by a concurrent reader (§4.5.10). Both already use atomic
    /// rename individually; the mutex only protects write ordering.
    pub fn persist_snapshot(&self, state: &GridState, orders: &OpenOrdersSnapshot) -> Result<(), StoreError> {
        let _guard = self.inner.lock();
        atomic::write_json_atomic(&self.root.join("state.json"), state)?;
        atomic::write_json_atomic(&self.root.join("open_orders.json"), orders)?;
        Ok(())
    }

    pub fn has_trade_ledger_key(&self, key: &str) -> bool {
        self.inner.lock().ledger.has(key)
    }

    pub fn record_trade_ledger_key(&self, key: &str, seen_at: i64) -> Result<(), StoreError> {
        self.inner.lock().ledger.record(key, seen_at)
    }

    /// Appends one JSON line per fill event to `trades/YYYY-MM-DD.jsonl`.
    pub fn append_trade_log(&self, trade: &Trade) -> Result<(), StoreError> {
        let _guard = self.inner.lock();
        let day = Utc::now().format("%Y-%m-%d");
        let path = self.root.join("trades").join(format!("{day}.jsonl"));
        let mut f = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(f, "{}", serde_json::to_string(trade)?)?;
        f.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{OrderStatus, Side};
    use rust_decimal_macros::dec;

    fn sample_state() -> GridState {
        GridState {
            anchor: dec!(100),
            ratio: dec!(1.1),
            sell_ratio: dec!(1.1),
            base_ratio: dec!(1.1),
            ratio_step: dec!(0.002),
            levels: 3,
            shift_levels: 1,
            min_level: -3,
            max_level: 1,
            qty: dec!(1),
            min_qty_multiple: dec!(1),
            initialized: true,
            stopped: false,
            stop_price: dec!(0),
            last_down_shift_price: None,
            last_down_shift_at: None,
            snapshot_id: "abc123".into(),
        }
    }

    #[test]
    fn persists_and_reloads_grid_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open("live", "BTCUSDT", "inst1", dir.path()).unwrap();
        store.write_grid_state(&sample_state()).unwrap();
        let loaded = store.read_grid_state().unwrap().unwrap();
        assert_eq!(loaded.snapshot_id, "abc123");
    }

    #[test]
    fn persist_snapshot_writes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open("live", "BTCUSDT", "inst1", dir.path()).unwrap();
        let orders = OpenOrdersSnapshot { snapshot_id: "abc123".into(), orders: vec![] };
        store.persist_snapshot(&sample_state(), &orders).unwrap();
        assert_eq!(store.read_grid_state().unwrap().unwrap().snapshot_id, "abc123");
        assert_eq!(store.read_open_orders().unwrap().unwrap().snapshot_id, "abc123");
    }

    #[test]
    fn trade_ledger_dedup_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open("live", "BTCUSDT", "inst1", dir.path()).unwrap();
        assert!(!store.has_trade_ledger_key("order:1|trade:1"));
        store.record_trade_ledger_key("order:1|trade:1", 1).unwrap();
        assert!(store.has_trade_ledger_key("order:1|trade:1"));
    }

    #[test]
    fn appends_trade_to_daily_log() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open("live", "BTCUSDT", "inst1", dir.path()).unwrap();
        let trade = Trade {
            order_id: "1".into(),
            trade_id: "1".into(),
            symbol: "BTCUSDT".into(),
            side: Side::Sell,
            price: dec!(110),
            qty: dec!(1),
            status: OrderStatus::Filled,
            time: 1,
        };
        store.append_trade_log(&trade).unwrap();
        let entries: Vec<_> = std::fs::read_dir(store.root().join("trades")).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
