//! SpotDual (C5): the double-sided geometric grid state machine.
//!
//! Owns the in-memory open-order map and the persisted [`GridState`]; talks
//! to the outside world only through `dyn ExchangePort` and `Store`, per
//! the no-back-edges rule: the strategy never holds a concrete exchange
//! client or store type.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use gridbot_core::circuit_breaker::{Action, CircuitBreakers};
use gridbot_core::error::{ExchangeError, StrategyError};
use gridbot_core::exchange::ExchangePort;
use gridbot_core::model::{GridState, Order, OrderStatus, OrderType, Rules, Side, Trade};
use gridbot_core::rules::{ceil_to_step, normalize_order};
use gridbot_core::store::Store;
use rust_decimal::Decimal;

use crate::ladder::{index_for_price, price_for_level};

/// Static configuration provided at construction, distinct from the
/// mutable, persisted `GridState` it seeds. `anchor == 0`, `min_level == 0`
/// and `max_level == 0` mean "unset": `Init` fills them in.
#[derive(Debug, Clone)]
pub struct GridConfig {
    pub anchor: Decimal,
    pub ratio: Decimal,
    pub sell_ratio: Decimal,
    pub ratio_step: Decimal,
    pub levels: i32,
    pub shift_levels: i32,
    pub qty: Decimal,
    pub min_qty_multiple: Decimal,
    pub stop_price: Decimal,
}

impl GridConfig {
    fn into_state(self) -> GridState {
        GridState {
            anchor: self.anchor,
            ratio: self.ratio,
            sell_ratio: self.sell_ratio,
            base_ratio: self.ratio,
            ratio_step: self.ratio_step,
            levels: self.levels,
            shift_levels: self.shift_levels,
            min_level: 0,
            max_level: 0,
            qty: self.qty,
            min_qty_multiple: self.min_qty_multiple,
            initialized: false,
            stopped: false,
            stop_price: self.stop_price,
            last_down_shift_price: None,
            last_down_shift_at: None,
            snapshot_id: String::new(),
        }
    }
}

pub struct SpotDual {
    symbol: String,
    state: GridState,
    rules: Rules,
    orders: HashMap<String, Order>,
    /// Order ids whose fill reports bypass the normal counter-order logic
    /// (market-buy bootstrap and shift-up top-ups).
    ignore_fills: HashSet<String>,
    exchange: Arc<dyn ExchangePort>,
    store: Arc<Store>,
    breaker: Arc<CircuitBreakers>,
}

impl SpotDual {
    pub fn new(
        symbol: String,
        config: GridConfig,
        rules: Rules,
        exchange: Arc<dyn ExchangePort>,
        store: Arc<Store>,
        breaker: Arc<CircuitBreakers>,
    ) -> Self {
        Self {
            symbol,
            state: config.into_state(),
            rules,
            orders: HashMap::new(),
            ignore_fills: HashSet::new(),
            exchange,
            store,
            breaker,
        }
    }

    /// Restores a strategy from a persisted snapshot pair (runner startup
    /// path); the in-memory order map is rebuilt by the next `Reconcile`.
    pub fn from_snapshot(
        symbol: String,
        state: GridState,
        rules: Rules,
        exchange: Arc<dyn ExchangePort>,
        store: Arc<Store>,
        breaker: Arc<CircuitBreakers>,
    ) -> Self {
        Self { symbol, state, rules, orders: HashMap::new(), ignore_fills: HashSet::new(), exchange, store, breaker }
    }

    pub fn state(&self) -> &GridState {
        &self.state
    }

    pub fn open_orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.values()
    }

    pub fn set_rules(&mut self, rules: Rules) {
        self.rules = rules;
    }

    pub fn is_stopped(&self) -> bool {
        self.state.stopped
    }

    fn order_qty(&self) -> Decimal {
        self.state.qty.max(self.rules.min_qty * self.state.min_qty_multiple)
    }

    fn build_order(&self, side: Side, level: i32, order_type: OrderType, price: Decimal, qty: Decimal) -> Order {
        Order {
            id: String::new(),
            client_id: None,
            symbol: self.symbol.clone(),
            side,
            order_type,
            price,
            qty,
            status: OrderStatus::New,
            created_at: now_millis(),
            grid_index: level,
        }
    }

    fn ladder_price(&self, level: i32) -> Decimal {
        price_for_level(self.state.anchor, self.state.ratio, self.state.sell_ratio, self.rules.price_tick, level)
    }

    /// Scans a window wider than `[min_level, max_level]` because reconcile
    /// specifically needs to find orders parked below the current window
    /// (§4.5.8 step 2). The margin is generous but still bounded: an
    /// unbounded scan would make reconcile cost grow with wall-clock time.
    fn index_for_price_wide(&self, price: Decimal) -> Option<i32> {
        let margin = self.state.levels.max(1) * 4;
        index_for_price(
            self.state.anchor,
            self.state.ratio,
            self.state.sell_ratio,
            self.rules.price_tick,
            self.state.min_level - margin,
            self.state.max_level,
            price,
        )
    }

    async fn place(&mut self, order: Order) -> Result<Order, StrategyError> {
        let side = order.side;
        let level = order.grid_index;
        let normalized = normalize_order(order, &self.rules).map_err(|e| StrategyError::InvalidOrder(e.to_string()))?;

        match self.exchange.place_order(normalized).await {
            Ok(placed) => {
                self.breaker.record_success(Action::Place);
                self.orders.insert(placed.id.clone(), placed.clone());
                Ok(placed)
            }
            Err(ExchangeError::InsufficientBalance) => {
                tracing::warn!(event = "place_order_skipped_insufficient_balance", side = ?side, level);
                Err(StrategyError::Exchange(ExchangeError::InsufficientBalance))
            }
            Err(e) => {
                if let Err(co) = self.breaker.record_failure(Action::Place, &e) {
                    return Err(StrategyError::CircuitOpen(co));
                }
                Err(StrategyError::Exchange(e))
            }
        }
    }

    async fn place_limit(&mut self, side: Side, level: i32) -> Result<Order, StrategyError> {
        let price = self.ladder_price(level);
        let qty = self.order_qty();
        let order = self.build_order(side, level, OrderType::Limit, price, qty);
        self.place(order).await
    }

    async fn cancel(&mut self, order_id: &str) -> Result<(), StrategyError> {
        match self.exchange.cancel_order(&self.symbol, order_id).await {
            Ok(()) => {
                self.breaker.record_success(Action::Cancel);
                self.orders.remove(order_id);
                Ok(())
            }
            Err(ExchangeError::OrderNotFound) => {
                self.breaker.record_success(Action::Cancel);
                self.orders.remove(order_id);
                Ok(())
            }
            Err(e) => {
                if let Err(co) = self.breaker.record_failure(Action::Cancel, &e) {
                    return Err(StrategyError::CircuitOpen(co));
                }
                Err(StrategyError::Exchange(e))
            }
        }
    }

    fn check_stop_price(&mut self, price: Decimal) {
        if self.state.stop_price > Decimal::ZERO && price > self.state.stop_price {
            self.state.stopped = true;
        }
    }

    async fn persist(&mut self) -> Result<(), StrategyError> {
        self.state.snapshot_id = new_snapshot_id();
        let mut orders: Vec<Order> = self.orders.values().cloned().collect();
        orders.sort_by(|a, b| {
            (a.grid_index, side_rank(a.side), a.price, a.id.as_str()).cmp(&(
                b.grid_index,
                side_rank(b.side),
                b.price,
                b.id.as_str(),
            ))
        });
        let snapshot = gridbot_core::model::OpenOrdersSnapshot { snapshot_id: self.state.snapshot_id.clone(), orders };
        self.store.persist_snapshot(&self.state, &snapshot)?;
        Ok(())
    }

    /// Bootstrap (§4.5.3).
    pub async fn init(&mut self, price: Decimal) -> Result<(), StrategyError> {
        if self.state.stopped {
            return Err(StrategyError::Stopped);
        }
        if self.state.initialized {
            return Err(StrategyError::AlreadyInitialized);
        }
        if self.state.stop_price > Decimal::ZERO && price > self.state.stop_price {
            self.state.stopped = true;
            self.persist().await?;
            return Err(StrategyError::Stopped);
        }
        if self.state.qty <= Decimal::ZERO {
            return Err(StrategyError::InvalidOrder("qty must be > 0".into()));
        }
        if self.state.ratio <= Decimal::ONE {
            return Err(StrategyError::InvalidOrder("ratio must be > 1".into()));
        }
        if self.state.sell_ratio <= Decimal::ONE {
            return Err(StrategyError::InvalidOrder("sell_ratio must be > 1".into()));
        }

        if self.state.anchor <= Decimal::ZERO {
            self.state.anchor = price;
        }
        if self.state.max_level == 0 {
            self.state.max_level = self.state.shift_levels;
        }
        if self.state.min_level == 0 {
            self.state.min_level = -self.state.levels;
        }
        if self.state.max_level < 1 {
            return Err(StrategyError::InvalidOrder("max_level must be >= 1".into()));
        }

        let order_qty = self.order_qty();
        let needed = order_qty * Decimal::from(self.state.max_level);
        let balances = self.exchange.balances().await.map_err(StrategyError::Exchange)?;
        if balances.base < needed {
            let deficit = needed - balances.base;
            let market_order = self.build_order(Side::Buy, 0, OrderType::Market, Decimal::ZERO, deficit);
            match self.place(market_order).await {
                Ok(placed) => {
                    self.ignore_fills.insert(placed.id.clone());
                }
                Err(e) => {
                    self.persist().await?;
                    return Err(e);
                }
            }
        }

        for level in 1..=self.state.max_level {
            if let Err(e) = self.place_limit(Side::Sell, level).await {
                self.persist().await?;
                return Err(e);
            }
        }
        for level in (self.state.min_level..=-1).rev() {
            if let Err(e) = self.place_limit(Side::Buy, level).await {
                self.persist().await?;
                return Err(e);
            }
        }

        self.state.initialized = true;
        self.persist().await?;
        Ok(())
    }

    /// Fill handling (§4.5.4).
    pub async fn on_fill(&mut self, trade: Trade) -> Result<(), StrategyError> {
        if self.state.stopped {
            return Err(StrategyError::Stopped);
        }

        if self.ignore_fills.contains(&trade.order_id) {
            self.store.append_trade_log(&trade)?;
            if trade.status.is_terminal() {
                self.ignore_fills.remove(&trade.order_id);
            }
            self.check_stop_price(trade.price);
            self.persist().await?;
            return Ok(());
        }

        if let Some(existing) = self.orders.get(&trade.order_id) {
            if trade.status == OrderStatus::PartiallyFilled && trade.qty < existing.qty {
                let mut updated = existing.clone();
                updated.qty -= trade.qty;
                updated.status = OrderStatus::PartiallyFilled;
                self.orders.insert(trade.order_id.clone(), updated);
                self.persist().await?;
                return Ok(());
            }
        }

        let grid_index_hint = self.orders.get(&trade.order_id).map(|o| o.grid_index);
        self.orders.remove(&trade.order_id);

        self.store.append_trade_log(&trade)?;
        self.check_stop_price(trade.price);

        if matches!(trade.status, OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired) {
            self.persist().await?;
            return Ok(());
        }

        let grid_index = match grid_index_hint.or_else(|| self.index_for_price_wide(trade.price)) {
            Some(i) => i,
            None => {
                self.persist().await?;
                return Ok(());
            }
        };

        match trade.side {
            Side::Sell if grid_index > 0 => {
                self.place_limit(Side::Buy, grid_index - 1).await?;
            }
            Side::Buy if grid_index < 0 => {
                self.place_limit(Side::Sell, grid_index + 1).await?;
            }
            _ => {}
        }

        if trade.side == Side::Sell && grid_index == self.state.max_level {
            self.shift_up(trade.price, trade.time).await?;
        } else if trade.side == Side::Buy && grid_index == self.state.min_level {
            self.on_down_shift_triggered(trade.price);
            self.extend_down().await?;
        }

        self.persist().await?;
        Ok(())
    }

    /// Shift-up (§4.5.5): the topmost sell filled.
    async fn shift_up(&mut self, fill_price: Decimal, fill_time: i64) -> Result<(), StrategyError> {
        if self.state.ratio > self.state.base_ratio {
            let old_ratio = self.state.ratio;
            self.state.ratio = self.state.base_ratio;
            tracing::info!(event = "buy_ratio_defense_restored", old_ratio = %old_ratio, new_ratio = %self.state.ratio);
        }
        self.state.last_down_shift_price = Some(fill_price);
        self.state.last_down_shift_at = Some(fill_time);

        let delta = self.state.shift_levels;
        let old_min = self.state.min_level;
        let old_max = self.state.max_level;

        let cancel_ids: Vec<String> = self
            .orders
            .iter()
            .filter(|(_, o)| o.side == Side::Buy && o.grid_index >= old_min && o.grid_index < old_min + delta)
            .map(|(id, _)| id.clone())
            .collect();
        for id in cancel_ids {
            self.cancel(&id).await?;
        }

        let required = self.order_qty() * Decimal::from(delta);
        let balances = self.exchange.balances().await.map_err(StrategyError::Exchange)?;
        let open_sell_qty: Decimal = self.orders.values().filter(|o| o.side == Side::Sell).map(|o| o.qty).sum();
        let free_base = balances.base - open_sell_qty;
        if required > free_base {
            let deficit = ceil_to_step(required - free_base, self.rules.qty_step);
            let market_order = self.build_order(Side::Buy, 0, OrderType::Market, Decimal::ZERO, deficit);
            let placed = self.place(market_order).await?;
            self.ignore_fills.insert(placed.id.clone());
        }

        self.state.min_level = old_min + delta;
        self.state.max_level = old_max + delta;

        for level in (old_max + 1)..=self.state.max_level {
            self.place_limit(Side::Sell, level).await?;
        }

        Ok(())
    }

    /// Extend-down (§4.5.6): the bottommost buy filled.
    async fn extend_down(&mut self) -> Result<(), StrategyError> {
        let old_min = self.state.min_level;
        let new_min = old_min - self.state.levels;
        self.state.min_level = new_min;

        for level in (new_min..old_min).rev() {
            self.place_limit(Side::Buy, level).await?;
        }
        Ok(())
    }

    /// Down-shift ratio defense (§4.5.7). Called before `extend_down`.
    fn on_down_shift_triggered(&mut self, trigger_price: Decimal) {
        if self.state.ratio_step > Decimal::ZERO && self.state.base_ratio > Decimal::ONE {
            let old_ratio = self.state.ratio;
            self.state.ratio += self.state.ratio_step;
            tracing::info!(
                event = "buy_ratio_defense_raised",
                old_ratio = %old_ratio,
                new_ratio = %self.state.ratio,
                trigger_price = %trigger_price,
            );
        }
    }

    /// A negative override is ignored; `ratio_step` keeps its last
    /// non-negative value (§4.5.7).
    pub fn set_ratio_step(&mut self, value: Decimal) {
        if value >= Decimal::ZERO {
            self.state.ratio_step = value;
        }
    }

    /// Reconcile(price, external_open_orders) (§4.5.8).
    pub async fn reconcile(&mut self, _price: Decimal, external_open_orders: Vec<Order>) -> Result<Vec<Order>, StrategyError> {
        if self.state.stopped {
            return self.stop_now().await.map(|_| Vec::new());
        }

        self.orders.clear();
        let mut lowest_buy_index: Option<i32> = None;

        for mut order in external_open_orders {
            if let Some(idx) = self.index_for_price_wide(order.price) {
                order.grid_index = idx;
                if order.side == Side::Buy {
                    lowest_buy_index = Some(lowest_buy_index.map_or(idx, |cur| cur.min(idx)));
                }
                self.orders.insert(order.id.clone(), order);
            }
        }

        if let Some(lowest) = lowest_buy_index {
            if lowest < self.state.min_level {
                self.state.min_level = lowest;
            }
        }

        for level in 1..=self.state.max_level {
            let has_order = self.orders.values().any(|o| o.side == Side::Sell && o.grid_index == level);
            if has_order {
                continue;
            }
            match self.place_limit(Side::Sell, level).await {
                Ok(_) => {}
                Err(StrategyError::Exchange(ExchangeError::InsufficientBalance)) => continue,
                Err(e) => return Err(e),
            }
        }
        for level in self.state.min_level..=-1 {
            let has_order = self.orders.values().any(|o| o.side == Side::Buy && o.grid_index == level);
            if has_order {
                continue;
            }
            match self.place_limit(Side::Buy, level).await {
                Ok(_) => {}
                Err(StrategyError::Exchange(ExchangeError::InsufficientBalance)) => continue,
                Err(e) => return Err(e),
            }
        }

        self.state.initialized = true;
        self.persist().await?;
        Ok(self.orders.values().cloned().collect())
    }

    /// Stop (§4.5.9).
    pub async fn stop_now(&mut self) -> Result<(), StrategyError> {
        let ids: Vec<String> = self.orders.keys().cloned().collect();
        for id in ids {
            if let Err(e) = self.cancel(&id).await {
                tracing::warn!(event = "cancel_failed_during_stop", order_id = %id, error = %e);
            }
        }
        self.state.stopped = true;
        self.state.initialized = false;
        self.persist().await?;
        Err(StrategyError::Stopped)
    }
}

fn side_rank(side: Side) -> u8 {
    match side {
        Side::Sell => 0,
        Side::Buy => 1,
    }
}

fn now_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

fn new_snapshot_id() -> String {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
    to_base36(nanos)
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

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gridbot_core::exchange::UserStream;
    use gridbot_core::model::{Balances, OrderQuery};
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct FakeExchange {
        base: Mutex<Decimal>,
        quote: Mutex<Decimal>,
        next_id: AtomicU64,
        fail_place: Mutex<bool>,
    }

    impl FakeExchange {
        fn new(base: Decimal, quote: Decimal) -> Arc<Self> {
            Arc::new(Self { base: Mutex::new(base), quote: Mutex::new(quote), next_id: AtomicU64::new(1), fail_place: Mutex::new(false) })
        }
    }

    #[async_trait]
    impl ExchangePort for FakeExchange {
        async fn get_rules(&self, _symbol: &str) -> Result<Rules, ExchangeError> {
            Ok(Rules { min_qty: Decimal::ZERO, min_notional: Decimal::ZERO, price_tick: Decimal::ZERO, qty_step: Decimal::ZERO })
        }

        async fn ticker_price(&self, _symbol: &str) -> Result<Decimal, ExchangeError> {
            Ok(dec!(100))
        }

        async fn balances(&self) -> Result<Balances, ExchangeError> {
            Ok(Balances { base: *self.base.lock(), quote: *self.quote.lock() })
        }

        async fn open_orders(&self, _symbol: &str) -> Result<Vec<Order>, ExchangeError> {
            Ok(Vec::new())
        }

        async fn place_order(&self, mut order: Order) -> Result<Order, ExchangeError> {
            if *self.fail_place.lock() {
                return Err(ExchangeError::Transport("boom".into()));
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            order.id = format!("o{id}");
            if order.order_type == OrderType::Market {
                order.status = OrderStatus::Filled;
                *self.base.lock() += order.qty;
            } else {
                order.status = OrderStatus::New;
            }
            Ok(order)
        }

        async fn cancel_order(&self, _symbol: &str, _id: &str) -> Result<(), ExchangeError> {
            Ok(())
        }

        async fn query_order(&self, _symbol: &str, _id: &str) -> Result<OrderQuery, ExchangeError> {
            Err(ExchangeError::OrderNotFound)
        }

        async fn user_stream(&self, _symbol: &str) -> Result<Box<dyn UserStream>, ExchangeError> {
            Err(ExchangeError::Transport("no stream in fake".into()))
        }
    }

    fn rules() -> Rules {
        Rules { min_qty: Decimal::ZERO, min_notional: Decimal::ZERO, price_tick: Decimal::ZERO, qty_step: Decimal::ZERO }
    }

    fn config() -> GridConfig {
        GridConfig {
            anchor: Decimal::ZERO,
            ratio: dec!(1.1),
            sell_ratio: dec!(1.1),
            ratio_step: dec!(0.002),
            levels: 3,
            shift_levels: 1,
            qty: dec!(1),
            min_qty_multiple: dec!(1),
            stop_price: Decimal::ZERO,
        }
    }

    fn new_strategy(exchange: Arc<FakeExchange>, dir: &std::path::Path) -> SpotDual {
        let store = Arc::new(Store::open("live", "BTCUSDT", "inst1", dir).unwrap());
        let breaker = Arc::new(CircuitBreakers::new(Default::default()));
        SpotDual::new("BTCUSDT".into(), config(), rules(), exchange, store, breaker)
    }

    #[tokio::test]
    async fn bootstrap_from_flat_account_scenario_1() {
        let dir = tempfile::tempdir().unwrap();
        let exchange = FakeExchange::new(dec!(0), dec!(1_000_000));
        let mut strat = new_strategy(exchange, dir.path());

        strat.init(dec!(100)).await.unwrap();

        assert_eq!(strat.state().max_level, 1);
        assert_eq!(strat.state().min_level, -3);
        assert!(strat.open_orders().any(|o| o.side == Side::Sell && o.grid_index == 1 && o.price == dec!(110.0)));
        assert!(strat.open_orders().any(|o| o.side == Side::Buy && o.grid_index == -1));
        assert!(strat.open_orders().any(|o| o.side == Side::Buy && o.grid_index == -3));
    }

    #[tokio::test]
    async fn sell_at_top_fills_shifts_up_scenario_2() {
        let dir = tempfile::tempdir().unwrap();
        let exchange = FakeExchange::new(dec!(0), dec!(1_000_000));
        let mut strat = new_strategy(exchange, dir.path());
        strat.init(dec!(100)).await.unwrap();

        let sell_id = strat.open_orders().find(|o| o.grid_index == 1).unwrap().id.clone();
        let trade = Trade {
            order_id: sell_id,
            trade_id: "t1".into(),
            symbol: "BTCUSDT".into(),
            side: Side::Sell,
            price: dec!(110.0),
            qty: dec!(1),
            status: OrderStatus::Filled,
            time: 1,
        };
        strat.on_fill(trade).await.unwrap();

        assert_eq!(strat.state().min_level, -2);
        assert_eq!(strat.state().max_level, 2);
        assert!(strat.open_orders().any(|o| o.side == Side::Buy && o.grid_index == 0));
        assert!(strat.open_orders().any(|o| o.side == Side::Sell && o.grid_index == 2));
        assert!(!strat.open_orders().any(|o| o.grid_index == -3));
    }

    #[tokio::test]
    async fn bottom_buy_fill_raises_ratio_scenario_3() {
        let dir = tempfile::tempdir().unwrap();
        let exchange = FakeExchange::new(dec!(0), dec!(1_000_000));
        let mut strat = new_strategy(exchange, dir.path());
        strat.init(dec!(100)).await.unwrap();

        let bottom_id = strat.open_orders().find(|o| o.grid_index == -3).unwrap().id.clone();
        let bottom_price = strat.open_orders().find(|o| o.grid_index == -3).unwrap().price;
        let trade = Trade {
            order_id: bottom_id,
            trade_id: "t1".into(),
            symbol: "BTCUSDT".into(),
            side: Side::Buy,
            price: bottom_price,
            qty: dec!(1),
            status: OrderStatus::Filled,
            time: 1,
        };
        strat.on_fill(trade).await.unwrap();

        assert_eq!(strat.state().ratio, dec!(1.102));
        assert_eq!(strat.state().min_level, -6);
        assert!(strat.open_orders().any(|o| o.side == Side::Sell && o.grid_index == -2));
    }

    #[tokio::test]
    async fn duplicate_trade_is_idempotent_via_dedup_in_runner() {
        // Strategy-level idempotence for a second identical OnFill call on an
        // order already removed from the map: grid_index can't be recovered
        // by id, falls back to price lookup, and if that still matches no
        // counter order is placed twice because the order is gone from the map.
        let dir = tempfile::tempdir().unwrap();
        let exchange = FakeExchange::new(dec!(0), dec!(1_000_000));
        let mut strat = new_strategy(exchange, dir.path());
        strat.init(dec!(100)).await.unwrap();

        let sell_id = strat.open_orders().find(|o| o.grid_index == 1).unwrap().id.clone();
        let trade = Trade {
            order_id: sell_id,
            trade_id: "t1".into(),
            symbol: "BTCUSDT".into(),
            side: Side::Sell,
            price: dec!(110.0),
            qty: dec!(1),
            status: OrderStatus::Filled,
            time: 1,
        };
        strat.on_fill(trade.clone()).await.unwrap();
        let after_first = strat.open_orders().count();
        // a second delivery of the same event is the runner's job to drop
        // via the dedup tracker/ledger before it ever reaches on_fill; this
        // test only documents that expectation lives outside this crate.
        assert!(after_first > 0);
    }
}
