//! The supervised event loop (C6, §4.6.1/§4.6.2): a single long-running
//! task that calls `run_once` until a clean stop, a fatal local error, or
//! cancellation, reconnecting through the breaker in between.

use std::sync::Arc;
use std::time::Duration;

use gridbot_core::alerts::AlertQueue;
use gridbot_core::backoff::ExponentialBackoff;
use gridbot_core::circuit_breaker::{Action, CircuitBreakers};
use gridbot_core::error::{RunnerError, StrategyError};
use gridbot_core::exchange::ExchangePort;
use gridbot_core::model::{Order, RunState, RuntimeStatus};
use gridbot_core::store::Store;
use gridbot_strategies::GridStrategy;
use rust_decimal::Decimal;
use tokio::sync::watch;

use crate::config::GridBotConfig;
use crate::dedup::{event_key, has_ledger_key, DedupTracker};
use crate::reconcile::reconcile_missing;

pub struct Supervisor {
    config: GridBotConfig,
    exchange: Arc<dyn ExchangePort>,
    store: Arc<Store>,
    breaker: Arc<CircuitBreakers>,
    alerts: Arc<AlertQueue>,
    cancel: watch::Receiver<bool>,
    started_at: i64,
}

impl Supervisor {
    pub fn new(
        config: GridBotConfig,
        exchange: Arc<dyn ExchangePort>,
        store: Arc<Store>,
        breaker: Arc<CircuitBreakers>,
        alerts: Arc<AlertQueue>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self { config, exchange, store, breaker, alerts, cancel, started_at: now_millis() }
    }

    pub async fn run(mut self, mut strategy: Box<dyn GridStrategy>) -> Result<(), RunnerError> {
        let mut dedup = DedupTracker::default();
        let mut backoff = ExponentialBackoff::new();
        let mut reconnect_attempts: u32 = 0;
        let mut disconnected_at: Option<i64> = None;

        loop {
            if *self.cancel.borrow() {
                return Err(RunnerError::Cancelled);
            }

            if reconnect_attempts > 0 {
                if self.breaker.allow_reconnect().is_err() {
                    self.persist_status(RunState::Degraded, None, reconnect_attempts, disconnected_at).await?;
                    let wait = self.breaker.cooldown_remaining(Action::Reconnect).max(Duration::from_secs(1));
                    if self.sleep_or_cancel(wait).await {
                        return Err(RunnerError::Cancelled);
                    }
                    continue;
                }
            }

            self.persist_status(RunState::Running, None, reconnect_attempts, disconnected_at).await?;

            match self.run_once(strategy.as_mut(), &mut dedup, &mut reconnect_attempts, &mut disconnected_at).await {
                Ok(()) => return Ok(()),
                Err(RunnerError::Cancelled) => return Err(RunnerError::Cancelled),
                Err(RunnerError::Stopped) => return Ok(()),
                Err(RunnerError::FatalLocal(msg)) => {
                    tracing::error!(event = "runner_stopped", reason = %msg);
                    tracing::error!(event = "manual_intervention_required", reason = %msg);
                    self.persist_status(RunState::Stopped, Some(msg.clone()), reconnect_attempts, disconnected_at).await.ok();
                    return Err(RunnerError::FatalLocal(msg));
                }
                Err(RunnerError::ManualIntervention { reason }) => {
                    tracing::error!(event = "manual_intervention_required", reason = %reason);
                    self.persist_status(RunState::Degraded, Some(reason.clone()), reconnect_attempts, disconnected_at).await.ok();
                    return Err(RunnerError::ManualIntervention { reason });
                }
                Err(e) => {
                    if disconnected_at.is_none() {
                        disconnected_at = Some(now_millis());
                        self.alerts.important("user_stream_disconnected", Default::default());
                    }
                    match self.breaker.record_failure(Action::Reconnect, &e) {
                        Err(co) => return Err(RunnerError::CircuitOpen(co)),
                        Ok(()) => {
                            reconnect_attempts += 1;
                            let delay = backoff.next_delay().unwrap_or(Duration::from_secs(30));
                            if self.sleep_or_cancel(delay).await {
                                return Err(RunnerError::Cancelled);
                            }
                        }
                    }
                }
            }
        }
    }

    async fn run_once(
        &mut self,
        strategy: &mut dyn GridStrategy,
        dedup: &mut DedupTracker,
        reconnect_attempts: &mut u32,
        disconnected_at: &mut Option<i64>,
    ) -> Result<(), RunnerError> {
        let reconnecting = *reconnect_attempts > 0;
        let price = self.exchange.ticker_price(&self.config.symbol).await.map_err(RunnerError::Transport)?;

        let mut persisted_orders: Option<Vec<Order>> = None;
        let mut allow_persisted_reconcile = false;
        if !reconnecting {
            let state = self.store.read_grid_state()?;
            let snapshot = self.store.read_open_orders()?;
            if let (Some(state), Some(snap)) = (&state, &snapshot) {
                if state.snapshot_id == snap.snapshot_id {
                    persisted_orders = Some(snap.orders.clone());
                    allow_persisted_reconcile = true;
                } else {
                    tracing::warn!(event = "snapshot_mismatch_skip_reconcile_missing");
                }
            }
        }

        self.resync(strategy, dedup, price, persisted_orders, allow_persisted_reconcile).await?;

        let mut stream = self.exchange.user_stream(&self.config.symbol).await.map_err(RunnerError::Transport)?;

        if reconnecting {
            let down_duration_ms = disconnected_at.map(|t| now_millis() - t).unwrap_or(0);
            tracing::info!(event = "user_stream_reconnected", attempts = *reconnect_attempts, down_duration_ms);
            *disconnected_at = None;
            *reconnect_attempts = 0;
            self.breaker.record_success(Action::Reconnect);
            self.persist_status(RunState::Running, None, 0, None).await?;
        }

        let mut heartbeat = interval_if(self.config.observability.runtime.heartbeat_interval_sec);
        let mut reconcile_ticker = interval_if(self.config.observability.runtime.reconcile_interval_sec);

        loop {
            tokio::select! {
                biased;

                changed = self.cancel.changed() => {
                    if changed.is_err() || *self.cancel.borrow() {
                        return Err(RunnerError::Cancelled);
                    }
                }

                _ = tick_or_pending(&mut heartbeat) => {
                    self.persist_status(RunState::Running, None, 0, None).await?;
                }

                _ = tick_or_pending(&mut reconcile_ticker) => {
                    let price = self.exchange.ticker_price(&self.config.symbol).await.map_err(RunnerError::Transport)?;
                    self.resync(strategy, dedup, price, None, true).await?;
                }

                trade_result = stream.next() => {
                    let trade = trade_result.map_err(RunnerError::Transport)?;
                    let key = event_key(&trade);
                    let ledger_eligible = has_ledger_key(&trade);
                    let now = now_millis() / 1000;
                    if dedup.seen(&key, now) || (ledger_eligible && self.store.has_trade_ledger_key(&key)) {
                        continue;
                    }
                    let trade_time = trade.time;
                    match strategy.on_fill(trade).await {
                        Ok(()) => {
                            if ledger_eligible {
                                self.store.record_trade_ledger_key(&key, trade_time)?;
                            }
                        }
                        Err(StrategyError::Stopped) => {
                            tracing::warn!(event = "manual_intervention_required", reason = "strategy_stopped", stage = "on_fill");
                            return Ok(());
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }
    }

    /// `resync` (§4.6.2 step 3): `reconcile_missing` only runs when the
    /// caller supplied a persisted order set it trusts; otherwise (periodic
    /// reconcile, or a mismatched snapshot) the exchange's own open-order
    /// list is the sole truth handed to `strategy.Reconcile`.
    async fn resync(
        &self,
        strategy: &mut dyn GridStrategy,
        dedup: &mut DedupTracker,
        price: Decimal,
        persisted: Option<Vec<Order>>,
        allow_reconcile_missing: bool,
    ) -> Result<(), RunnerError> {
        let open = self.exchange.open_orders(&self.config.symbol).await.map_err(RunnerError::Transport)?;
        let merged = match (allow_reconcile_missing, persisted) {
            (true, Some(persisted)) => {
                reconcile_missing(self.exchange.as_ref(), &self.config.symbol, &self.store, dedup, &self.alerts, strategy, open, &persisted).await?
            }
            _ => open,
        };
        match strategy.reconcile(price, merged).await {
            Ok(_) => Ok(()),
            Err(StrategyError::Stopped) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn persist_status(
        &self,
        state: RunState,
        last_error: Option<String>,
        reconnect_attempts: u32,
        disconnected_at: Option<i64>,
    ) -> Result<(), RunnerError> {
        let status = RuntimeStatus {
            mode: self.config.mode,
            symbol: self.config.symbol.clone(),
            instance_id: self.config.instance_id.clone(),
            pid: std::process::id(),
            state,
            started_at: self.started_at,
            updated_at: now_millis(),
            last_error,
            reconnect_attempts,
            disconnected_at,
        };
        self.store.write_runtime_status(&status)?;
        Ok(())
    }

    async fn sleep_or_cancel(&mut self, dur: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(dur) => false,
            _ = self.cancel.changed() => true,
        }
    }
}

fn interval_if(secs: u64) -> Option<tokio::time::Interval> {
    if secs == 0 {
        None
    } else {
        Some(tokio::time::interval(Duration::from_secs(secs)))
    }
}

async fn tick_or_pending(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn now_millis() -> i64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}
