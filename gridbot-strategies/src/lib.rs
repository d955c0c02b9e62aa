//! gridbot-strategies: the grid state machine (C5).
//!
//! ## Modules
//! - `ladder`: pure price-ladder math, no mutable state
//! - `spot_dual`: the `SpotDual` double-sided grid strategy

pub mod ladder;
pub mod spot_dual;

pub use spot_dual::{GridConfig, SpotDual};

use async_trait::async_trait;
use gridbot_core::error::StrategyError;
use gridbot_core::model::{Order, Trade};
use rust_decimal::Decimal;

/// Capability-probe interface the runner drives the strategy through.
/// `init`/`on_fill` are the only operations every strategy must implement;
/// `reconcile`/`stop_now`/`is_stopped` default to no-ops so a future
/// strategy that has nothing to reconcile doesn't need to say so.
#[async_trait]
pub trait GridStrategy: Send {
    async fn init(&mut self, price: Decimal) -> Result<(), StrategyError>;

    async fn on_fill(&mut self, trade: Trade) -> Result<(), StrategyError>;

    async fn reconcile(&mut self, _price: Decimal, _external_open_orders: Vec<Order>) -> Result<Vec<Order>, StrategyError> {
        Ok(Vec::new())
    }

    async fn stop_now(&mut self) -> Result<(), StrategyError> {
        Ok(())
    }

    fn is_stopped(&self) -> bool {
        false
    }
}

#[async_trait]
impl GridStrategy for SpotDual {
    async fn init(&mut self, price: Decimal) -> Result<(), StrategyError> {
        SpotDual::init(self, price).await
    }

    async fn on_fill(&mut self, trade: Trade) -> Result<(), StrategyError> {
        SpotDual::on_fill(self, trade).await
    }

    async fn reconcile(&mut self, price: Decimal, external_open_orders: Vec<Order>) -> Result<Vec<Order>, StrategyError> {
        SpotDual::reconcile(self, price, external_open_orders).await
    }

    async fn stop_now(&mut self) -> Result<(), StrategyError> {
        SpotDual::stop_now(self).await
    }

    fn is_stopped(&self) -> bool {
        SpotDual::is_stopped(self)
    }
}
