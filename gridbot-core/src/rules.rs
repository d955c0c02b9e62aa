//! Decimal rounding and order normalization (C1).
//!
//! No floating point anywhere on this path: everything is `rust_decimal`.

use crate::model::{Order, OrderType, Rules};
use rust_decimal::Decimal;

/// Rounds `value` down to the nearest multiple of `step`. `step <= 0` is a no-op.
pub fn floor_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    (value / step).floor() * step
}

/// Rounds `value` up to the nearest multiple of `step`. `step <= 0` is a no-op.
pub fn ceil_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    (value / step).ceil() * step
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RuleError {
    #[error("invalid order: {0}")]
    InvalidOrder(String),
}

/// Implements spec §4.1 step by step: qty floor/min bump, then price tick
/// floor and min-notional bump depending on order type.
pub fn normalize_order(mut order: Order, rules: &Rules) -> Result<Order, RuleError> {
    if order.qty <= Decimal::ZERO {
        return Err(RuleError::InvalidOrder("qty must be > 0".into()));
    }

    if rules.qty_step > Decimal::ZERO {
        order.qty = floor_to_step(order.qty, rules.qty_step);
        if order.qty <= Decimal::ZERO {
            return Err(RuleError::InvalidOrder("qty floored to zero by qty_step".into()));
        }
    }

    if rules.min_qty > Decimal::ZERO && order.qty < rules.min_qty {
        order.qty = rules.min_qty;
    }

    match order.order_type {
        OrderType::Market => {
            if order.price <= Decimal::ZERO {
                return Ok(order);
            }
            bump_for_min_notional(&mut order, rules);
        }
        OrderType::Limit => {
            if order.price <= Decimal::ZERO {
                return Err(RuleError::InvalidOrder("limit price must be > 0".into()));
            }
            if rules.price_tick > Decimal::ZERO {
                order.price = floor_to_step(order.price, rules.price_tick);
                if order.price <= Decimal::ZERO {
                    return Err(RuleError::InvalidOrder("price floored to zero by price_tick".into()));
                }
            }
            bump_for_min_notional(&mut order, rules);
        }
    }

    Ok(order)
}

fn bump_for_min_notional(order: &mut Order, rules: &Rules) {
    if rules.min_notional <= Decimal::ZERO || order.price <= Decimal::ZERO {
        return;
    }
    let min_qty_for_notional = rules.min_notional / order.price;
    if order.qty >= min_qty_for_notional {
        return;
    }
    let mut qty = min_qty_for_notional;
    if rules.qty_step > Decimal::ZERO {
        qty = ceil_to_step(qty, rules.qty_step);
    }
    if rules.min_qty > Decimal::ZERO && qty < rules.min_qty {
        qty = rules.min_qty;
    }
    order.qty = qty;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{OrderStatus, Side};
    use rust_decimal_macros::dec;

    fn rules(min_qty: Decimal, min_notional: Decimal, price_tick: Decimal, qty_step: Decimal) -> Rules {
        Rules { min_qty, min_notional, price_tick, qty_step }
    }

    fn order(order_type: OrderType, price: Decimal, qty: Decimal) -> Order {
        Order {
            id: String::new(),
            client_id: None,
            symbol: "BTCUSDT".into(),
            side: Side::Buy,
            order_type,
            price,
            qty,
            status: OrderStatus::New,
            created_at: 0,
            grid_index: 0,
        }
    }

    #[test]
    fn qty_floored_to_step() {
        let r = rules(dec!(0), dec!(0), dec!(0), dec!(0.001));
        let o = order(OrderType::Limit, dec!(100), dec!(1.2345));
        let n = normalize_order(o, &r).unwrap();
        assert_eq!(n.qty, dec!(1.234));
    }

    #[test]
    fn qty_bumped_to_min_qty() {
        let r = rules(dec!(0.01), dec!(0), dec!(0), dec!(0));
        let o = order(OrderType::Limit, dec!(100), dec!(0.001));
        let n = normalize_order(o, &r).unwrap();
        assert_eq!(n.qty, dec!(0.01));
    }

    #[test]
    fn limit_price_floored_to_tick() {
        let r = rules(dec!(0), dec!(0), dec!(0.5), dec!(0));
        let o = order(OrderType::Limit, dec!(100.37), dec!(1));
        let n = normalize_order(o, &r).unwrap();
        assert_eq!(n.price, dec!(100.0));
    }

    #[test]
    fn min_notional_bumps_qty() {
        let r = rules(dec!(0), dec!(50), dec!(0), dec!(0.01));
        let o = order(OrderType::Limit, dec!(100), dec!(0.1));
        let n = normalize_order(o, &r).unwrap();
        assert_eq!(n.qty, dec!(0.5));
    }

    #[test]
    fn market_with_nonpositive_price_skips_min_notional() {
        let r = rules(dec!(0), dec!(50), dec!(0), dec!(0));
        let o = order(OrderType::Market, dec!(0), dec!(0.001));
        let n = normalize_order(o, &r).unwrap();
        assert_eq!(n.qty, dec!(0.001));
    }

    #[test]
    fn zero_qty_rejected() {
        let r = rules(dec!(0), dec!(0), dec!(0), dec!(0));
        let o = order(OrderType::Limit, dec!(100), dec!(0));
        assert!(normalize_order(o, &r).is_err());
    }

    #[test]
    fn idempotent() {
        let r = rules(dec!(0.01), dec!(10), dec!(0.1), dec!(0.001));
        let o = order(OrderType::Limit, dec!(100.37), dec!(0.0004));
        let once = normalize_order(o, &r).unwrap();
        let twice = normalize_order(once.clone(), &r).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn no_rounding_when_steps_zero() {
        let r = rules(dec!(0), dec!(0), dec!(0), dec!(0));
        let o = order(OrderType::Limit, dec!(100.123456), dec!(1.23456789));
        let n = normalize_order(o, &r).unwrap();
        assert_eq!(n.price, dec!(100.123456));
        assert_eq!(n.qty, dec!(1.23456789));
    }
}
