//! Pure price-ladder math (§4.5.1): geometric price-per-level and its
//! inverse, independent of any mutable strategy state so they're trivial to
//! property-test.

use gridbot_core::rules::floor_to_step;
use rust_decimal::Decimal;

/// `price(i) = anchor * sell_ratio^i` for `i > 0`, `anchor` for `i == 0`,
/// `anchor / ratio^(-i)` for `i < 0`. Tick-floored when `price_tick > 0`.
pub fn price_for_level(anchor: Decimal, ratio: Decimal, sell_ratio: Decimal, price_tick: Decimal, level: i32) -> Decimal {
    let raw = match level.cmp(&0) {
        std::cmp::Ordering::Equal => anchor,
        std::cmp::Ordering::Greater => anchor * pow_decimal(sell_ratio, level as u32),
        std::cmp::Ordering::Less => anchor / pow_decimal(ratio, (-level) as u32),
    };
    if price_tick > Decimal::ZERO {
        floor_to_step(raw, price_tick)
    } else {
        raw
    }
}

fn pow_decimal(base: Decimal, exp: u32) -> Decimal {
    let mut acc = Decimal::ONE;
    for _ in 0..exp {
        acc *= base;
    }
    acc
}

/// Scans `[min_level, max_level]` for the level whose tick-floored price
/// equals `price` (itself expected to already be tick-floored by the
/// caller). Returns `None` if no level matches.
pub fn index_for_price(
    anchor: Decimal,
    ratio: Decimal,
    sell_ratio: Decimal,
    price_tick: Decimal,
    min_level: i32,
    max_level: i32,
    price: Decimal,
) -> Option<i32> {
    (min_level..=max_level).find(|&i| price_for_level(anchor, ratio, sell_ratio, price_tick, i) == price)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn anchor_is_level_zero() {
        assert_eq!(price_for_level(dec!(100), dec!(1.1), dec!(1.1), dec!(0), 0), dec!(100));
    }

    #[test]
    fn sell_side_scales_up_geometrically() {
        assert_eq!(price_for_level(dec!(100), dec!(1.1), dec!(1.1), dec!(0), 1), dec!(110.0));
        assert_eq!(price_for_level(dec!(100), dec!(1.1), dec!(1.1), dec!(0), 2), dec!(121.00));
    }

    #[test]
    fn buy_side_scales_down_geometrically() {
        assert_eq!(price_for_level(dec!(100), dec!(1.1), dec!(1.1), dec!(0), -1), dec!(100) / dec!(1.1));
    }

    #[test]
    fn index_for_price_round_trips() {
        let anchor = dec!(100);
        let ratio = dec!(1.1);
        let sell_ratio = dec!(1.1);
        let price_tick = dec!(0.01);
        for i in -3..=3 {
            let p = price_for_level(anchor, ratio, sell_ratio, price_tick, i);
            assert_eq!(index_for_price(anchor, ratio, sell_ratio, price_tick, -3, 3, p), Some(i));
        }
    }

    #[test]
    fn index_for_price_not_found_returns_none() {
        let found = index_for_price(dec!(100), dec!(1.1), dec!(1.1), dec!(0), -2, 2, dec!(12345));
        assert_eq!(found, None);
    }
}
