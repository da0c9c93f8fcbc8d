//! Exit-liquidity filter: is there resting depth near the price a position
//! would later exit into?

use rust_decimal::Decimal;

use crate::exchange::{OrderBookLevel, OrderBookSnapshot};
use crate::models::Direction;

/// Find the first book level at or beyond the exit zone for a position in
/// `direction`.
///
/// A LONG exits by selling into the asks, so the zone sits `zone_pct`
/// above `price`; a SHORT exits by buying from the bids, so it sits below.
pub fn find_exit_level<'a>(
    book: &'a OrderBookSnapshot,
    price: Decimal,
    direction: Direction,
    zone_pct: Decimal,
) -> Option<&'a OrderBookLevel> {
    let offset = price * zone_pct / Decimal::ONE_HUNDRED;
    match direction {
        Direction::Long => {
            let target = price + offset;
            book.asks.iter().find(|l| l.price >= target)
        }
        Direction::Short => {
            let target = price - offset;
            book.bids.iter().find(|l| l.price <= target)
        }
    }
    .filter(|l| l.size > Decimal::ZERO)
}

/// True iff enough counter-side volume exists near the target exit price.
///
/// Callers must treat a failed book fetch as `false` — the check fails
/// closed and blocks entry rather than aborting the evaluation loop.
pub fn has_exit_liquidity(
    book: &OrderBookSnapshot,
    price: Decimal,
    direction: Direction,
    zone_pct: Decimal,
) -> bool {
    find_exit_level(book, price, direction, zone_pct).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn level(price: Decimal, size: Decimal) -> OrderBookLevel {
        OrderBookLevel { price, size }
    }

    fn book() -> OrderBookSnapshot {
        OrderBookSnapshot {
            asks: vec![
                level(dec!(100.2), dec!(5)),
                level(dec!(100.6), dec!(3)),
                level(dec!(101.0), dec!(8)),
            ],
            bids: vec![
                level(dec!(99.8), dec!(4)),
                level(dec!(99.4), dec!(2)),
                level(dec!(99.0), dec!(6)),
            ],
        }
    }

    #[test]
    fn long_finds_ask_at_or_beyond_zone() {
        // zone = 0.5% of 100 -> target 100.5; first ask >= 100.5 is 100.6
        let b = book();
        let l = find_exit_level(&b, dec!(100), Direction::Long, dec!(0.5)).unwrap();
        assert_eq!(l.price, dec!(100.6));
        assert!(has_exit_liquidity(&b, dec!(100), Direction::Long, dec!(0.5)));
    }

    #[test]
    fn short_finds_bid_at_or_below_zone() {
        // target 99.5; first bid <= 99.5 is 99.4
        let b = book();
        let l = find_exit_level(&b, dec!(100), Direction::Short, dec!(0.5)).unwrap();
        assert_eq!(l.price, dec!(99.4));
    }

    #[test]
    fn empty_book_has_no_liquidity() {
        let empty = OrderBookSnapshot::default();
        assert!(!has_exit_liquidity(&empty, dec!(100), Direction::Long, dec!(0.5)));
        assert!(!has_exit_liquidity(&empty, dec!(100), Direction::Short, dec!(0.5)));
    }

    #[test]
    fn zero_size_level_does_not_count() {
        let mut b = book();
        b.asks = vec![level(dec!(100.6), dec!(0))];
        assert!(!has_exit_liquidity(&b, dec!(100), Direction::Long, dec!(0.5)));
    }

    #[test]
    fn no_level_beyond_target_means_no_liquidity() {
        let mut b = book();
        b.asks = vec![level(dec!(100.1), dec!(10))]; // all below target 100.5
        assert!(!has_exit_liquidity(&b, dec!(100), Direction::Long, dec!(0.5)));
    }
}
