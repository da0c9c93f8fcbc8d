//! Position entity: the single piece of state carried across ticks.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::exchange::OrderSide;

/// Which way a position is exposed. Immutable after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for LONG, -1 for SHORT. Multiplying a raw price delta by this
    /// yields a value that is positive when the position is in profit.
    pub fn sign(&self) -> Decimal {
        match self {
            Direction::Long => Decimal::ONE,
            Direction::Short => Decimal::NEGATIVE_ONE,
        }
    }

    /// Order side that opens (or adds to) the position.
    pub fn entry_side(&self) -> OrderSide {
        match self {
            Direction::Long => OrderSide::Buy,
            Direction::Short => OrderSide::Sell,
        }
    }

    /// Order side that reduces or closes the position.
    pub fn exit_side(&self) -> OrderSide {
        match self {
            Direction::Long => OrderSide::Sell,
            Direction::Short => OrderSide::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "LONG" => Some(Direction::Long),
            "SHORT" => Some(Direction::Short),
            _ => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state. CLOSED is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "OPEN",
            PositionStatus::Closed => "CLOSED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "OPEN" => Some(PositionStatus::Open),
            "CLOSED" => Some(PositionStatus::Closed),
            _ => None,
        }
    }
}

/// An open or closed futures position.
///
/// `entry_price` is the volume-weighted average of all fills so far and is
/// only touched by DCA fills; partial closes leave it alone. The trailing
/// stop belongs to the lifecycle manager — it lives here so it survives
/// between ticks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Engine-assigned id, independent of any exchange order id
    pub id: Uuid,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub size: Decimal,
    pub dca_level: u32,
    pub tp1_hit: bool,
    /// Stop reference; starts on the loss side of the entry
    pub trailing_stop: Option<Decimal>,
    /// True once the trail-activation threshold has been reached
    pub trail_armed: bool,
    pub status: PositionStatus,
    pub exit_price: Option<Decimal>,
    /// PnL realized by the closing fill; set once at CLOSED
    pub realized_pnl: Option<Decimal>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Position {
    /// Create a new OPEN position from an entry fill.
    pub fn new(symbol: String, direction: Direction, entry_price: Decimal, size: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol,
            direction,
            entry_price,
            size,
            dca_level: 0,
            tp1_hit: false,
            trailing_stop: None,
            trail_armed: false,
            status: PositionStatus::Open,
            exit_price: None,
            realized_pnl: None,
            opened_at: Utc::now(),
            closed_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// PnL percentage normalized so positive always means favorable to the
    /// position's direction.
    pub fn signed_pnl_pct(&self, price: Decimal) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        self.direction.sign() * (price - self.entry_price) / self.entry_price
            * Decimal::ONE_HUNDRED
    }

    /// Fold a DCA fill into the position: entry price becomes the
    /// size-weighted average of the old position and the new fill, and the
    /// DCA level increments by one.
    pub fn add_fill(&mut self, fill_price: Decimal, add_size: Decimal) {
        let new_size = self.size + add_size;
        if !new_size.is_zero() {
            self.entry_price =
                (self.entry_price * self.size + fill_price * add_size) / new_size;
        }
        self.size = new_size;
        self.dca_level += 1;
    }

    /// Reduce the position by `amount` at `fill_price`, returning the PnL
    /// realized by this fill. The entry price is not touched. Never closes
    /// more than the current size.
    pub fn reduce(&mut self, fill_price: Decimal, amount: Decimal) -> Decimal {
        let amount = amount.min(self.size);
        self.size -= amount;
        (fill_price - self.entry_price) * amount * self.direction.sign()
    }

    /// Close the whole position at `fill_price`. Returns the realized PnL of
    /// the closing fill. A second call is a no-op returning zero.
    pub fn close(&mut self, fill_price: Decimal) -> Decimal {
        if !self.is_open() {
            return Decimal::ZERO;
        }
        let pnl = (fill_price - self.entry_price) * self.size * self.direction.sign();
        self.size = Decimal::ZERO;
        self.status = PositionStatus::Closed;
        self.exit_price = Some(fill_price);
        self.realized_pnl = Some(pnl);
        self.closed_at = Some(Utc::now());
        pnl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn long(entry: Decimal, size: Decimal) -> Position {
        Position::new("WIFUSDT".to_string(), Direction::Long, entry, size)
    }

    #[test]
    fn signed_pnl_is_direction_normalized() {
        let pos = long(dec!(100), dec!(10));
        assert_eq!(pos.signed_pnl_pct(dec!(105)), dec!(5));
        assert_eq!(pos.signed_pnl_pct(dec!(95)), dec!(-5));

        let short = Position::new("WIFUSDT".into(), Direction::Short, dec!(100), dec!(10));
        assert_eq!(short.signed_pnl_pct(dec!(95)), dec!(5));
        assert_eq!(short.signed_pnl_pct(dec!(105)), dec!(-5));
    }

    #[test]
    fn add_fill_weights_entry_by_size() {
        let mut pos = Position::new("WIFUSDT".into(), Direction::Short, dec!(100), dec!(10));
        pos.add_fill(dec!(105), dec!(5));

        assert_eq!(pos.size, dec!(15));
        assert_eq!(pos.dca_level, 1);
        // (100*10 + 105*5) / 15
        assert_eq!(pos.entry_price.round_dp(3), dec!(101.667));
    }

    #[test]
    fn reduce_realizes_pnl_and_keeps_entry() {
        let mut pos = long(dec!(100), dec!(100));
        let pnl = pos.reduce(dec!(101.5), dec!(50));

        assert_eq!(pnl, dec!(75));
        assert_eq!(pos.size, dec!(50));
        assert_eq!(pos.entry_price, dec!(100));
        assert!(pos.is_open());
    }

    #[test]
    fn reduce_never_closes_more_than_size() {
        let mut pos = long(dec!(100), dec!(10));
        let pnl = pos.reduce(dec!(110), dec!(25));

        assert_eq!(pnl, dec!(100));
        assert_eq!(pos.size, dec!(0));
    }

    #[test]
    fn close_is_terminal_and_idempotent() {
        let mut pos = long(dec!(100), dec!(50));
        let pnl = pos.close(dec!(103));

        assert_eq!(pnl, dec!(150));
        assert_eq!(pos.status, PositionStatus::Closed);
        assert_eq!(pos.exit_price, Some(dec!(103)));
        assert_eq!(pos.realized_pnl, Some(dec!(150)));

        // further closes are no-ops; nothing moves
        assert_eq!(pos.close(dec!(999)), dec!(0));
        assert_eq!(pos.exit_price, Some(dec!(103)));
        assert_eq!(pos.realized_pnl, Some(dec!(150)));
    }

    #[test]
    fn short_close_pnl_sign() {
        let mut pos = Position::new("WIFUSDT".into(), Direction::Short, dec!(100), dec!(10));
        let pnl = pos.close(dec!(95));
        assert_eq!(pnl, dec!(50));
    }
}
