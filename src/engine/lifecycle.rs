//! Per-position lifecycle: DCA escalation, staged take-profits and the
//! dynamic trailing stop.

use rust_decimal::Decimal;
use tracing::debug;

use crate::models::{Direction, Position};

use super::EngineConfig;

/// Why a close action was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    TakeProfit1,
    TakeProfit2,
    TrailingStop,
    Manual,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CloseReason::TakeProfit1 => "TP1",
            CloseReason::TakeProfit2 => "TP2",
            CloseReason::TrailingStop => "trailing stop",
            CloseReason::Manual => "manual close",
        };
        f.write_str(s)
    }
}

/// What a position requires this tick. The caller executes; the manager
/// only decides.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionAction {
    None,
    /// Add `add_size` to the position at market
    Dca { add_size: Decimal },
    /// Close `amount` of the position at market
    PartialClose {
        amount: Decimal,
        reason: CloseReason,
    },
    /// Close the remaining position at market
    FullClose { reason: CloseReason },
}

/// Floor `qty` down to a multiple of `step`. Fractional remainders stay in
/// the position rather than being rounded up.
pub fn floor_to_step(qty: Decimal, step: Decimal) -> Decimal {
    if step.is_zero() {
        return qty;
    }
    (qty / step).floor() * step
}

/// The per-position state machine.
///
/// Evaluation order is fixed; the first matching check wins the tick:
/// DCA, then trailing-stop maintenance (state only, falls through), then
/// TP1, TP2 and the trailing trigger.
pub struct PositionManager {
    config: EngineConfig,
}

impl PositionManager {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Stop price at the configured loss-side offset from `reference`.
    fn stop_from(&self, reference: Decimal, direction: Direction) -> Decimal {
        reference * (Decimal::ONE - direction.sign() * self.config.sl_pct / Decimal::ONE_HUNDRED)
    }

    /// Evaluate one OPEN position against a fresh price. Mutates only the
    /// trailing-stop fields; every other mutation happens when the caller
    /// applies a fill.
    pub fn evaluate(&self, position: &mut Position, price: Decimal) -> PositionAction {
        if !position.is_open() || position.size.is_zero() {
            return PositionAction::None;
        }

        let cfg = &self.config;
        let pnl_pct = position.signed_pnl_pct(price);

        // 1. DCA: averaging-in pre-empts every other check this tick.
        if position.dca_level < cfg.max_dca_levels && pnl_pct <= cfg.dca_trigger_pct {
            let add_size = floor_to_step(
                position.size * cfg.dca_increase_pct / Decimal::ONE_HUNDRED,
                cfg.qty_step,
            );
            if add_size > Decimal::ZERO {
                return PositionAction::Dca { add_size };
            }
            debug!(id = %position.id, "DCA size floored to zero, skipping");
        }

        // 2. Trailing stop: initialize on the loss side, then tighten once
        // the activation threshold is reached. Never moves against the
        // position, never crosses breakeven in the unfavorable direction.
        if position.trailing_stop.is_none() {
            position.trailing_stop = Some(self.stop_from(position.entry_price, position.direction));
        }
        if pnl_pct >= cfg.trail_activate_pct {
            let candidate = self.stop_from(price, position.direction);
            let candidate = match position.direction {
                Direction::Long => candidate.max(position.entry_price),
                Direction::Short => candidate.min(position.entry_price),
            };
            let current = position.trailing_stop.unwrap_or(candidate);
            let improved = match position.direction {
                Direction::Long => candidate.max(current),
                Direction::Short => candidate.min(current),
            };
            position.trailing_stop = Some(improved);
            position.trail_armed = true;
        }

        // 3. First profit target: close a fraction, position stays OPEN.
        if !position.tp1_hit && pnl_pct >= cfg.tp1_pct {
            let amount = floor_to_step(position.size * cfg.tp1_close_ratio, cfg.qty_step);
            if amount > Decimal::ZERO {
                return PositionAction::PartialClose {
                    amount,
                    reason: CloseReason::TakeProfit1,
                };
            }
        }

        // 4. Second profit target: close the remainder.
        if position.tp1_hit && pnl_pct >= cfg.tp2_pct {
            return PositionAction::FullClose {
                reason: CloseReason::TakeProfit2,
            };
        }

        // 5. Trailing stop trigger.
        if position.trail_armed {
            if let Some(stop) = position.trailing_stop {
                let crossed = match position.direction {
                    Direction::Long => price <= stop,
                    Direction::Short => price >= stop,
                };
                if crossed {
                    return PositionAction::FullClose {
                        reason: CloseReason::TrailingStop,
                    };
                }
            }
        }

        PositionAction::None
    }

    /// Fold an executed DCA fill into the position and reset the stop
    /// reference from the new average entry.
    pub fn apply_dca_fill(&self, position: &mut Position, fill_price: Decimal, add_size: Decimal) {
        position.add_fill(fill_price, add_size);
        position.trailing_stop = Some(self.stop_from(position.entry_price, position.direction));
        position.trail_armed = false;
    }

    /// Fold an executed TP1 fill into the position. Returns the realized
    /// PnL of the fill.
    pub fn apply_tp1_fill(
        &self,
        position: &mut Position,
        fill_price: Decimal,
        amount: Decimal,
    ) -> Decimal {
        let pnl = position.reduce(fill_price, amount);
        position.tp1_hit = true;
        pnl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn manager() -> PositionManager {
        PositionManager::new(EngineConfig::default())
    }

    fn open_long(entry: Decimal, size: Decimal) -> Position {
        Position::new("WIFUSDT".to_string(), Direction::Long, entry, size)
    }

    fn open_short(entry: Decimal, size: Decimal) -> Position {
        Position::new("WIFUSDT".to_string(), Direction::Short, entry, size)
    }

    #[test]
    fn floor_to_step_truncates() {
        assert_eq!(floor_to_step(dec!(10.999), dec!(1)), dec!(10));
        assert_eq!(floor_to_step(dec!(0.37), dec!(0.1)), dec!(0.3));
        assert_eq!(floor_to_step(dec!(5), dec!(0)), dec!(5));
    }

    #[test]
    fn staged_take_profit_long() {
        let m = manager();
        let mut pos = open_long(dec!(100), dec!(100));

        // +1.5% hits TP1 for half the size
        let action = m.evaluate(&mut pos, dec!(101.5));
        assert_eq!(
            action,
            PositionAction::PartialClose {
                amount: dec!(50),
                reason: CloseReason::TakeProfit1
            }
        );
        let pnl = m.apply_tp1_fill(&mut pos, dec!(101.5), dec!(50));
        assert_eq!(pnl, dec!(75));
        assert!(pos.tp1_hit);
        assert_eq!(pos.size, dec!(50));
        assert!(pos.is_open());

        // +3% closes the remainder
        let action = m.evaluate(&mut pos, dec!(103));
        assert_eq!(
            action,
            PositionAction::FullClose {
                reason: CloseReason::TakeProfit2
            }
        );
        let pnl = pos.close(dec!(103));
        assert_eq!(pnl, dec!(150));
    }

    #[test]
    fn tp2_requires_tp1_first() {
        let m = manager();
        let mut pos = open_long(dec!(100), dec!(100));

        // straight to +3%: still a TP1 partial, not a full close
        let action = m.evaluate(&mut pos, dec!(103));
        assert_eq!(
            action,
            PositionAction::PartialClose {
                amount: dec!(50),
                reason: CloseReason::TakeProfit1
            }
        );
    }

    #[test]
    fn dca_fires_on_adverse_move_and_preempts() {
        let m = manager();
        let mut pos = open_short(dec!(100), dec!(10));

        // price up 5% is -5% signed for a SHORT
        let action = m.evaluate(&mut pos, dec!(105));
        assert_eq!(action, PositionAction::Dca { add_size: dec!(5) });

        m.apply_dca_fill(&mut pos, dec!(105), dec!(5));
        assert_eq!(pos.dca_level, 1);
        assert_eq!(pos.size, dec!(15));
        assert_eq!(pos.entry_price.round_dp(3), dec!(101.667));
        // stop reference recomputed above the new average entry for a SHORT
        assert_eq!(
            pos.trailing_stop,
            Some(pos.entry_price * dec!(1.01))
        );
        assert!(!pos.trail_armed);
    }

    #[test]
    fn dca_respects_level_cap() {
        let m = manager();
        let mut pos = open_long(dec!(100), dec!(16));
        pos.dca_level = 2; // default max

        let action = m.evaluate(&mut pos, dec!(90));
        assert_eq!(action, PositionAction::None);
    }

    /// Config with take-profits pushed out of reach, isolating the
    /// trailing-stop path.
    fn trail_only_config() -> EngineConfig {
        let mut cfg = EngineConfig::default();
        cfg.tp1_pct = dec!(1000);
        cfg.tp2_pct = dec!(2000);
        cfg
    }

    #[test]
    fn trailing_stop_arms_at_breakeven_floor() {
        let m = PositionManager::new(trail_only_config());
        let mut pos = open_long(dec!(100), dec!(100));

        // below activation: stop initialized on the loss side, not armed
        assert_eq!(m.evaluate(&mut pos, dec!(100.1)), PositionAction::None);
        assert_eq!(pos.trailing_stop, Some(dec!(99.000)));
        assert!(!pos.trail_armed);

        // +0.6%: candidate 100.6*0.99 = 99.594 clamps up to breakeven
        assert_eq!(m.evaluate(&mut pos, dec!(100.6)), PositionAction::None);
        assert_eq!(pos.trailing_stop, Some(dec!(100)));
        assert!(pos.trail_armed);

        // big move tightens the stop
        assert_eq!(m.evaluate(&mut pos, dec!(110)), PositionAction::None);
        assert_eq!(pos.trailing_stop.unwrap().round_dp(2), dec!(108.90));

        // reversal to the stop triggers a full close
        let action = m.evaluate(&mut pos, dec!(108.9));
        assert_eq!(
            action,
            PositionAction::FullClose {
                reason: CloseReason::TrailingStop
            }
        );
    }

    #[test]
    fn unarmed_stop_does_not_trigger() {
        let m = manager();
        let mut pos = open_long(dec!(100), dec!(100));
        pos.dca_level = 2; // keep DCA out of the way

        // -2% sits past the initial stop, but trailing never activated
        let action = m.evaluate(&mut pos, dec!(98));
        assert_eq!(action, PositionAction::None);
        assert!(!pos.trail_armed);
    }

    #[test]
    fn short_trailing_mirrors_long() {
        let m = PositionManager::new(trail_only_config());
        let mut pos = open_short(dec!(100), dec!(100));

        // favorable move for a SHORT: price down
        assert_eq!(m.evaluate(&mut pos, dec!(99)), PositionAction::None);
        // candidate 99*1.01 = 99.99, ceiling at breakeven 100 keeps 99.99
        assert_eq!(pos.trailing_stop.unwrap().round_dp(2), dec!(99.99));
        assert!(pos.trail_armed);

        assert_eq!(m.evaluate(&mut pos, dec!(90)), PositionAction::None);
        assert_eq!(pos.trailing_stop.unwrap().round_dp(2), dec!(90.90));

        let action = m.evaluate(&mut pos, dec!(90.9));
        assert_eq!(
            action,
            PositionAction::FullClose {
                reason: CloseReason::TrailingStop
            }
        );
    }

    #[test]
    fn closed_position_is_a_no_op() {
        let m = manager();
        let mut pos = open_long(dec!(100), dec!(100));
        pos.close(dec!(103));

        assert_eq!(m.evaluate(&mut pos, dec!(50)), PositionAction::None);
        assert_eq!(m.evaluate(&mut pos, dec!(500)), PositionAction::None);
    }

    #[test]
    fn partial_close_amount_floors_to_step() {
        let mut cfg = EngineConfig::default();
        cfg.qty_step = dec!(1);
        let m = PositionManager::new(cfg);
        let mut pos = open_long(dec!(100), dec!(25));

        // 25 * 0.5 = 12.5 floors to 12; the remainder stays in the position
        let action = m.evaluate(&mut pos, dec!(101.5));
        assert_eq!(
            action,
            PositionAction::PartialClose {
                amount: dec!(12),
                reason: CloseReason::TakeProfit1
            }
        );
    }

    proptest! {
        /// Once set, a LONG trailing stop never decreases across ticks for
        /// any price path (DCA disabled, since it deliberately resets the
        /// stop reference from the new average entry).
        #[test]
        fn long_trailing_stop_is_monotone(path in prop::collection::vec(50u32..200, 1..60)) {
            let mut cfg = EngineConfig::default();
            cfg.max_dca_levels = 0;
            let m = PositionManager::new(cfg);
            let mut pos = open_long(dec!(100), dec!(100));

            let mut last_stop: Option<Decimal> = None;
            for p in path {
                let price = Decimal::from(p);
                let action = m.evaluate(&mut pos, price);
                if let (Some(prev), Some(now)) = (last_stop, pos.trailing_stop) {
                    prop_assert!(now >= prev, "stop loosened: {} -> {}", prev, now);
                }
                last_stop = pos.trailing_stop;
                if matches!(action, PositionAction::FullClose { .. }) {
                    break;
                }
            }
        }

        /// SHORT mirror: the stop never increases once set.
        #[test]
        fn short_trailing_stop_is_monotone(path in prop::collection::vec(50u32..200, 1..60)) {
            let mut cfg = EngineConfig::default();
            cfg.max_dca_levels = 0;
            let m = PositionManager::new(cfg);
            let mut pos = open_short(dec!(100), dec!(100));

            let mut last_stop: Option<Decimal> = None;
            for p in path {
                let price = Decimal::from(p);
                let action = m.evaluate(&mut pos, price);
                if let (Some(prev), Some(now)) = (last_stop, pos.trailing_stop) {
                    prop_assert!(now <= prev, "stop loosened: {} -> {}", prev, now);
                }
                last_stop = pos.trailing_stop;
                if matches!(action, PositionAction::FullClose { .. }) {
                    break;
                }
            }
        }
    }
}
