//! Pure technical indicators over decimal price/volume series.
//!
//! All functions are deterministic and allocation-free; series are ordered
//! oldest first.

use rust_decimal::Decimal;

use crate::exchange::Candle;

use super::EngineError;

/// Exponential moving average, seeded with the first element.
///
/// Returns the final smoothed value only, not the full series.
pub fn ema(closes: &[Decimal], period: usize) -> Result<Decimal, EngineError> {
    let Some((first, rest)) = closes.split_first() else {
        return Err(EngineError::InsufficientHistory { needed: 1, have: 0 });
    };

    let k = Decimal::from(2) / Decimal::from(period as u64 + 1);
    let mut value = *first;
    for close in rest {
        value = *close * k + value * (Decimal::ONE - k);
    }
    Ok(value)
}

/// Relative strength index over the first `period` transitions of the window.
///
/// Requires `period + 1` closes. Returns 100 when the average loss is zero
/// (all moves favorable) and 0 when the average gain is zero; always in
/// [0, 100].
pub fn rsi(closes: &[Decimal], period: usize) -> Result<Decimal, EngineError> {
    let needed = period + 1;
    if closes.len() < needed {
        return Err(EngineError::InsufficientHistory {
            needed,
            have: closes.len(),
        });
    }

    let mut gains = Decimal::ZERO;
    let mut losses = Decimal::ZERO;
    for i in 1..=period {
        let diff = closes[i] - closes[i - 1];
        if diff >= Decimal::ZERO {
            gains += diff;
        } else {
            losses -= diff;
        }
    }

    let avg_gain = gains / Decimal::from(period as u64);
    let avg_loss = losses / Decimal::from(period as u64);

    if avg_loss.is_zero() {
        return Ok(Decimal::ONE_HUNDRED);
    }

    let rs = avg_gain / avg_loss;
    Ok(Decimal::ONE_HUNDRED - Decimal::ONE_HUNDRED / (Decimal::ONE + rs))
}

/// Volume-weighted average price over a candle window.
///
/// Uses the typical price (high + low + close) / 3 per candle. Returns 0
/// when the cumulative volume is zero, signalling "undefined".
pub fn vwap(candles: &[Candle]) -> Decimal {
    let mut price_volume = Decimal::ZERO;
    let mut volume = Decimal::ZERO;

    for c in candles {
        let typical = (c.high + c.low + c.close) / Decimal::from(3);
        price_volume += typical * c.volume;
        volume += c.volume;
    }

    if volume.is_zero() {
        return Decimal::ZERO;
    }
    price_volume / volume
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn candle(high: Decimal, low: Decimal, close: Decimal, volume: Decimal) -> Candle {
        Candle {
            timestamp: Utc::now(),
            open: close,
            high,
            low,
            close,
            volume,
        }
    }

    #[test]
    fn ema_of_single_element_is_that_element() {
        assert_eq!(ema(&[dec!(42)], 9).unwrap(), dec!(42));
    }

    #[test]
    fn ema_of_constant_series_is_constant() {
        let closes = vec![dec!(10); 30];
        assert_eq!(ema(&closes, 9).unwrap(), dec!(10));
    }

    #[test]
    fn ema_tracks_known_value() {
        // seed 1, k = 0.5 for period 3: 1 -> 1.5 -> 2.25
        let closes = [dec!(1), dec!(2), dec!(3)];
        assert_eq!(ema(&closes, 3).unwrap(), dec!(2.25));
    }

    #[test]
    fn ema_is_deterministic() {
        let closes: Vec<Decimal> = (1..=50).map(Decimal::from).collect();
        assert_eq!(ema(&closes, 9).unwrap(), ema(&closes, 9).unwrap());
    }

    #[test]
    fn ema_rejects_empty_input() {
        assert!(matches!(
            ema(&[], 9),
            Err(EngineError::InsufficientHistory { needed: 1, have: 0 })
        ));
    }

    #[test]
    fn rsi_of_monotonic_rise_is_100() {
        let closes: Vec<Decimal> = (1..=15).map(Decimal::from).collect();
        assert_eq!(rsi(&closes, 14).unwrap(), dec!(100));
    }

    #[test]
    fn rsi_of_monotonic_fall_is_0() {
        let closes: Vec<Decimal> = (1..=15).rev().map(Decimal::from).collect();
        assert_eq!(rsi(&closes, 14).unwrap(), dec!(0));
    }

    #[test]
    fn rsi_of_balanced_series_is_mid_range() {
        // alternating +1 / -1 over 14 transitions: avg gain == avg loss
        let mut closes = vec![dec!(100)];
        for i in 0..14 {
            let last = *closes.last().unwrap();
            closes.push(if i % 2 == 0 { last + dec!(1) } else { last - dec!(1) });
        }
        assert_eq!(rsi(&closes, 14).unwrap(), dec!(50));
    }

    #[test]
    fn rsi_requires_period_plus_one_closes() {
        let closes: Vec<Decimal> = (1..=14).map(Decimal::from).collect();
        assert!(matches!(
            rsi(&closes, 14),
            Err(EngineError::InsufficientHistory { needed: 15, have: 14 })
        ));
    }

    #[test]
    fn vwap_weights_by_volume() {
        let candles = vec![
            candle(dec!(12), dec!(8), dec!(10), dec!(100)), // typical 10
            candle(dec!(22), dec!(18), dec!(20), dec!(300)), // typical 20
        ];
        // (10*100 + 20*300) / 400 = 17.5
        assert_eq!(vwap(&candles), dec!(17.5));
    }

    #[test]
    fn vwap_of_zero_volume_is_zero() {
        let candles = vec![
            candle(dec!(12), dec!(8), dec!(10), dec!(0)),
            candle(dec!(22), dec!(18), dec!(20), dec!(0)),
        ];
        assert_eq!(vwap(&candles), dec!(0));
    }
}
