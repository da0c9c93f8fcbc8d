//! Entry signal generation: fuses multi-timeframe trend, momentum, volume,
//! price action and exit liquidity into a single decision.

use rust_decimal::Decimal;
use tracing::debug;

use crate::exchange::{Candle, OrderBookSnapshot};
use crate::models::Direction;

use super::indicators::{ema, rsi, vwap};
use super::liquidity::find_exit_level;
use super::{EngineConfig, EngineError};

/// One condition that contributed to a signal, with the values observed.
///
/// The rationale is informational only; rendering to text happens at the
/// notification layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Reason {
    /// Fast/slow EMA aligned on both timeframes
    TrendAligned {
        short_fast: Decimal,
        short_slow: Decimal,
        long_fast: Decimal,
        long_slow: Decimal,
    },
    /// Current bar volume vs window mean
    VolumeSpike { current: Decimal, mean: Decimal },
    /// RSI inside the neutral zone
    RsiNeutral { value: Decimal },
    /// Close relative to VWAP
    VwapSide { close: Decimal, vwap: Decimal },
    /// Close broke the previous bar's high (long) or low (short)
    Breakout { close: Decimal, reference: Decimal },
    /// Resting counter-side depth found in the exit zone
    ExitLiquidity { price: Decimal, size: Decimal },
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reason::TrendAligned {
                short_fast,
                short_slow,
                ..
            } => {
                let cmp = if short_fast > short_slow { ">" } else { "<" };
                write!(f, "EMA fast {} slow on both timeframes", cmp)
            }
            Reason::VolumeSpike { current, mean } => {
                if mean.is_zero() {
                    write!(f, "volume {:.2} on flat window", current)
                } else {
                    write!(f, "volume {:.1}x average", current / mean)
                }
            }
            Reason::RsiNeutral { value } => write!(f, "RSI {:.0} (neutral)", value),
            Reason::VwapSide { close, vwap } => {
                let side = if close > vwap { "above" } else { "below" };
                write!(f, "close {} VWAP {:.4}", side, vwap)
            }
            Reason::Breakout { close, reference } => {
                let dir = if close > reference { "bullish" } else { "bearish" };
                write!(f, "{} breakout of {:.4}", dir, reference)
            }
            Reason::ExitLiquidity { price, size } => {
                write!(f, "exit liquidity {} @ {:.4}", size, price)
            }
        }
    }
}

/// An entry decision for one symbol on one tick.
#[derive(Debug, Clone)]
pub struct Signal {
    pub direction: Direction,
    pub price: Decimal,
    pub rationale: Vec<Reason>,
}

/// Stateless evaluator combining indicators, price action and the liquidity
/// filter across two timeframes.
pub struct SignalGenerator {
    config: EngineConfig,
}

impl SignalGenerator {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Evaluate one symbol. `short` and `long` are candle series oldest
    /// first; `book` is `None` when the depth fetch failed, which fails the
    /// liquidity conditions closed.
    ///
    /// At most one direction can fire: the trend, VWAP and breakout checks
    /// cannot pass in opposing directions on the same tick.
    pub fn evaluate(
        &self,
        symbol: &str,
        short: &[Candle],
        long: &[Candle],
        book: Option<&OrderBookSnapshot>,
    ) -> Result<Option<Signal>, EngineError> {
        let cfg = &self.config;

        if short.len() < 2 {
            return Err(EngineError::InsufficientHistory {
                needed: 2,
                have: short.len(),
            });
        }
        let current = &short[short.len() - 1];
        let previous = &short[short.len() - 2];

        let short_closes: Vec<Decimal> = short.iter().map(|c| c.close).collect();
        let long_closes: Vec<Decimal> = long.iter().map(|c| c.close).collect();

        let short_fast = ema(&short_closes, cfg.ema_fast_period)?;
        let short_slow = ema(&short_closes, cfg.ema_slow_period)?;
        let long_fast = ema(&long_closes, cfg.ema_fast_period)?;
        let long_slow = ema(&long_closes, cfg.ema_slow_period)?;

        let rsi_value = rsi(&short_closes, cfg.rsi_period)?;
        let vwap_value = vwap(short);

        let mean_volume = short
            .iter()
            .map(|c| c.volume)
            .sum::<Decimal>()
            / Decimal::from(short.len() as u64);

        let trend_bullish = short_fast > short_slow && long_fast > long_slow;
        let trend_bearish = short_fast < short_slow && long_fast < long_slow;
        let rsi_neutral = rsi_value > cfg.rsi_oversold && rsi_value < cfg.rsi_overbought;
        let volume_spiked = current.volume > mean_volume * cfg.volume_spike;
        let bullish_breakout = current.close > previous.high;
        let bearish_breakout = current.close < previous.low;

        // A prospective LONG must be closeable into the asks later;
        // a SHORT into the bids. Missing book data blocks both.
        let sell_side_level = book.and_then(|b| {
            find_exit_level(b, current.close, Direction::Long, cfg.liquidity_zone_pct)
        });
        let buy_side_level = book.and_then(|b| {
            find_exit_level(b, current.close, Direction::Short, cfg.liquidity_zone_pct)
        });

        let direction = if trend_bullish
            && rsi_neutral
            && current.close > vwap_value
            && volume_spiked
            && bullish_breakout
            && sell_side_level.is_some()
        {
            Direction::Long
        } else if trend_bearish
            && rsi_neutral
            && current.close < vwap_value
            && volume_spiked
            && bearish_breakout
            && buy_side_level.is_some()
        {
            Direction::Short
        } else {
            debug!(
                symbol,
                rsi = %rsi_value,
                trend_bullish,
                trend_bearish,
                volume_spiked,
                "no entry conditions met"
            );
            return Ok(None);
        };

        let (breakout_ref, exit_level) = match direction {
            Direction::Long => (previous.high, sell_side_level.unwrap()),
            Direction::Short => (previous.low, buy_side_level.unwrap()),
        };

        let rationale = vec![
            Reason::TrendAligned {
                short_fast,
                short_slow,
                long_fast,
                long_slow,
            },
            Reason::VolumeSpike {
                current: current.volume,
                mean: mean_volume,
            },
            Reason::RsiNeutral { value: rsi_value },
            Reason::VwapSide {
                close: current.close,
                vwap: vwap_value,
            },
            Reason::Breakout {
                close: current.close,
                reference: breakout_ref,
            },
            Reason::ExitLiquidity {
                price: exit_level.price,
                size: exit_level.size,
            },
        ];

        Ok(Some(Signal {
            direction,
            price: current.close,
            rationale,
        }))
    }
}
