//! Engine configuration: every risk knob is a named, typed field.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::exchange::Timeframe;

/// Configuration for signal generation and position management.
///
/// Percentage fields are expressed in percent units (`1.5` means 1.5%).
/// `dca_trigger_pct` is signed against the position direction: a negative
/// value fires when the position is losing by that much.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    // === Entry sizing ===
    /// Quote-currency risk allocated per trade
    pub risk_per_trade: Decimal,

    /// Minimum tradable quantity step; order sizes are floored to a
    /// multiple of this
    pub qty_step: Decimal,

    // === DCA ===
    /// Maximum number of averaging-in levels per position
    pub max_dca_levels: u32,

    /// Size added per DCA, as a percent of current size
    pub dca_increase_pct: Decimal,

    /// Signed PnL% at or below which a DCA fires (negative)
    pub dca_trigger_pct: Decimal,

    // === Take profit & stop ===
    /// First profit target (partial close)
    pub tp1_pct: Decimal,

    /// Second profit target (full close)
    pub tp2_pct: Decimal,

    /// Fraction of the position closed at TP1
    pub tp1_close_ratio: Decimal,

    /// Stop-loss offset from the reference price
    pub sl_pct: Decimal,

    /// Signed PnL% at which the trailing stop starts tightening
    pub trail_activate_pct: Decimal,

    // === Technical analysis ===
    /// Fast EMA period (both timeframes)
    pub ema_fast_period: usize,

    /// Slow EMA period (both timeframes)
    pub ema_slow_period: usize,

    /// RSI lookback period
    pub rsi_period: usize,

    /// Upper bound of the RSI neutral zone
    pub rsi_overbought: Decimal,

    /// Lower bound of the RSI neutral zone
    pub rsi_oversold: Decimal,

    /// Current volume must exceed mean volume by this multiple
    pub volume_spike: Decimal,

    /// Width of the exit-liquidity zone, as a percent of current price
    pub liquidity_zone_pct: Decimal,

    // === Data windows ===
    /// Short (signal) timeframe
    pub short_timeframe: Timeframe,

    /// Long (trend-confirmation) timeframe
    pub long_timeframe: Timeframe,

    /// Candles fetched on the short timeframe
    pub short_candle_limit: u32,

    /// Candles fetched on the long timeframe
    pub long_candle_limit: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            risk_per_trade: dec!(1),
            qty_step: dec!(1),

            max_dca_levels: 2,
            dca_increase_pct: dec!(50), // 50% more size each DCA
            dca_trigger_pct: dec!(-5),  // DCA at -5% from entry

            tp1_pct: dec!(1.5),
            tp2_pct: dec!(3),
            tp1_close_ratio: dec!(0.5),
            sl_pct: dec!(1),
            trail_activate_pct: dec!(0.5),

            ema_fast_period: 9,
            ema_slow_period: 18,
            rsi_period: 14,
            rsi_overbought: dec!(60),
            rsi_oversold: dec!(40),
            volume_spike: dec!(2),
            liquidity_zone_pct: dec!(0.5),

            short_timeframe: Timeframe::M5,
            long_timeframe: Timeframe::M15,
            short_candle_limit: 50,
            long_candle_limit: 20,
        }
    }
}
