//! Signal generation and position lifecycle engine.
//!
//! Everything in here only *decides*. Order execution, persistence and
//! notifications are performed by the caller (`Bot`) through the
//! `Exchange`, `TradeStore` and `Notifier` collaborators.

mod config;
pub mod indicators;
pub mod liquidity;
mod lifecycle;
mod signal;

pub use config::EngineConfig;
pub use lifecycle::{floor_to_step, CloseReason, PositionAction, PositionManager};
pub use signal::{Reason, Signal, SignalGenerator};

use thiserror::Error;

/// Engine-wide error taxonomy.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Transient market-data failure (candles, order book, ticker).
    /// Degrades to "no signal" / "no liquidity" for the current tick.
    #[error("market data unavailable: {0}")]
    DataUnavailable(String),

    /// The exchange refused an order. Fatal for the affected action only.
    #[error("order rejected: {0}")]
    OrderRejected(String),

    /// A candle series is shorter than an indicator requires.
    #[error("insufficient history: need {needed} candles, have {have}")]
    InsufficientHistory { needed: usize, have: usize },
}
