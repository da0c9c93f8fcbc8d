//! Exchange connectivity: market data and order execution.

mod bybit;
mod types;

pub use bybit::BybitClient;
pub use types::{Candle, OrderBookLevel, OrderBookSnapshot, OrderFill, OrderSide, Ticker, Timeframe};

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::engine::EngineError;

/// Abstract exchange capability consumed by the engine's caller.
///
/// Market-data methods fail with [`EngineError::DataUnavailable`];
/// order placement additionally fails with [`EngineError::OrderRejected`].
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Historical candles, oldest first.
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: u32,
    ) -> Result<Vec<Candle>, EngineError>;

    /// Current order book depth.
    async fn fetch_order_book(&self, symbol: &str) -> Result<OrderBookSnapshot, EngineError>;

    /// Last traded price.
    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, EngineError>;

    /// Place a market order and report the (estimated) fill.
    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        qty: Decimal,
    ) -> Result<OrderFill, EngineError>;
}
