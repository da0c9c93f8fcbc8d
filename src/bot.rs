//! Bot runner: the fixed-interval evaluation loop.
//!
//! Each tick scans the watchlist for entry signals and re-evaluates every
//! open position. The engine decides; this module executes decisions
//! against the exchange, persists state and sends notifications. Failures
//! are isolated per symbol / per position so one bad unit of work never
//! stalls the rest of a tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::future::join_all;
use rust_decimal::Decimal;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::TradeStore;
use crate::engine::{
    floor_to_step, CloseReason, EngineConfig, EngineError, PositionAction, PositionManager,
    Signal, SignalGenerator,
};
use crate::exchange::{Exchange, OrderFill, OrderSide};
use crate::models::{Direction, Position};
use crate::notify::Notifier;

/// Bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Seconds between evaluation ticks
    pub tick_interval_secs: u64,

    /// Decide and record without placing real orders
    pub dry_run: bool,

    /// Engine risk knobs
    pub engine: EngineConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 30,
            dry_run: true,
            engine: EngineConfig::default(),
        }
    }
}

/// Main bot runner.
pub struct Bot {
    config: BotConfig,
    store: Arc<dyn TradeStore>,
    exchange: Arc<dyn Exchange>,
    notifier: Arc<dyn Notifier>,
    signals: SignalGenerator,
    manager: PositionManager,
    shutdown: Arc<AtomicBool>,
}

impl Bot {
    pub fn new(
        config: BotConfig,
        store: Arc<dyn TradeStore>,
        exchange: Arc<dyn Exchange>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let signals = SignalGenerator::new(config.engine.clone());
        let manager = PositionManager::new(config.engine.clone());

        Self {
            config,
            store,
            exchange,
            notifier,
            signals,
            manager,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get shutdown signal for external control.
    pub fn shutdown_signal(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Main run loop. The shutdown flag takes effect between ticks; a tick
    /// already in flight runs to completion.
    pub async fn run(&self) -> Result<()> {
        info!(
            dry_run = self.config.dry_run,
            interval = self.config.tick_interval_secs,
            "Starting trading loop"
        );

        let mut poll_interval = interval(Duration::from_secs(self.config.tick_interval_secs));

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        });

        while !self.shutdown.load(Ordering::SeqCst) {
            poll_interval.tick().await;

            if let Err(e) = self.tick().await {
                error!(error = %e, "Error in bot tick");
            }
        }

        info!("Trading loop stopped");
        Ok(())
    }

    /// Single iteration of the main loop.
    async fn tick(&self) -> Result<()> {
        if !self.store.is_enabled().await? {
            debug!("Trading disabled, skipping tick");
            return Ok(());
        }

        self.scan_watchlist().await?;
        self.manage_positions().await?;

        Ok(())
    }

    /// Evaluate every watched symbol for an entry signal. Symbols are
    /// independent and evaluated concurrently; a failure on one degrades
    /// to "no signal" for that symbol only.
    async fn scan_watchlist(&self) -> Result<()> {
        let symbols = self.store.watchlist().await?;
        if symbols.is_empty() {
            return Ok(());
        }

        let evaluations = join_all(symbols.iter().map(|s| self.evaluate_symbol(s))).await;

        for (symbol, signal) in symbols.iter().zip(evaluations) {
            if let Some(signal) = signal {
                if let Err(e) = self.open_position(symbol, &signal).await {
                    warn!(symbol = %symbol, error = %e, "Failed to open position");
                }
            }
        }

        Ok(())
    }

    /// Fetch market data for one symbol and run the signal generator.
    /// Returns `None` on any data failure or when no conditions hold.
    async fn evaluate_symbol(&self, symbol: &str) -> Option<Signal> {
        match self.store.open_position_for(symbol).await {
            Ok(Some(_)) => {
                debug!(symbol, "Position already open, skipping scan");
                return None;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(symbol, error = %e, "Store lookup failed");
                return None;
            }
        }

        let cfg = &self.config.engine;
        let (short, long, book) = tokio::join!(
            self.exchange
                .fetch_candles(symbol, cfg.short_timeframe, cfg.short_candle_limit),
            self.exchange
                .fetch_candles(symbol, cfg.long_timeframe, cfg.long_candle_limit),
            self.exchange.fetch_order_book(symbol),
        );

        let short = match short {
            Ok(candles) => candles,
            Err(e) => {
                warn!(symbol, error = %e, "Candle fetch failed");
                return None;
            }
        };
        let long = match long {
            Ok(candles) => candles,
            Err(e) => {
                warn!(symbol, error = %e, "Candle fetch failed");
                return None;
            }
        };
        // liquidity fails closed on a missing book
        let book = match book {
            Ok(book) => Some(book),
            Err(e) => {
                warn!(symbol, error = %e, "Order book fetch failed");
                None
            }
        };

        match self.signals.evaluate(symbol, &short, &long, book.as_ref()) {
            Ok(signal) => signal,
            Err(e) => {
                warn!(symbol, error = %e, "Signal evaluation failed");
                None
            }
        }
    }

    /// Execute an accepted entry signal.
    async fn open_position(&self, symbol: &str, signal: &Signal) -> Result<()> {
        let cfg = &self.config.engine;
        let qty = floor_to_step(cfg.risk_per_trade / signal.price, cfg.qty_step);
        if qty <= Decimal::ZERO {
            warn!(symbol, price = %signal.price, "Entry size floored to zero, skipping");
            return Ok(());
        }

        let fill = match self
            .execute_order(symbol, signal.direction.entry_side(), qty, signal.price)
            .await
        {
            Ok(fill) => fill,
            Err(e) => {
                // no DB record on a failed entry; other symbols unaffected
                warn!(symbol, error = %e, "Entry order failed");
                self.notifier
                    .notify(&format!(
                        "Failed to open {} {}: {}",
                        signal.direction, symbol, e
                    ))
                    .await;
                return Ok(());
            }
        };

        let position = Position::new(symbol.to_string(), signal.direction, fill.fill_price, qty);
        self.store.insert_position(&position).await?;

        info!(
            symbol,
            direction = %signal.direction,
            price = %fill.fill_price,
            qty = %qty,
            "Position opened"
        );

        let reasons: Vec<String> = signal
            .rationale
            .iter()
            .map(|r| format!("- {r}"))
            .collect();
        self.notifier
            .notify(&format!(
                "{} {} @ {}\nsize: {}\n{}",
                signal.direction,
                symbol,
                fill.fill_price,
                qty,
                reasons.join("\n")
            ))
            .await;

        Ok(())
    }

    /// Re-evaluate every open position against a fresh price.
    ///
    /// Positions are re-read from the store each tick so out-of-band
    /// closes are respected, and evaluated one at a time: a position never
    /// has two evaluations in flight.
    async fn manage_positions(&self) -> Result<()> {
        let positions = self.store.open_positions().await?;

        for mut position in positions {
            let ticker = match self.exchange.fetch_ticker(&position.symbol).await {
                Ok(ticker) => ticker,
                Err(e) => {
                    warn!(symbol = %position.symbol, error = %e, "Ticker fetch failed");
                    continue;
                }
            };

            if let Err(e) = self.manage_position(&mut position, ticker.last).await {
                error!(
                    id = %position.id,
                    symbol = %position.symbol,
                    error = %e,
                    "Position management failed"
                );
            }
        }

        Ok(())
    }

    /// Apply the lifecycle manager's decision for one position.
    async fn manage_position(&self, position: &mut Position, price: Decimal) -> Result<()> {
        let action = self.manager.evaluate(position, price);
        let symbol = position.symbol.clone();

        match action {
            PositionAction::None => {
                // persist trailing-stop movements
                self.store.update_position(position).await?;
            }

            PositionAction::Dca { add_size } => {
                match self
                    .execute_order(&symbol, position.direction.entry_side(), add_size, price)
                    .await
                {
                    Ok(fill) => {
                        self.manager.apply_dca_fill(position, fill.fill_price, add_size);
                        self.store.update_position(position).await?;

                        info!(
                            id = %position.id,
                            symbol = %symbol,
                            level = position.dca_level,
                            entry = %position.entry_price,
                            "DCA executed"
                        );
                        self.notifier
                            .notify(&format!(
                                "DCA level {} on {} {}\nadded {} @ {}\nnew avg entry: {:.6}",
                                position.dca_level,
                                position.direction,
                                symbol,
                                add_size,
                                fill.fill_price,
                                position.entry_price
                            ))
                            .await;
                    }
                    Err(e) => {
                        // the position is now out of sync with its plan;
                        // this needs operator attention, not a silent retry
                        error!(id = %position.id, symbol = %symbol, error = %e, "DCA order failed");
                        self.store.update_position(position).await?;
                        self.notifier
                            .notify(&format!(
                                "DCA failed on {} {}: {} - position needs attention",
                                position.direction, symbol, e
                            ))
                            .await;
                    }
                }
            }

            PositionAction::PartialClose { amount, reason } => {
                match self
                    .execute_order(&symbol, position.direction.exit_side(), amount, price)
                    .await
                {
                    Ok(fill) => {
                        let pnl = self.manager.apply_tp1_fill(position, fill.fill_price, amount);
                        self.store.update_position(position).await?;

                        info!(
                            id = %position.id,
                            symbol = %symbol,
                            amount = %amount,
                            pnl = %pnl,
                            "Partial close executed"
                        );
                        self.notifier
                            .notify(&format!(
                                "{} {} {}: closed {} @ {}\npnl: {:.4}",
                                reason, position.direction, symbol, amount, fill.fill_price, pnl
                            ))
                            .await;
                    }
                    Err(e) => {
                        error!(id = %position.id, symbol = %symbol, error = %e, "Partial close failed");
                        self.store.update_position(position).await?;
                        self.notifier
                            .notify(&format!(
                                "Partial close failed on {} {}: {} - position needs attention",
                                position.direction, symbol, e
                            ))
                            .await;
                    }
                }
            }

            PositionAction::FullClose { reason } => {
                let amount = position.size;
                match self
                    .execute_order(&symbol, position.direction.exit_side(), amount, price)
                    .await
                {
                    Ok(fill) => {
                        let pnl = position.close(fill.fill_price);
                        self.store.update_position(position).await?;

                        info!(
                            id = %position.id,
                            symbol = %symbol,
                            exit = %fill.fill_price,
                            pnl = %pnl,
                            "Position closed"
                        );
                        self.notifier
                            .notify(&format!(
                                "{} {} closed ({})\nentry {} -> exit {}\npnl: {:.4}",
                                position.direction,
                                symbol,
                                reason,
                                position.entry_price,
                                fill.fill_price,
                                pnl
                            ))
                            .await;
                    }
                    Err(e) => {
                        error!(id = %position.id, symbol = %symbol, error = %e, "Close order failed");
                        self.store.update_position(position).await?;
                        self.notifier
                            .notify(&format!(
                                "Close failed on {} {} ({}): {} - position needs attention",
                                position.direction, symbol, reason, e
                            ))
                            .await;
                    }
                }
            }
        }

        Ok(())
    }

    /// Place a market order, or simulate the fill at the mark price when
    /// dry-running.
    async fn execute_order(
        &self,
        symbol: &str,
        side: OrderSide,
        qty: Decimal,
        mark_price: Decimal,
    ) -> Result<OrderFill, EngineError> {
        if self.config.dry_run {
            debug!(symbol, ?side, qty = %qty, "[DRY RUN] Would place market order");
            return Ok(OrderFill {
                order_id: format!("dry-{}", Uuid::new_v4()),
                fill_price: mark_price,
            });
        }

        self.exchange.place_market_order(symbol, side, qty).await
    }

    /// Manual entry at market, bypassing the signal generator.
    pub async fn force_open(&self, symbol: &str, direction: Direction) -> Result<Position> {
        if self.store.open_position_for(symbol).await?.is_some() {
            anyhow::bail!("{symbol} already has an open position");
        }

        let cfg = &self.config.engine;
        let ticker = self.exchange.fetch_ticker(symbol).await?;
        let qty = floor_to_step(cfg.risk_per_trade / ticker.last, cfg.qty_step);
        if qty <= Decimal::ZERO {
            anyhow::bail!("entry size floored to zero at price {}", ticker.last);
        }

        let fill = self
            .execute_order(symbol, direction.entry_side(), qty, ticker.last)
            .await?;

        let position = Position::new(symbol.to_string(), direction, fill.fill_price, qty);
        self.store.insert_position(&position).await?;

        info!(symbol, %direction, price = %fill.fill_price, "Manual entry");
        self.notifier
            .notify(&format!(
                "Manual {} {} @ {}\nsize: {}",
                direction, symbol, fill.fill_price, qty
            ))
            .await;

        Ok(position)
    }

    /// Manual full close at market.
    pub async fn force_close(&self, symbol: &str) -> Result<Position> {
        let Some(mut position) = self.store.open_position_for(symbol).await? else {
            anyhow::bail!("no open position for {symbol}");
        };

        let ticker = self.exchange.fetch_ticker(symbol).await?;
        let fill = self
            .execute_order(
                symbol,
                position.direction.exit_side(),
                position.size,
                ticker.last,
            )
            .await?;

        let pnl = position.close(fill.fill_price);
        self.store.update_position(&position).await?;

        info!(symbol, exit = %fill.fill_price, pnl = %pnl, "Manual close");
        self.notifier
            .notify(&format!(
                "{} {} closed ({})\nentry {} -> exit {}\npnl: {:.4}",
                position.direction,
                symbol,
                CloseReason::Manual,
                position.entry_price,
                fill.fill_price,
                pnl
            ))
            .await;

        Ok(position)
    }
}
