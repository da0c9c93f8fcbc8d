//! pulsebot
//!
//! Multi-timeframe futures momentum bot: EMA/RSI/VWAP signal fusion with
//! order-book liquidity confirmation, plus DCA, staged take-profits and a
//! trailing stop per position.

mod bot;
mod db;
mod engine;
mod exchange;
mod models;
mod notify;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::bot::{Bot, BotConfig};
use crate::db::{SqliteStore, TradeStore};
use crate::engine::EngineConfig;
use crate::exchange::{BybitClient, Exchange};
use crate::models::Direction;
use crate::notify::{LogNotifier, Notifier, TelegramNotifier};

/// Futures momentum bot CLI.
#[derive(Parser)]
#[command(name = "pulsebot")]
#[command(about = "Multi-timeframe futures momentum bot", long_about = None)]
struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "sqlite:./pulsebot.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a symbol to the watchlist (e.g. WIFUSDT)
    Watch { symbol: String },

    /// Remove a symbol from the watchlist
    Unwatch { symbol: String },

    /// Show the watchlist
    Watchlist,

    /// Allow the bot to trade
    Enable,

    /// Stop the bot from trading (takes effect between ticks)
    Disable,

    /// Start the trading loop
    Run {
        /// Evaluation interval in seconds
        #[arg(short, long, default_value = "30")]
        interval: u64,

        /// Decide and record without placing real orders
        #[arg(long)]
        dry_run: bool,
    },

    /// Show open positions and performance
    Status,

    /// Show the engine configuration
    Config,

    /// Open a position manually at market
    ForceOpen {
        symbol: String,
        /// long or short
        direction: String,
    },

    /// Close a position manually at market
    ForceClose { symbol: String },
}

/// Live exchange client when credentials are present, otherwise a
/// public-data client with dry-run forced on.
fn build_exchange(dry_run: bool) -> Result<(Arc<dyn Exchange>, bool)> {
    if !dry_run {
        match BybitClient::from_env() {
            Ok(client) => return Ok((Arc::new(client), false)),
            Err(e) => {
                warn!("Exchange credentials not configured: {e}. Running in dry-run mode.");
            }
        }
    }
    Ok((Arc::new(BybitClient::new()?), true))
}

fn build_notifier() -> Arc<dyn Notifier> {
    match TelegramNotifier::from_env() {
        Ok(notifier) => Arc::new(notifier),
        Err(e) => {
            warn!("Telegram not configured: {e}. Notifications go to the log.");
            Arc::new(LogNotifier)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let store = Arc::new(SqliteStore::new(&cli.database).await?);

    match cli.command {
        Commands::Watch { symbol } => {
            let symbol = symbol.to_uppercase();
            if store.watch(&symbol).await? {
                println!("Now watching: {symbol}");
            } else {
                println!("{symbol} is already on the watchlist");
            }
        }

        Commands::Unwatch { symbol } => {
            let symbol = symbol.to_uppercase();
            if store.unwatch(&symbol).await? {
                println!("Stopped watching: {symbol}");
            } else {
                println!("{symbol} is not on the watchlist");
            }
        }

        Commands::Watchlist => {
            let symbols = store.watchlist().await?;
            if symbols.is_empty() {
                println!("Watchlist is empty. Use 'pulsebot watch <symbol>' to add one.");
            } else {
                for symbol in symbols {
                    println!("{symbol}");
                }
            }
        }

        Commands::Enable => {
            store.set_enabled(true).await?;
            println!("Trading enabled.");
        }

        Commands::Disable => {
            store.set_enabled(false).await?;
            println!("Trading disabled. An in-flight tick finishes first.");
        }

        Commands::Run { interval, dry_run } => {
            let symbols = store.watchlist().await?;
            if symbols.is_empty() {
                println!("Watchlist is empty. Use 'pulsebot watch <symbol>' first.");
                return Ok(());
            }
            if !store.is_enabled().await? {
                println!("Trading is disabled. Use 'pulsebot enable' to arm the bot;");
                println!("the loop will idle until then.");
            }

            let (exchange, dry_run) = build_exchange(dry_run)?;
            let notifier = build_notifier();

            let config = BotConfig {
                tick_interval_secs: interval,
                dry_run,
                engine: EngineConfig::default(),
            };

            info!(
                interval,
                dry_run,
                symbols = symbols.len(),
                "Starting pulsebot"
            );
            println!("\n=== pulsebot ===");
            println!("Interval: {interval}s");
            println!(
                "Mode: {}",
                if dry_run {
                    "DRY RUN (no real orders)"
                } else {
                    "LIVE TRADING"
                }
            );
            println!("Watched symbols: {}", symbols.len());
            println!("\nPress Ctrl+C to stop.\n");

            let bot = Bot::new(config, store.clone(), exchange, notifier);
            if let Err(e) = bot.run().await {
                tracing::error!(error = %e, "Bot error");
            }

            let stats = store.stats().await?;
            println!(
                "\nClosed trades: {} (wins {}, losses {}) | realized PnL: {:.4}",
                stats.closed_trades,
                stats.winning_trades,
                stats.losing_trades,
                stats.total_realized_pnl
            );
        }

        Commands::Status => {
            let stats = store.stats().await?;
            let positions = store.open_positions().await?;
            let enabled = store.is_enabled().await?;

            println!("\n=== Status ===");
            println!("Trading:        {}", if enabled { "enabled" } else { "disabled" });
            println!("Open positions: {}", stats.open_positions);
            println!(
                "Closed trades:  {} (wins {}, losses {})",
                stats.closed_trades, stats.winning_trades, stats.losing_trades
            );
            println!("Realized PnL:   {:.4}", stats.total_realized_pnl);

            if !positions.is_empty() {
                println!("\n=== Open Positions ===");
                for pos in &positions {
                    let stop = pos
                        .trailing_stop
                        .map(|s| format!("{s:.6}"))
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "  {} {} size {} @ {:.6} | dca {} | tp1 {} | stop {}",
                        pos.direction,
                        pos.symbol,
                        pos.size,
                        pos.entry_price,
                        pos.dca_level,
                        if pos.tp1_hit { "hit" } else { "-" },
                        stop
                    );
                }
            }
        }

        Commands::Config => {
            let cfg = EngineConfig::default();

            println!("\n=== Engine Configuration ===\n");
            println!("Entry sizing:");
            println!("  Risk per trade:     {}", cfg.risk_per_trade);
            println!("  Quantity step:      {}", cfg.qty_step);

            println!("\nDCA:");
            println!("  Max levels:         {}", cfg.max_dca_levels);
            println!("  Size increase:      {}%", cfg.dca_increase_pct);
            println!("  Trigger:            {}%", cfg.dca_trigger_pct);

            println!("\nTake profit & stop:");
            println!("  TP1:                {}% (close {})", cfg.tp1_pct, cfg.tp1_close_ratio);
            println!("  TP2:                {}%", cfg.tp2_pct);
            println!("  Stop loss:          {}%", cfg.sl_pct);
            println!("  Trail activation:   {}%", cfg.trail_activate_pct);

            println!("\nSignals:");
            println!("  EMA periods:        {}/{}", cfg.ema_fast_period, cfg.ema_slow_period);
            println!(
                "  RSI:                period {} zone {}-{}",
                cfg.rsi_period, cfg.rsi_oversold, cfg.rsi_overbought
            );
            println!("  Volume spike:       {}x", cfg.volume_spike);
            println!("  Liquidity zone:     {}%", cfg.liquidity_zone_pct);
            println!(
                "  Timeframes:         {} x{} / {} x{}",
                cfg.short_timeframe,
                cfg.short_candle_limit,
                cfg.long_timeframe,
                cfg.long_candle_limit
            );
        }

        Commands::ForceOpen { symbol, direction } => {
            let symbol = symbol.to_uppercase();
            let direction = Direction::parse(&direction)
                .ok_or_else(|| anyhow::anyhow!("direction must be 'long' or 'short'"))?;

            let (exchange, dry_run) = build_exchange(false)?;
            let notifier = build_notifier();
            let config = BotConfig {
                dry_run,
                ..BotConfig::default()
            };

            let bot = Bot::new(config, store.clone(), exchange, notifier);
            let position = bot.force_open(&symbol, direction).await?;
            println!(
                "Opened {} {} @ {:.6} (size {})",
                position.direction, position.symbol, position.entry_price, position.size
            );
        }

        Commands::ForceClose { symbol } => {
            let symbol = symbol.to_uppercase();

            let (exchange, dry_run) = build_exchange(false)?;
            let notifier = build_notifier();
            let config = BotConfig {
                dry_run,
                ..BotConfig::default()
            };

            let bot = Bot::new(config, store.clone(), exchange, notifier);
            let position = bot.force_close(&symbol).await?;
            println!(
                "Closed {} {} @ {:.6} (pnl {:.4})",
                position.direction,
                position.symbol,
                position.exit_price.unwrap_or_default(),
                position.realized_pnl.unwrap_or_default()
            );
        }
    }

    Ok(())
}
