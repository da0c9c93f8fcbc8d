//! SQLite persistence: positions, watchlist and the trading-enabled flag.
//!
//! The store is the single source of truth for position state between
//! ticks; the bot re-reads open positions at the start of every tick and
//! never caches them across ticks.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use uuid::Uuid;

use crate::models::{Direction, Position, PositionStatus};

/// Abstract persistence capability consumed by the bot.
#[async_trait]
pub trait TradeStore: Send + Sync {
    async fn insert_position(&self, position: &Position) -> Result<()>;
    /// Update every mutable field in place, keyed by position id.
    async fn update_position(&self, position: &Position) -> Result<()>;
    async fn open_positions(&self) -> Result<Vec<Position>>;
    async fn open_position_for(&self, symbol: &str) -> Result<Option<Position>>;

    async fn watchlist(&self) -> Result<Vec<String>>;
    /// Returns false if the symbol was already watched.
    async fn watch(&self, symbol: &str) -> Result<bool>;
    /// Returns false if the symbol was not watched.
    async fn unwatch(&self, symbol: &str) -> Result<bool>;

    async fn is_enabled(&self) -> Result<bool>;
    async fn set_enabled(&self, enabled: bool) -> Result<()>;

    async fn stats(&self) -> Result<TradeStats>;
}

/// Aggregate numbers for the status report.
#[derive(Debug, Clone, Default)]
pub struct TradeStats {
    pub open_positions: usize,
    pub closed_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub total_realized_pnl: Decimal,
}

/// Position row as stored; prices are TEXT to keep decimal exactness.
#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredPosition {
    id: String,
    symbol: String,
    direction: String,
    entry_price: String,
    size: String,
    dca_level: i64,
    tp1_hit: bool,
    trailing_stop: Option<String>,
    trail_armed: bool,
    status: String,
    exit_price: Option<String>,
    realized_pnl: Option<String>,
    opened_at: String,
    closed_at: Option<String>,
}

fn parse_decimal(s: &str, what: &str) -> Result<Decimal> {
    s.parse()
        .with_context(|| format!("unparsable {what} in position row: {s}"))
}

fn parse_time(s: &str, what: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("unparsable {what} in position row: {s}"))
}

impl TryFrom<StoredPosition> for Position {
    type Error = anyhow::Error;

    fn try_from(row: StoredPosition) -> Result<Self> {
        Ok(Position {
            id: Uuid::parse_str(&row.id).context("unparsable position id")?,
            direction: Direction::parse(&row.direction)
                .with_context(|| format!("unknown direction: {}", row.direction))?,
            status: PositionStatus::parse(&row.status)
                .with_context(|| format!("unknown status: {}", row.status))?,
            entry_price: parse_decimal(&row.entry_price, "entry_price")?,
            size: parse_decimal(&row.size, "size")?,
            dca_level: row.dca_level as u32,
            tp1_hit: row.tp1_hit,
            trailing_stop: row
                .trailing_stop
                .as_deref()
                .map(|s| parse_decimal(s, "trailing_stop"))
                .transpose()?,
            trail_armed: row.trail_armed,
            exit_price: row
                .exit_price
                .as_deref()
                .map(|s| parse_decimal(s, "exit_price"))
                .transpose()?,
            realized_pnl: row
                .realized_pnl
                .as_deref()
                .map(|s| parse_decimal(s, "realized_pnl"))
                .transpose()?,
            opened_at: parse_time(&row.opened_at, "opened_at")?,
            closed_at: row
                .closed_at
                .as_deref()
                .map(|s| parse_time(s, "closed_at"))
                .transpose()?,
            symbol: row.symbol,
        })
    }
}

/// SQLite-backed trade store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        // a pooled in-memory database would give each connection its own db
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                direction TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                size TEXT NOT NULL,
                dca_level INTEGER NOT NULL DEFAULT 0,
                tp1_hit INTEGER NOT NULL DEFAULT 0,
                trailing_stop TEXT,
                trail_armed INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'OPEN',
                exit_price TEXT,
                realized_pnl TEXT,
                opened_at TEXT NOT NULL,
                closed_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS watchlist (
                symbol TEXT PRIMARY KEY,
                added_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bot_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                enabled INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("INSERT OR IGNORE INTO bot_state (id, enabled) VALUES (1, 0)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl TradeStore for SqliteStore {
    async fn insert_position(&self, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO positions (
                id, symbol, direction, entry_price, size, dca_level, tp1_hit,
                trailing_stop, trail_armed, status, exit_price, realized_pnl,
                opened_at, closed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(position.id.to_string())
        .bind(&position.symbol)
        .bind(position.direction.as_str())
        .bind(position.entry_price.to_string())
        .bind(position.size.to_string())
        .bind(position.dca_level as i64)
        .bind(position.tp1_hit)
        .bind(position.trailing_stop.map(|d| d.to_string()))
        .bind(position.trail_armed)
        .bind(position.status.as_str())
        .bind(position.exit_price.map(|d| d.to_string()))
        .bind(position.realized_pnl.map(|d| d.to_string()))
        .bind(position.opened_at.to_rfc3339())
        .bind(position.closed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await
        .context("Failed to insert position")?;

        Ok(())
    }

    async fn update_position(&self, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE positions SET
                entry_price = ?, size = ?, dca_level = ?, tp1_hit = ?,
                trailing_stop = ?, trail_armed = ?, status = ?,
                exit_price = ?, realized_pnl = ?, closed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(position.entry_price.to_string())
        .bind(position.size.to_string())
        .bind(position.dca_level as i64)
        .bind(position.tp1_hit)
        .bind(position.trailing_stop.map(|d| d.to_string()))
        .bind(position.trail_armed)
        .bind(position.status.as_str())
        .bind(position.exit_price.map(|d| d.to_string()))
        .bind(position.realized_pnl.map(|d| d.to_string()))
        .bind(position.closed_at.map(|t| t.to_rfc3339()))
        .bind(position.id.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to update position")?;

        Ok(())
    }

    async fn open_positions(&self) -> Result<Vec<Position>> {
        let rows: Vec<StoredPosition> =
            sqlx::query_as("SELECT * FROM positions WHERE status = 'OPEN' ORDER BY opened_at")
                .fetch_all(&self.pool)
                .await
                .context("Failed to query open positions")?;

        rows.into_iter().map(Position::try_from).collect()
    }

    async fn open_position_for(&self, symbol: &str) -> Result<Option<Position>> {
        let row: Option<StoredPosition> =
            sqlx::query_as("SELECT * FROM positions WHERE status = 'OPEN' AND symbol = ?")
                .bind(symbol)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to query position by symbol")?;

        row.map(Position::try_from).transpose()
    }

    async fn watchlist(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT symbol FROM watchlist ORDER BY symbol")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|(s,)| s).collect())
    }

    async fn watch(&self, symbol: &str) -> Result<bool> {
        let result = sqlx::query("INSERT OR IGNORE INTO watchlist (symbol, added_at) VALUES (?, ?)")
            .bind(symbol)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn unwatch(&self, symbol: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM watchlist WHERE symbol = ?")
            .bind(symbol)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn is_enabled(&self) -> Result<bool> {
        let (enabled,): (bool,) = sqlx::query_as("SELECT enabled FROM bot_state WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;

        Ok(enabled)
    }

    async fn set_enabled(&self, enabled: bool) -> Result<()> {
        sqlx::query("UPDATE bot_state SET enabled = ?, updated_at = ? WHERE id = 1")
            .bind(enabled)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn stats(&self) -> Result<TradeStats> {
        let (open,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM positions WHERE status = 'OPEN'")
                .fetch_one(&self.pool)
                .await?;

        let pnls: Vec<(Option<String>,)> =
            sqlx::query_as("SELECT realized_pnl FROM positions WHERE status = 'CLOSED'")
                .fetch_all(&self.pool)
                .await?;

        let mut stats = TradeStats {
            open_positions: open as usize,
            closed_trades: pnls.len(),
            ..Default::default()
        };

        for (pnl,) in pnls {
            let Some(pnl) = pnl else { continue };
            let pnl = parse_decimal(&pnl, "realized_pnl")?;
            if pnl >= Decimal::ZERO {
                stats.winning_trades += 1;
            } else {
                stats.losing_trades += 1;
            }
            stats.total_realized_pnl += pnl;
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    async fn store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn position_round_trip_preserves_decimals() {
        let store = store().await;
        let mut pos = Position::new("WIFUSDT".into(), Direction::Long, dec!(0.0123), dec!(81));
        pos.trailing_stop = Some(dec!(0.012177));
        store.insert_position(&pos).await.unwrap();

        let loaded = store.open_position_for("WIFUSDT").await.unwrap().unwrap();
        assert_eq!(loaded.id, pos.id);
        assert_eq!(loaded.entry_price, dec!(0.0123));
        assert_eq!(loaded.size, dec!(81));
        assert_eq!(loaded.trailing_stop, Some(dec!(0.012177)));
        assert_eq!(loaded.status, PositionStatus::Open);
    }

    #[tokio::test]
    async fn closed_positions_leave_the_open_set() {
        let store = store().await;
        let mut pos = Position::new("PEPEUSDT".into(), Direction::Short, dec!(100), dec!(10));
        store.insert_position(&pos).await.unwrap();

        pos.close(dec!(95));
        store.update_position(&pos).await.unwrap();

        assert!(store.open_positions().await.unwrap().is_empty());
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.closed_trades, 1);
        assert_eq!(stats.winning_trades, 1);
        assert_eq!(stats.total_realized_pnl, dec!(50));
    }

    #[tokio::test]
    async fn watchlist_is_a_set() {
        let store = store().await;
        assert!(store.watch("WIFUSDT").await.unwrap());
        assert!(!store.watch("WIFUSDT").await.unwrap());
        assert_eq!(store.watchlist().await.unwrap(), vec!["WIFUSDT"]);
        assert!(store.unwatch("WIFUSDT").await.unwrap());
        assert!(!store.unwatch("WIFUSDT").await.unwrap());
    }

    #[tokio::test]
    async fn enabled_flag_defaults_off() {
        let store = store().await;
        assert!(!store.is_enabled().await.unwrap());
        store.set_enabled(true).await.unwrap();
        assert!(store.is_enabled().await.unwrap());
    }
}
