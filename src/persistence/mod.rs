//! SQLite persistence: append-only order and trade history.
//!
//! The log is sufficient to reconstruct the equity curve and performance
//! metrics on restart; nothing here is ever updated in place.

use crate::execution::Order;
use crate::portfolio::TradeRecord;
use crate::signal::SignalDirection;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::info;

/// Append-only order/trade store backed by SQLite.
pub struct TradeStore {
    conn: Mutex<Connection>,
}

impl TradeStore {
    /// Open (and initialize, if needed) the store at the given path.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {:?}", parent))?;
            }
        }
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;

        info!("Trade store initialized at {:?}", db_path.as_ref());
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().expect("trade store lock poisoned");
        conn.execute_batch(
            r#"
            -- Order legs, one row per venue leg placed
            CREATE TABLE IF NOT EXISTS orders (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                order_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                direction TEXT NOT NULL,
                order_type TEXT NOT NULL,
                quantity TEXT NOT NULL,
                price TEXT,
                venue TEXT NOT NULL,
                status TEXT NOT NULL,
                filled_quantity TEXT NOT NULL,
                average_fill_price TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_orders_symbol ON orders(symbol);
            CREATE INDEX IF NOT EXISTS idx_orders_created ON orders(created_at);

            -- Completed round-trip trades
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                direction TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                exit_price TEXT NOT NULL,
                quantity TEXT NOT NULL,
                venue TEXT NOT NULL,
                pnl TEXT NOT NULL,
                return_pct REAL NOT NULL,
                entry_time TEXT NOT NULL,
                exit_time TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_trades_symbol ON trades(symbol);
            CREATE INDEX IF NOT EXISTS idx_trades_exit ON trades(exit_time);
            "#,
        )
        .context("Failed to initialize schema")?;
        Ok(())
    }

    /// Append one order leg.
    pub fn record_order(&self, order: &Order) -> Result<()> {
        let conn = self.conn.lock().expect("trade store lock poisoned");
        conn.execute(
            r#"INSERT INTO orders
               (order_id, symbol, direction, order_type, quantity, price, venue,
                status, filled_quantity, average_fill_price, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
            params![
                order.order_id,
                order.symbol,
                order.direction.to_string(),
                order.order_type.to_string(),
                order.quantity.to_string(),
                order.price.map(|p| p.to_string()),
                order.venue,
                order.status.to_string(),
                order.filled_quantity.to_string(),
                order.average_fill_price.to_string(),
                order.created_at.to_rfc3339(),
            ],
        )
        .context("Failed to insert order")?;
        Ok(())
    }

    /// Append one completed trade.
    pub fn record_trade(&self, trade: &TradeRecord) -> Result<()> {
        let conn = self.conn.lock().expect("trade store lock poisoned");
        conn.execute(
            r#"INSERT INTO trades
               (symbol, direction, entry_price, exit_price, quantity, venue,
                pnl, return_pct, entry_time, exit_time)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"#,
            params![
                trade.symbol,
                trade.direction.to_string(),
                trade.entry_price.to_string(),
                trade.exit_price.to_string(),
                trade.quantity.to_string(),
                trade.venue,
                trade.pnl.to_string(),
                trade.return_pct,
                trade.entry_time.to_rfc3339(),
                trade.exit_time.to_rfc3339(),
            ],
        )
        .context("Failed to insert trade")?;
        Ok(())
    }

    /// Load the full trade history, oldest first.
    pub fn load_trades(&self) -> Result<Vec<TradeRecord>> {
        let conn = self.conn.lock().expect("trade store lock poisoned");
        let mut stmt = conn.prepare(
            r#"SELECT symbol, direction, entry_price, exit_price, quantity, venue,
                      pnl, return_pct, entry_time, exit_time
               FROM trades ORDER BY exit_time ASC"#,
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, f64>(7)?,
                row.get::<_, String>(8)?,
                row.get::<_, String>(9)?,
            ))
        })?;

        let mut trades = Vec::new();
        for row in rows {
            let (
                symbol,
                direction,
                entry_price,
                exit_price,
                quantity,
                venue,
                pnl,
                return_pct,
                entry_time,
                exit_time,
            ) = row?;

            trades.push(TradeRecord {
                symbol,
                direction: parse_direction(&direction)?,
                entry_price: parse_decimal(&entry_price)?,
                exit_price: parse_decimal(&exit_price)?,
                quantity: parse_decimal(&quantity)?,
                venue,
                pnl: parse_decimal(&pnl)?,
                return_pct,
                entry_time: parse_timestamp(&entry_time)?,
                exit_time: parse_timestamp(&exit_time)?,
            });
        }
        Ok(trades)
    }

    /// Number of order rows logged.
    pub fn order_count(&self) -> Result<u64> {
        let conn = self.conn.lock().expect("trade store lock poisoned");
        let count: u64 = conn.query_row("SELECT COUNT(*) FROM orders", [], |row| row.get(0))?;
        Ok(count)
    }
}

fn parse_decimal(value: &str) -> Result<Decimal> {
    Decimal::from_str(value).with_context(|| format!("Invalid decimal in store: {}", value))
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Invalid timestamp in store: {}", value))?
        .with_timezone(&Utc))
}

fn parse_direction(value: &str) -> Result<SignalDirection> {
    match value {
        "LONG" => Ok(SignalDirection::Long),
        "SHORT" => Ok(SignalDirection::Short),
        "NEUTRAL" => Ok(SignalDirection::Neutral),
        other => Err(anyhow!("Invalid direction in store: {}", other)),
    }
}
