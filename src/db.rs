use crate::errors::{EngineError, EngineResult};
use crate::state::DbCommand;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub type DbPool = Arc<Mutex<Connection>>;

const SCHEMA: &str = include_str!("../migrations/001_init.sql");

pub fn init_db(data_dir: &Path) -> EngineResult<DbPool> {
    std::fs::create_dir_all(data_dir).map_err(|e| EngineError::Database(format!("create dir: {e}")))?;
    let db_path = data_dir.join("flavor_market.db");
    let conn = Connection::open(&db_path)?;

    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA cache_size=-64000;")?;
    conn.execute_batch(SCHEMA)?;

    tracing::info!("database initialized at {}", db_path.display());
    Ok(Arc::new(Mutex::new(conn)))
}

/// Schema-initialized in-memory database.
pub fn init_memory_db() -> EngineResult<DbPool> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch(SCHEMA)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// Dedicated DB writer task. Reads commands from bounded channel, executes SQL.
/// This is the ONLY task that writes through the connection.
pub async fn run_db_writer(db: DbPool, mut rx: mpsc::Receiver<DbCommand>) {
    tracing::info!("db writer task started");

    while let Some(cmd) = rx.recv().await {
        if let Err(e) = execute_command(&db, cmd) {
            tracing::error!("db write error: {e}");
        }
    }

    tracing::info!("db writer task shutting down");
}

fn lock(db: &DbPool) -> EngineResult<std::sync::MutexGuard<'_, Connection>> {
    db.lock().map_err(|e| EngineError::Database(format!("lock poisoned: {e}")))
}

pub fn execute_command(db: &DbPool, cmd: DbCommand) -> EngineResult<()> {
    let conn = lock(db)?;

    match cmd {
        DbCommand::InsertPrice { day, flavor, price, jump, timestamp } => {
            conn.execute(
                "INSERT INTO flavor_prices (day, flavor, price, jump, timestamp) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![day as i64, flavor, price, jump, timestamp],
            )?;
        }
        DbCommand::InsertPosition {
            id, flavor, instrument, quantity, entry_price, opened_day, opened_at,
        } => {
            conn.execute(
                "INSERT INTO positions (id, flavor, instrument, quantity, entry_price, opened_day, opened_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![id, flavor, instrument, quantity, entry_price, opened_day as i64, opened_at],
            )?;
        }
        DbCommand::SettlePosition { id, exit_value, pnl, closed_day, closed_at } => {
            conn.execute(
                "UPDATE positions SET exit_value = ?1, pnl = ?2, closed_day = ?3, closed_at = ?4 WHERE id = ?5",
                rusqlite::params![exit_value, pnl, closed_day as i64, closed_at, id],
            )?;
        }
        DbCommand::InsertPortfolioSnapshot {
            day, timestamp, market_value, unrealized_pnl, realized_pnl, greeks,
        } => {
            conn.execute(
                "INSERT INTO portfolio_snapshots (day, timestamp, market_value, unrealized_pnl, realized_pnl, delta, gamma, theta, vega, rho)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    day as i64, timestamp, market_value, unrealized_pnl, realized_pnl,
                    greeks.delta, greeks.gamma, greeks.theta, greeks.vega, greeks.rho
                ],
            )?;
        }
    }
    Ok(())
}

// ── Query helpers (for server REST reads -- these DO lock, but only from cold path) ──

/// Most recent `limit` prices of one flavor, oldest first.
pub fn get_price_history(db: &DbPool, flavor: &str, limit: usize) -> EngineResult<Vec<PriceRow>> {
    let conn = lock(db)?;
    let mut stmt = conn.prepare(
        "SELECT day, flavor, price, jump, timestamp FROM flavor_prices WHERE flavor = ?1 ORDER BY day DESC, id DESC LIMIT ?2",
    )?;
    let rows = stmt.query_map(rusqlite::params![flavor, limit as i64], |row| {
        Ok(PriceRow {
            day: row.get(0)?,
            flavor: row.get(1)?,
            price: row.get(2)?,
            jump: row.get(3)?,
            timestamp: row.get(4)?,
        })
    })?;
    let mut history: Vec<_> = rows.filter_map(|r| r.ok()).collect();
    history.reverse();
    Ok(history)
}

pub fn get_positions(db: &DbPool, limit: usize) -> EngineResult<Vec<PositionRow>> {
    let conn = lock(db)?;
    let mut stmt = conn.prepare(
        "SELECT id, flavor, instrument, quantity, entry_price, opened_day, opened_at, exit_value, pnl, closed_day, closed_at
         FROM positions ORDER BY opened_day DESC, opened_at DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(rusqlite::params![limit as i64], |row| {
        let instrument: String = row.get(2)?;
        Ok(PositionRow {
            id: row.get(0)?,
            flavor: row.get(1)?,
            instrument: serde_json::from_str(&instrument).unwrap_or(serde_json::Value::String(instrument)),
            quantity: row.get(3)?,
            entry_price: row.get(4)?,
            opened_day: row.get(5)?,
            opened_at: row.get(6)?,
            exit_value: row.get(7)?,
            pnl: row.get(8)?,
            closed_day: row.get(9)?,
            closed_at: row.get(10)?,
        })
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// Portfolio value series, oldest first.
pub fn get_portfolio_series(db: &DbPool, limit: usize) -> EngineResult<Vec<PortfolioRow>> {
    let conn = lock(db)?;
    let mut stmt = conn.prepare(
        "SELECT day, timestamp, market_value, unrealized_pnl, realized_pnl, delta FROM portfolio_snapshots ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(rusqlite::params![limit as i64], |row| {
        Ok(PortfolioRow {
            day: row.get(0)?,
            timestamp: row.get(1)?,
            market_value: row.get(2)?,
            unrealized_pnl: row.get(3)?,
            realized_pnl: row.get(4)?,
            delta: row.get(5)?,
        })
    })?;
    let mut series: Vec<_> = rows.filter_map(|r| r.ok()).collect();
    series.reverse();
    Ok(series)
}

// ── Row types ──

#[derive(Debug, Clone, serde::Serialize)]
pub struct PriceRow {
    pub day: i64,
    pub flavor: String,
    pub price: f64,
    pub jump: f64,
    pub timestamp: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PositionRow {
    pub id: String,
    pub flavor: String,
    pub instrument: serde_json::Value,
    pub quantity: f64,
    pub entry_price: f64,
    pub opened_day: i64,
    pub opened_at: String,
    pub exit_value: Option<f64>,
    pub pnl: Option<f64>,
    pub closed_day: Option<i64>,
    pub closed_at: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PortfolioRow {
    pub day: i64,
    pub timestamp: String,
    pub market_value: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub delta: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Greeks;

    fn price(day: u64, flavor: &str, price: f64) -> DbCommand {
        DbCommand::InsertPrice {
            day,
            flavor: flavor.into(),
            price,
            jump: 0.0,
            timestamp: format!("day-{day}"),
        }
    }

    #[test]
    fn test_price_history_is_oldest_first_and_limited() {
        let db = init_memory_db().unwrap();
        for day in 1..=5 {
            execute_command(&db, price(day, "vanilla", 2.0 + day as f64)).unwrap();
            execute_command(&db, price(day, "mint", 1.0)).unwrap();
        }
        let history = get_price_history(&db, "vanilla", 3).unwrap();
        assert_eq!(history.iter().map(|r| r.day).collect::<Vec<_>>(), vec![3, 4, 5]);
        assert_eq!(history[2].price, 7.0);
        assert!(get_price_history(&db, "durian", 10).unwrap().is_empty());
    }

    #[test]
    fn test_position_lifecycle() {
        let db = init_memory_db().unwrap();
        execute_command(
            &db,
            DbCommand::InsertPosition {
                id: "p1".into(),
                flavor: "mint".into(),
                instrument: r#"{"type":"future","expiry_day":3}"#.into(),
                quantity: 2.0,
                entry_price: 1.6,
                opened_day: 0,
                opened_at: "t0".into(),
            },
        )
        .unwrap();

        let open = get_positions(&db, 10).unwrap();
        assert_eq!(open.len(), 1);
        assert!(open[0].pnl.is_none());
        assert_eq!(open[0].instrument["type"], "future");

        execute_command(
            &db,
            DbCommand::SettlePosition {
                id: "p1".into(),
                exit_value: 1.8,
                pnl: 0.4,
                closed_day: 3,
                closed_at: "t3".into(),
            },
        )
        .unwrap();
        let closed = get_positions(&db, 10).unwrap();
        assert_eq!(closed[0].pnl, Some(0.4));
        assert_eq!(closed[0].closed_day, Some(3));
    }

    #[test]
    fn test_portfolio_series() {
        let db = init_memory_db().unwrap();
        for day in 1..=3 {
            execute_command(
                &db,
                DbCommand::InsertPortfolioSnapshot {
                    day,
                    timestamp: format!("t{day}"),
                    market_value: day as f64,
                    unrealized_pnl: 0.0,
                    realized_pnl: 0.0,
                    greeks: Greeks { delta: 0.5, ..Greeks::default() },
                },
            )
            .unwrap();
        }
        let series = get_portfolio_series(&db, 2).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].day, 2);
        assert_eq!(series[1].market_value, 3.0);
        assert_eq!(series[1].delta, 0.5);
    }
}
