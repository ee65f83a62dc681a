//! Persistence Layer
//!
//! SQLite-backed storage for the instrument universe, daily bars, scan
//! results, positions, trades, bot configuration, and scheduler checkpoints.
//! Async access via sqlx.
//!
//! # Features
//! - Bar history keyed by (symbol, trading_date) with upsert semantics
//! - Position/trade lifecycle surviving restarts
//! - Singleton bot_config / bot_status rows driving runtime behavior
//! - Per-job scheduler checkpoints for same-day re-fire suppression
//! - Automatic schema migrations

pub mod config_repository;
pub mod market_data_repository;
pub mod models;
pub mod repository;
pub mod scan_repository;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Database connection pool
pub type DbPool = SqlitePool;

/// Database initialization error
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("database connection error: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    MigrationError(String),

    #[error("query error: {0}")]
    QueryError(String),
}

/// Initialize the database connection pool and run migrations.
///
/// `database_url` is a SQLite URL such as `sqlite://data/sepa.db` or
/// `sqlite::memory:` for tests.
pub async fn init_database(database_url: &str) -> Result<DbPool, DatabaseError> {
    info!("Initializing database: {}", database_url);

    // Ensure data directory exists
    if let Some(db_path) = database_url.strip_prefix("sqlite://") {
        if let Some(parent) = Path::new(db_path).parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::ConnectionError(sqlx::Error::Configuration(Box::new(e)))
            })?;
        }
    }

    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .log_statements(tracing::log::LevelFilter::Debug);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    info!("Database initialized successfully");

    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), DatabaseError> {
    info!("Running database migrations...");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS instruments (
            symbol TEXT PRIMARY KEY,
            name TEXT,
            sector TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            added_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!("Failed to create instruments table: {}", e))
    })?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS daily_bars (
            symbol TEXT NOT NULL,
            trading_date DATE NOT NULL,
            open REAL NOT NULL,
            high REAL NOT NULL,
            low REAL NOT NULL,
            close REAL NOT NULL,
            volume INTEGER NOT NULL,
            PRIMARY KEY (symbol, trading_date)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!("Failed to create daily_bars table: {}", e))
    })?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scan_results (
            scan_date DATE NOT NULL,
            symbol TEXT NOT NULL,
            price REAL NOT NULL,
            week_52_high REAL NOT NULL,
            week_52_low REAL NOT NULL,
            ma_50 REAL NOT NULL,
            ma_150 REAL NOT NULL,
            ma_200 REAL NOT NULL,
            ma_200_1m_ago REAL NOT NULL,
            volume INTEGER NOT NULL,
            avg_volume_50 INTEGER NOT NULL,
            criteria_1 INTEGER NOT NULL,
            criteria_2 INTEGER NOT NULL,
            criteria_3 INTEGER NOT NULL,
            criteria_4 INTEGER NOT NULL,
            criteria_5 INTEGER NOT NULL,
            criteria_6 INTEGER NOT NULL,
            criteria_7 INTEGER NOT NULL,
            criteria_8 INTEGER NOT NULL,
            qualified INTEGER NOT NULL,
            action TEXT NOT NULL,
            override_flag INTEGER NOT NULL DEFAULT 0,
            entry_method TEXT,
            in_portfolio INTEGER NOT NULL DEFAULT 0,
            ab_group TEXT,
            eod_buy_pending INTEGER NOT NULL DEFAULT 0,
            sod_skip_reason TEXT,
            PRIMARY KEY (scan_date, symbol)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!("Failed to create scan_results table: {}", e))
    })?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS positions (
            symbol TEXT PRIMARY KEY,
            entry_date DATE NOT NULL,
            entry_price REAL NOT NULL,
            submitted_price REAL,
            quantity INTEGER NOT NULL,
            stop_loss REAL NOT NULL,
            cost_basis REAL NOT NULL,
            trade_id INTEGER,
            status TEXT NOT NULL DEFAULT 'OPEN' CHECK(status IN ('OPEN', 'CLOSED')),
            pending_exit INTEGER NOT NULL DEFAULT 0,
            exit_reason TEXT,
            last_updated DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!("Failed to create positions table: {}", e))
    })?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS trades (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            symbol TEXT NOT NULL,
            entry_date DATE NOT NULL,
            entry_price REAL NOT NULL,
            submitted_price REAL,
            quantity INTEGER NOT NULL,
            cost_basis REAL NOT NULL,
            exit_date DATE,
            exit_price REAL,
            proceeds REAL,
            pnl REAL,
            pnl_pct REAL,
            exit_reason TEXT,
            stop_loss REAL,
            status TEXT NOT NULL DEFAULT 'OPEN' CHECK(status IN ('OPEN', 'CLOSED')),
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| DatabaseError::MigrationError(format!("Failed to create trades table: {}", e)))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bot_config (
            id INTEGER PRIMARY KEY CHECK(id = 1),
            stop_loss_pct REAL NOT NULL DEFAULT 8.0,
            max_positions INTEGER NOT NULL DEFAULT 16,
            position_size_usd REAL NOT NULL DEFAULT 10000.0,
            paper_trading INTEGER NOT NULL DEFAULT 1,
            auto_execute INTEGER NOT NULL DEFAULT 0,
            default_entry_method TEXT NOT NULL DEFAULT 'prev_close',
            data_update_time TEXT,
            order_execution_time TEXT,
            eod_execution_time TEXT,
            near_52wh_pct REAL NOT NULL DEFAULT 5.0,
            above_52wl_pct REAL NOT NULL DEFAULT 30.0,
            volume_multiplier REAL NOT NULL DEFAULT 1.5,
            spy_filter_enabled INTEGER NOT NULL DEFAULT 1,
            trend_break_exit_enabled INTEGER NOT NULL DEFAULT 1,
            limit_order_premium_pct REAL NOT NULL DEFAULT 1.0,
            scanner_interval_seconds INTEGER NOT NULL DEFAULT 30,
            ab_test_enabled INTEGER NOT NULL DEFAULT 0,
            updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!("Failed to create bot_config table: {}", e))
    })?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bot_status (
            id INTEGER PRIMARY KEY CHECK(id = 1),
            data_update_status TEXT NOT NULL DEFAULT 'idle'
                CHECK(data_update_status IN ('idle', 'running', 'success', 'failed')),
            last_data_update DATETIME,
            data_update_error TEXT,
            scanner_running INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!("Failed to create bot_status table: {}", e))
    })?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scheduler_checkpoints (
            job TEXT PRIMARY KEY,
            last_execution_date DATE,
            last_exec_time_config TEXT
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!("Failed to create scheduler_checkpoints table: {}", e))
    })?;

    // Seed singleton rows so every reader can assume they exist.
    sqlx::query("INSERT OR IGNORE INTO bot_config (id) VALUES (1)")
        .execute(pool)
        .await
        .map_err(|e| DatabaseError::MigrationError(format!("Failed to seed bot_config: {}", e)))?;

    sqlx::query("INSERT OR IGNORE INTO bot_status (id) VALUES (1)")
        .execute(pool)
        .await
        .map_err(|e| DatabaseError::MigrationError(format!("Failed to seed bot_status: {}", e)))?;

    for job in ["data_update", "order_execution", "eod_execution"] {
        sqlx::query("INSERT OR IGNORE INTO scheduler_checkpoints (job) VALUES (?1)")
            .bind(job)
            .execute(pool)
            .await
            .map_err(|e| {
                DatabaseError::MigrationError(format!("Failed to seed checkpoint {}: {}", job, e))
            })?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_bars_symbol_date ON daily_bars(symbol, trading_date)")
        .execute(pool)
        .await
        .map_err(|e| DatabaseError::MigrationError(format!("Failed to create index: {}", e)))?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_positions_status ON positions(status)")
        .execute(pool)
        .await
        .map_err(|e| DatabaseError::MigrationError(format!("Failed to create index: {}", e)))?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_status ON trades(status)")
        .execute(pool)
        .await
        .map_err(|e| DatabaseError::MigrationError(format!("Failed to create index: {}", e)))?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_scan_results_date ON scan_results(scan_date)")
        .execute(pool)
        .await
        .map_err(|e| DatabaseError::MigrationError(format!("Failed to create index: {}", e)))?;

    info!("Database migrations completed successfully");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_database_init() {
        let pool = init_database("sqlite::memory:").await;
        assert!(pool.is_ok());
    }

    #[tokio::test]
    async fn test_migrations() {
        let pool = init_database("sqlite::memory:").await.unwrap();

        let result: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN \
             ('instruments', 'daily_bars', 'scan_results', 'positions', 'trades', \
              'bot_config', 'bot_status', 'scheduler_checkpoints')",
        )
        .fetch_one(&pool)
        .await
        .unwrap();

        assert_eq!(result.0, 8);
    }

    #[tokio::test]
    async fn test_singleton_rows_seeded() {
        let pool = init_database("sqlite::memory:").await.unwrap();

        let config: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM bot_config")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(config.0, 1);

        let checkpoints: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM scheduler_checkpoints")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(checkpoints.0, 3);
    }
}
