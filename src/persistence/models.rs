//! Database Models
//!
//! Persistent data structures for instruments, bars, scan results,
//! positions, trades, and scheduler state.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::domain::entities::bar::DailyBar;

/// Tracked instrument (soft-deleted via `active = false`)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InstrumentRecord {
    pub symbol: String,
    pub name: Option<String>,
    pub sector: Option<String>,
    pub active: bool,
    pub added_at: DateTime<Utc>,
}

/// Daily bar row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BarRecord {
    pub symbol: String,
    pub trading_date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

impl From<BarRecord> for DailyBar {
    fn from(r: BarRecord) -> Self {
        DailyBar {
            trading_date: r.trading_date,
            open: r.open,
            high: r.high,
            low: r.low,
            close: r.close,
            volume: r.volume,
        }
    }
}

/// Result of one qualification pass for one symbol
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ScanResultRecord {
    pub scan_date: NaiveDate,
    pub symbol: String,
    pub price: f64,
    pub week_52_high: f64,
    pub week_52_low: f64,
    pub ma_50: f64,
    pub ma_150: f64,
    pub ma_200: f64,
    pub ma_200_1m_ago: f64,
    pub volume: i64,
    pub avg_volume_50: i64,
    pub criteria_1: bool,
    pub criteria_2: bool,
    pub criteria_3: bool,
    pub criteria_4: bool,
    pub criteria_5: bool,
    pub criteria_6: bool,
    pub criteria_7: bool,
    pub criteria_8: bool,
    pub qualified: bool,
    pub action: String,
    pub override_flag: bool,
    pub entry_method: Option<String>,
    pub in_portfolio: bool,
    pub ab_group: Option<String>,
    pub eod_buy_pending: bool,
    pub sod_skip_reason: Option<String>,
}

/// Open (or recently closed) holding
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PositionRecord {
    pub symbol: String,
    pub entry_date: NaiveDate,
    pub entry_price: f64,
    pub submitted_price: Option<f64>,
    pub quantity: i64,
    pub stop_loss: f64,
    pub cost_basis: f64,
    pub trade_id: Option<i64>,
    pub status: String, // "OPEN" or "CLOSED"
    pub pending_exit: bool,
    pub exit_reason: Option<String>,
    pub last_updated: DateTime<Utc>,
}

/// Full trade lifecycle record, retained after close
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TradeRecord {
    pub id: i64,
    pub symbol: String,
    pub entry_date: NaiveDate,
    pub entry_price: f64,
    pub submitted_price: Option<f64>,
    pub quantity: i64,
    pub cost_basis: f64,
    pub exit_date: Option<NaiveDate>,
    pub exit_price: Option<f64>,
    pub proceeds: Option<f64>,
    pub pnl: Option<f64>,
    pub pnl_pct: Option<f64>,
    pub exit_reason: Option<String>,
    /// Stop loss frozen at close time, restored verbatim on reopen.
    pub stop_loss: Option<f64>,
    pub status: String, // "OPEN" or "CLOSED"
    pub created_at: DateTime<Utc>,
}

/// Singleton runtime configuration (bot_config, id = 1)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BotConfigRecord {
    pub id: i64,
    pub stop_loss_pct: f64,
    pub max_positions: i64,
    pub position_size_usd: f64,
    pub paper_trading: bool,
    pub auto_execute: bool,
    pub default_entry_method: String,
    pub data_update_time: Option<String>,
    pub order_execution_time: Option<String>,
    pub eod_execution_time: Option<String>,
    pub near_52wh_pct: f64,
    pub above_52wl_pct: f64,
    pub volume_multiplier: f64,
    pub spy_filter_enabled: bool,
    pub trend_break_exit_enabled: bool,
    pub limit_order_premium_pct: f64,
    pub scanner_interval_seconds: i64,
    pub ab_test_enabled: bool,
    pub updated_at: DateTime<Utc>,
}

/// Singleton process status (bot_status, id = 1)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BotStatusRecord {
    pub id: i64,
    pub data_update_status: String, // idle | running | success | failed
    pub last_data_update: Option<DateTime<Utc>>,
    pub data_update_error: Option<String>,
    pub scanner_running: bool,
}

/// Persisted per-job scheduler state
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SchedulerCheckpointRecord {
    pub job: String,
    pub last_execution_date: Option<NaiveDate>,
    pub last_exec_time_config: Option<String>,
}

/// Create trade input
#[derive(Debug, Clone)]
pub struct CreateTrade {
    pub symbol: String,
    pub entry_date: NaiveDate,
    pub entry_price: f64,
    pub submitted_price: f64,
    pub quantity: i64,
    pub cost_basis: f64,
}

/// Create position input
#[derive(Debug, Clone)]
pub struct CreatePosition {
    pub symbol: String,
    pub entry_date: NaiveDate,
    pub entry_price: f64,
    pub submitted_price: f64,
    pub quantity: i64,
    pub stop_loss: f64,
    pub cost_basis: f64,
    pub trade_id: i64,
}

/// Close trade input
#[derive(Debug, Clone)]
pub struct CloseTrade {
    pub exit_date: NaiveDate,
    pub exit_price: f64,
    pub proceeds: f64,
    pub pnl: f64,
    pub pnl_pct: f64,
    pub exit_reason: String,
    /// Position stop loss, frozen onto the trade row for safe reopening.
    pub stop_loss: Option<f64>,
}

/// Aggregate performance over closed trades plus open exposure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statistics {
    pub total_trades: i64,
    pub wins: i64,
    pub losses: i64,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub avg_pnl: f64,
    pub max_win: f64,
    pub max_loss: f64,
    pub open_positions: i64,
    pub total_invested: f64,
}
