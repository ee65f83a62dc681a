//! Position Monitor
//!
//! Watches open positions for exit conditions and flags them
//! `pending_exit`; the actual sell happens at the next scheduled execution
//! pass, never here. Two triggers:
//!
//! 1. Stop loss hit (price <= stop_loss)
//! 2. Trend break (price < 50-day MA), when enabled in config

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, warn};

use crate::domain::repositories::broker_client::BrokerClient;
use crate::domain::services::scanner::sma;
use crate::persistence::config_repository::ConfigRepository;
use crate::persistence::market_data_repository::BarRepository;
use crate::persistence::repository::PositionRepository;
use crate::persistence::{DatabaseError, DbPool};

/// One position that crossed an exit threshold this pass.
#[derive(Debug, Clone, Serialize)]
pub struct ExitTrigger {
    pub symbol: String,
    pub current_price: f64,
    pub reason: String,
    pub trigger_price: f64,
}

pub struct PositionMonitor {
    pool: DbPool,
    broker: Arc<dyn BrokerClient>,
}

impl PositionMonitor {
    pub fn new(pool: DbPool, broker: Arc<dyn BrokerClient>) -> Self {
        Self { pool, broker }
    }

    /// Check every open position and flag those needing an exit.
    ///
    /// Positions already flagged stay flagged (the coordinator clears the
    /// flag by closing them). A position whose live price is unavailable or
    /// invalid is left untouched this pass.
    pub async fn check_exit_triggers(&self) -> Result<Vec<ExitTrigger>, DatabaseError> {
        let positions = PositionRepository::new(self.pool.clone()).open_positions().await?;
        if positions.is_empty() {
            return Ok(Vec::new());
        }

        let config = ConfigRepository::new(self.pool.clone()).get().await?;
        let bar_repo = BarRepository::new(self.pool.clone());
        let position_repo = PositionRepository::new(self.pool.clone());

        let mut triggered = Vec::new();

        for pos in positions.iter().filter(|p| !p.pending_exit) {
            let price = match self.broker.fetch_price(&pos.symbol).await {
                Ok(Some(p)) if p.is_finite() && p > 0.0 => p,
                Ok(_) => {
                    warn!("No valid live price for {}, skipping exit check", pos.symbol);
                    continue;
                }
                Err(e) => {
                    error!("Price fetch failed for {}: {}", pos.symbol, e);
                    continue;
                }
            };

            if price <= pos.stop_loss {
                warn!(
                    "{} hit STOP LOSS: {:.2} <= {:.2}",
                    pos.symbol, price, pos.stop_loss
                );
                position_repo.flag_pending_exit(&pos.symbol, "STOP_LOSS").await?;
                triggered.push(ExitTrigger {
                    symbol: pos.symbol.clone(),
                    current_price: price,
                    reason: "STOP_LOSS".to_string(),
                    trigger_price: pos.stop_loss,
                });
                continue;
            }

            if config.trend_break_exit_enabled {
                let bars = bar_repo.bars(&pos.symbol, 60).await?;
                if bars.len() >= 50 {
                    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
                    if let Some(ma_50) = sma(&closes, 50) {
                        if price < ma_50 {
                            warn!(
                                "{} TREND BREAK: {:.2} < 50-day MA {:.2}",
                                pos.symbol, price, ma_50
                            );
                            position_repo.flag_pending_exit(&pos.symbol, "TREND_BREAK").await?;
                            triggered.push(ExitTrigger {
                                symbol: pos.symbol.clone(),
                                current_price: price,
                                reason: "TREND_BREAK".to_string(),
                                trigger_price: ma_50,
                            });
                        }
                    }
                }
            }
        }

        Ok(triggered)
    }
}
