mod application;
mod config;
mod context;
mod domain;
mod infrastructure;
mod persistence;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::application::execution::{round4, run_eod_execution, run_order_execution};
use crate::application::scan_loop::{start_scan_loop, stop_scan_loop};
use crate::application::scheduler::{data_update_loop, eod_execution_loop, order_execution_loop};
use crate::application::update_runner::run_data_update;
use crate::config::AppConfig;
use crate::context::BotContext;
use crate::domain::repositories::broker_client::BrokerClient;
use crate::domain::services::scanner::MomentumScanner;
use crate::infrastructure::paper_broker::PaperBroker;
use crate::persistence::config_repository::{ConfigRepository, ConfigUpdate};
use crate::persistence::market_data_repository::InstrumentRepository;
use crate::persistence::repository::{PositionRepository, TradeRepository};
use crate::persistence::scan_repository::ScanRepository;

#[derive(Debug, Deserialize)]
struct TickerAdd {
    symbol: String,
    name: Option<String>,
    sector: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TradeListQuery {
    status: Option<String>,
    limit: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sepa_bot=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("SEPA-Bot starting...");

    let app_config = AppConfig::from_env();
    let db = persistence::init_database(&app_config.database_url).await?;

    let broker = Arc::new(PaperBroker::new(app_config.paper_fill_polls));
    if let Err(e) = broker.connect().await {
        warn!("Broker connect failed at startup, components will retry: {}", e);
    }

    let ctx = BotContext::new(db, broker);

    // The scan loop never survives a restart; reset the persisted flag so
    // the status endpoint cannot report a phantom scanner.
    ConfigRepository::new(ctx.db.clone()).set_scanner_running(false).await?;

    // Long-running trigger loops.
    tokio::spawn(data_update_loop(ctx.clone()));
    tokio::spawn(order_execution_loop(ctx.clone()));
    tokio::spawn(eod_execution_loop(ctx.clone()));

    let app = Router::new()
        .route("/", get(root))
        .route("/api/status", get(get_status))
        .route("/api/scanner/start", post(scanner_start))
        .route("/api/scanner/stop", post(scanner_stop))
        .route("/api/scanner/run-once", post(scanner_run_once))
        .route("/api/scanner/results", get(scanner_results))
        .route("/api/update/run", post(update_run))
        .route("/api/update/status", get(update_status))
        .route("/api/execution/run", post(execution_run))
        .route("/api/execution/run-eod", post(execution_run_eod))
        .route("/api/execution/status", get(execution_status))
        .route("/api/tickers", get(get_tickers).post(add_ticker))
        .route("/api/tickers/:symbol", delete(remove_ticker))
        .route("/api/positions", get(get_positions))
        .route("/api/positions/:symbol/exit", post(flag_position_exit))
        .route("/api/trades", get(get_trades))
        .route("/api/trades/:id/reopen", post(reopen_trade))
        .route("/api/config", get(get_config).put(put_config))
        .route("/api/statistics", get(get_statistics))
        .route("/ws", get(ws_upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx.clone());

    let listener = tokio::net::TcpListener::bind(app_config.bind_addr).await?;
    info!("Listening on {}", app_config.bind_addr);

    let shutdown_ctx = ctx.clone();
    let shutdown_signal = async move {
        let ctrl_c = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C signal"),
                Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                    info!("Received SIGTERM signal");
                }
                Err(e) => error!("Failed to install SIGTERM handler: {}", e),
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    };

    info!("Server started successfully. Press Ctrl+C to stop.");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Server shutting down gracefully...");
    stop_scan_loop(&shutdown_ctx).await;
    info!("Shutdown complete");
    Ok(())
}

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "SEPA-Bot API",
        "status": "running"
    }))
}

async fn get_status(State(ctx): State<Arc<BotContext>>) -> Json<serde_json::Value> {
    let config = ConfigRepository::new(ctx.db.clone()).get().await.ok();
    let status = ConfigRepository::new(ctx.db.clone()).status().await.ok();
    let positions = PositionRepository::new(ctx.db.clone())
        .open_positions()
        .await
        .unwrap_or_default();
    let active = InstrumentRepository::new(ctx.db.clone())
        .active_symbols()
        .await
        .unwrap_or_default();
    let stats = TradeRepository::new(ctx.db.clone()).statistics().await.ok();
    let last_execution = ctx.last_execution.read().await.clone();

    Json(serde_json::json!({
        "scanner_running": ctx.scan_running.load(Ordering::SeqCst),
        "broker_connected": ctx.broker.is_connected().await,
        "active_tickers": active.len(),
        "open_positions": positions.len(),
        "config": config,
        "statistics": stats,
        "update_status": status,
        "last_execution": last_execution,
    }))
}

async fn scanner_start(
    State(ctx): State<Arc<BotContext>>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    if !ctx.broker.is_connected().await {
        if let Err(e) = ctx.broker.connect().await {
            return Err((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"error": format!("Could not connect to broker: {}", e)})),
            ));
        }
    }

    if start_scan_loop(ctx.clone()).await {
        info!("Scanner started");
        Ok(Json(serde_json::json!({"success": true})))
    } else {
        Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "Scanner already running"})),
        ))
    }
}

async fn scanner_stop(
    State(ctx): State<Arc<BotContext>>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    if stop_scan_loop(&ctx).await {
        info!("Scanner stop requested");
        Ok(Json(serde_json::json!({"success": true})))
    } else {
        Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "Scanner is not running"})),
        ))
    }
}

async fn scanner_run_once(
    State(ctx): State<Arc<BotContext>>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let scanner = MomentumScanner::new(ctx.db.clone(), ctx.broker.clone());
    match scanner.scan_universe().await {
        Ok(results) => Ok(Json(serde_json::json!({
            "count": results.len(),
            "qualified": results.iter().filter(|r| r.qualified).count(),
            "results": results,
        }))),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": e.to_string()})),
        )),
    }
}

async fn scanner_results(State(ctx): State<Arc<BotContext>>) -> Json<serde_json::Value> {
    let results = ScanRepository::new(ctx.db.clone())
        .latest_results()
        .await
        .unwrap_or_default();
    Json(serde_json::json!({"count": results.len(), "results": results}))
}

/// Fire-and-forget data update; progress arrives over the WebSocket.
async fn update_run(State(ctx): State<Arc<BotContext>>) -> Json<serde_json::Value> {
    let task_ctx = ctx.clone();
    tokio::spawn(async move {
        if let Err(e) = run_data_update(&task_ctx).await {
            error!("On-demand data update failed: {}", e);
        }
    });
    Json(serde_json::json!({"started": true}))
}

async fn update_status(
    State(ctx): State<Arc<BotContext>>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    match ConfigRepository::new(ctx.db.clone()).status().await {
        Ok(s) => Ok(Json(serde_json::json!(s))),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": e.to_string()})),
        )),
    }
}

/// Fire-and-forget start-of-day execution pass.
async fn execution_run(State(ctx): State<Arc<BotContext>>) -> Json<serde_json::Value> {
    let task_ctx = ctx.clone();
    tokio::spawn(async move {
        if let Err(e) = run_order_execution(&task_ctx).await {
            error!("On-demand order execution failed: {}", e);
        }
    });
    Json(serde_json::json!({"started": true}))
}

/// Fire-and-forget end-of-day execution pass.
async fn execution_run_eod(State(ctx): State<Arc<BotContext>>) -> Json<serde_json::Value> {
    let task_ctx = ctx.clone();
    tokio::spawn(async move {
        if let Err(e) = run_eod_execution(&task_ctx).await {
            error!("On-demand EOD execution failed: {}", e);
        }
    });
    Json(serde_json::json!({"started": true}))
}

async fn execution_status(State(ctx): State<Arc<BotContext>>) -> Json<serde_json::Value> {
    let last = ctx.last_execution.read().await.clone();
    Json(serde_json::json!({"last_execution": last}))
}

async fn get_tickers(State(ctx): State<Arc<BotContext>>) -> Json<serde_json::Value> {
    let tickers = InstrumentRepository::new(ctx.db.clone())
        .all()
        .await
        .unwrap_or_default();
    Json(serde_json::json!({"tickers": tickers}))
}

async fn add_ticker(
    State(ctx): State<Arc<BotContext>>,
    Json(payload): Json<TickerAdd>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let symbol = payload.symbol.trim().to_uppercase();
    if symbol.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "Symbol must not be empty"})),
        ));
    }

    InstrumentRepository::new(ctx.db.clone())
        .add(&symbol, payload.name.as_deref(), payload.sector.as_deref())
        .await
        .map_err(internal_error)?;

    Ok(Json(serde_json::json!({"success": true, "symbol": symbol})))
}

async fn remove_ticker(
    State(ctx): State<Arc<BotContext>>,
    Path(symbol): Path<String>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let removed = InstrumentRepository::new(ctx.db.clone())
        .deactivate(&symbol)
        .await
        .map_err(internal_error)?;

    if removed {
        Ok(Json(serde_json::json!({"success": true})))
    } else {
        Err((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": format!("Unknown ticker: {}", symbol)})),
        ))
    }
}

async fn get_positions(State(ctx): State<Arc<BotContext>>) -> Json<serde_json::Value> {
    let positions = PositionRepository::new(ctx.db.clone())
        .open_positions()
        .await
        .unwrap_or_default();
    Json(serde_json::json!({"positions": positions}))
}

/// Flag a position for liquidation at the next execution pass.
async fn flag_position_exit(
    State(ctx): State<Arc<BotContext>>,
    Path(symbol): Path<String>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let flagged = PositionRepository::new(ctx.db.clone())
        .flag_pending_exit(&symbol, "MANUAL_CLOSE")
        .await
        .map_err(internal_error)?;

    if flagged {
        Ok(Json(serde_json::json!({"success": true, "symbol": symbol.to_uppercase()})))
    } else {
        Err((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": format!("No open position for {}", symbol)})),
        ))
    }
}

async fn get_trades(
    State(ctx): State<Arc<BotContext>>,
    Query(query): Query<TradeListQuery>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let trades = TradeRepository::new(ctx.db.clone())
        .list(query.status.as_deref(), query.limit.unwrap_or(100))
        .await
        .map_err(internal_error)?;
    Ok(Json(serde_json::json!({"trades": trades})))
}

async fn reopen_trade(
    State(ctx): State<Arc<BotContext>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let trades = TradeRepository::new(ctx.db.clone());

    // Fallback stop for rows that predate stop-loss freezing: derive from
    // the entry price and the current configured percentage.
    let trade = trades.get(id).await.map_err(internal_error)?;
    let trade = match trade {
        Some(t) => t,
        None => {
            return Err((
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({"error": format!("Unknown trade: {}", id)})),
            ))
        }
    };
    let config = ConfigRepository::new(ctx.db.clone())
        .get()
        .await
        .map_err(internal_error)?;
    let fallback_stop = round4(trade.entry_price * (1.0 - config.stop_loss_pct / 100.0));

    match trades.reopen(id, fallback_stop).await.map_err(internal_error)? {
        Some(t) => Ok(Json(serde_json::json!({"success": true, "symbol": t.symbol}))),
        None => Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": format!("Trade {} is not closed", id)})),
        )),
    }
}

async fn get_config(
    State(ctx): State<Arc<BotContext>>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let config = ConfigRepository::new(ctx.db.clone())
        .get()
        .await
        .map_err(internal_error)?;
    Ok(Json(serde_json::json!(config)))
}

async fn put_config(
    State(ctx): State<Arc<BotContext>>,
    Json(update): Json<ConfigUpdate>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let config = ConfigRepository::new(ctx.db.clone())
        .update(update)
        .await
        .map_err(internal_error)?;
    info!("Configuration updated");
    Ok(Json(serde_json::json!({"success": true, "config": config})))
}

async fn get_statistics(
    State(ctx): State<Arc<BotContext>>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let stats = TradeRepository::new(ctx.db.clone())
        .statistics()
        .await
        .map_err(internal_error)?;
    Ok(Json(serde_json::json!(stats)))
}

async fn ws_upgrade(State(ctx): State<Arc<BotContext>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, ctx))
}

/// Stream broadcast events to one WebSocket client as JSON. A lagging
/// client skips missed events; a dead client ends the task.
async fn handle_ws(socket: WebSocket, ctx: Arc<BotContext>) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = ctx.events.subscribe();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let Ok(text) = serde_json::to_string(&event) else { continue };
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("WebSocket client lagged, skipped {} events", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            msg = receiver.next() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

fn internal_error(e: impl std::fmt::Display) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({"error": e.to_string()})),
    )
}
