//! Manual-order HTTP endpoint.
//!
//! `POST /api/short {"symbol": "..."}` opens a short by hand, going through
//! the same risk sizing, ATR-based target calculation and order-placement
//! path as the automatic cycle — only the candidate selection is bypassed.
//! The position lands in the same persisted state the cycle reconciles.

use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::config::Config;
use crate::exchange::{ExchangeApi, PositionSide};
use crate::risk::RiskGate;
use crate::state::{Position, StateStore};
use crate::strategy::{indicators, MIN_OBSERVATIONS};

const ATR_PERIOD: usize = 14;

/// Shared context for the API service.
pub struct ApiContext {
    pub config: Config,
    pub exchange: Arc<dyn ExchangeApi>,
}

#[derive(Debug, Deserialize)]
struct ShortRequest {
    #[serde(default)]
    symbol: String,
}

pub fn router(ctx: Arc<ApiContext>) -> Router {
    Router::new()
        .route("/api/short", post(open_manual_short))
        .with_state(ctx)
}

/// Bind and serve the manual-order API.
pub async fn serve(ctx: Arc<ApiContext>, port: u16) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "manual-order API listening");
    axum::serve(listener, router(ctx)).await?;
    Ok(())
}

async fn open_manual_short(
    State(ctx): State<Arc<ApiContext>>,
    Json(request): Json<ShortRequest>,
) -> (StatusCode, Json<Value>) {
    match handle_short(&ctx, &request.symbol).await {
        Ok(order) => (StatusCode::OK, Json(order)),
        Err((status, message)) => {
            error!(symbol = %request.symbol, %message, "manual short rejected");
            (status, Json(json!({ "ok": false, "error": message })))
        }
    }
}

/// The manual-order entry point, reusing the cycle's risk primitives.
pub async fn handle_short(
    ctx: &ApiContext,
    symbol: &str,
) -> Result<Value, (StatusCode, String)> {
    let symbol = symbol.trim();
    if symbol.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Missing symbol".to_string()));
    }

    let risk = RiskGate::new(ctx.config.risk.clone(), ctx.config.news_events.clone());
    let exchange = ctx.exchange.as_ref();

    let positions = exchange
        .get_open_positions()
        .await
        .map_err(internal_error)?;
    let open_count = positions
        .iter()
        .filter(|p| p.side == PositionSide::Short)
        .count() as u32;

    if open_count >= risk.max_positions() {
        return Err((
            StatusCode::BAD_REQUEST,
            format!(
                "Max positions reached ({open_count}/{})",
                risk.max_positions()
            ),
        ));
    }

    if positions.iter().any(|p| p.symbol == symbol) {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("Position already open for {symbol}"),
        ));
    }

    let balance = exchange.get_balance().await.map_err(internal_error)?;
    if balance <= rust_decimal::Decimal::ZERO {
        return Err((StatusCode::BAD_REQUEST, "Zero balance".to_string()));
    }

    let margin = risk.calculate_position_size(balance, open_count);
    if margin <= rust_decimal::Decimal::ZERO {
        return Err((
            StatusCode::BAD_REQUEST,
            "Position size is zero".to_string(),
        ));
    }

    let candles = exchange
        .get_ohlcv(symbol, &ctx.config.scan.timeframe, ctx.config.scan.candle_limit)
        .await
        .map_err(internal_error)?;
    if candles.len() < MIN_OBSERVATIONS {
        return Err((
            StatusCode::BAD_REQUEST,
            "Not enough candle data".to_string(),
        ));
    }
    let atr_pct = indicators::atr_pct(&candles, ATR_PERIOD);

    let ticker = exchange.get_ticker(symbol).await.map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            format!("Could not fetch ticker for {symbol}"),
        )
    })?;

    // TP from the same hybrid-ATR rule; the manual path places no stop
    let (_sl_price, tp_price) = risk.calculate_sl_tp(ticker.last, atr_pct);

    let order = exchange
        .open_short_tp_only(symbol, margin, tp_price)
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Exchange rejected the order: {e}"),
            )
        })?;

    // Record in the same durable state the cycle reconciles
    let store = StateStore::open(&ctx.config.state_db).map_err(internal_anyhow)?;
    let mut state = store.load_or_default().map_err(internal_anyhow)?;
    state.add_position(Position::from_order(&order));
    store.save(&state).map_err(internal_anyhow)?;

    info!(symbol, %margin, tp = %tp_price, "manual short opened");

    Ok(json!({
        "ok": true,
        "order": {
            "symbol": order.symbol,
            "order_id": order.order_id,
            "entry_price": order.entry_price,
            "amount": order.amount,
            "margin": order.margin,
            "take_profit": order.take_profit,
        }
    }))
}

fn internal_error(e: crate::exchange::ExchangeError) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn internal_anyhow(e: anyhow::Error) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{Candle, MockExchange};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn candles() -> Vec<Candle> {
        (0..40)
            .map(|i| Candle {
                timestamp: i as i64 * 900_000,
                open: dec!(100),
                high: dec!(100.5),
                low: dec!(99.5),
                close: dec!(100),
                volume: dec!(1000),
            })
            .collect()
    }

    fn context(mock: MockExchange) -> ApiContext {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let unique = COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut config = Config::default();
        config.state_db = std::env::temp_dir()
            .join(format!(
                "shortbot-api-{}-{}.db",
                std::process::id(),
                unique
            ))
            .to_string_lossy()
            .into_owned();
        let _ = std::fs::remove_file(&config.state_db);

        ApiContext {
            config,
            exchange: Arc::new(mock),
        }
    }

    #[tokio::test]
    async fn manual_short_places_tp_only_order() {
        let mock = MockExchange::new(dec!(500));
        mock.set_candles("ETHUSDT", candles()).await;
        mock.set_ticker("ETHUSDT", dec!(100), dec!(0)).await;

        let ctx = context(mock);
        let response = handle_short(&ctx, "ETHUSDT").await.unwrap();

        assert_eq!(response["ok"], true);
        assert_eq!(response["order"]["symbol"], "ETHUSDT");

        // Same sizing rule as the cycle (500 * 50% / 5) and no stop-loss
        let store = StateStore::open(&ctx.config.state_db).unwrap();
        let state = store.load().unwrap().unwrap();
        assert_eq!(state.positions["ETHUSDT"].margin, dec!(50.00));
        assert_eq!(state.positions["ETHUSDT"].stop_loss, Decimal::ZERO);
    }

    #[tokio::test]
    async fn missing_symbol_is_rejected() {
        let mock = MockExchange::new(dec!(500));
        let ctx = context(mock);

        let (status, _) = handle_short(&ctx, "  ").await.unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn short_candle_history_is_rejected() {
        let mock = MockExchange::new(dec!(500));
        mock.set_candles("ETHUSDT", candles()[..10].to_vec()).await;
        mock.set_ticker("ETHUSDT", dec!(100), dec!(0)).await;

        let ctx = context(mock);
        let (status, message) = handle_short(&ctx, "ETHUSDT").await.unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(message.contains("candle"));
    }
}
