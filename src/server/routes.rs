use crate::db;
use crate::models::implied_vol::implied_volatility;
use crate::models::{ExerciseStyle, OptionKind, OptionParameters, DAYS_PER_YEAR};
use crate::paper::position::OpenRequest;
use crate::state::{AppState, EngineEvent, EngineSnapshot};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use std::sync::Arc;
use tokio::sync::oneshot;

#[derive(serde::Deserialize)]
pub struct HistoryQuery {
    pub flavor: String,
    pub limit: Option<usize>,
}

#[derive(serde::Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(serde::Deserialize)]
pub struct QuoteQuery {
    pub flavor: String,
    pub strike: f64,
    /// Days to expiry; defaults to the board expiry
    pub days: Option<u64>,
    pub kind: Option<OptionKind>,
    pub style: Option<ExerciseStyle>,
    /// Observed premium to invert for implied volatility
    pub market_price: Option<f64>,
}

/// Longest on-demand quote horizon (ten years)
pub const MAX_QUOTE_DAYS: u64 = 3650;

type ApiResult = Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)>;

fn reject(status: StatusCode, msg: impl std::fmt::Display) -> (StatusCode, Json<serde_json::Value>) {
    (status, Json(serde_json::json!({ "error": msg.to_string() })))
}

/// Requested days to expiry, capped, and the session day the quote expires on
fn quote_horizon(day: u64, requested: Option<u64>, default_days: u64) -> (u64, u64) {
    let days = requested.unwrap_or(default_days).min(MAX_QUOTE_DAYS);
    (days, day.saturating_add(days))
}

/// GET /api/state -- current engine snapshot (from watch channel, no lock)
pub async fn get_state(
    State(state): State<Arc<AppState>>,
) -> Json<EngineSnapshot> {
    let snapshot = state.snapshot_rx.borrow().clone();
    Json(snapshot)
}

/// GET /api/history -- persisted price path of one flavor (cold path)
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryQuery>,
) -> Json<serde_json::Value> {
    let limit = params.limit.unwrap_or(365).min(5000);
    match db::get_price_history(&state.db, &params.flavor, limit) {
        Ok(history) => Json(serde_json::json!({ "flavor": params.flavor, "history": history })),
        Err(e) => Json(serde_json::json!({ "error": e.to_string() })),
    }
}

/// GET /api/quote -- on-demand price and Greeks against the latest spot
pub async fn get_quote(
    State(state): State<Arc<AppState>>,
    Query(q): Query<QuoteQuery>,
) -> ApiResult {
    let (spot, volatility, rate, day) = {
        let snapshot = state.snapshot_rx.borrow();
        let flavor = snapshot
            .flavors
            .iter()
            .find(|f| f.name == q.flavor)
            .ok_or_else(|| reject(StatusCode::NOT_FOUND, format!("unknown flavor {}", q.flavor)))?;
        (flavor.spot, flavor.quote_volatility, snapshot.rate, snapshot.day)
    };

    let (days, expiry_day) = quote_horizon(day, q.days, state.config.quote_expiry_days);
    let params = OptionParameters {
        spot,
        strike: q.strike,
        time_to_expiry: days as f64 / DAYS_PER_YEAR,
        volatility,
        rate,
        kind: q.kind.unwrap_or(OptionKind::Call),
        style: q.style.unwrap_or(ExerciseStyle::European),
    };

    let priced = state
        .engine
        .price(&params)
        .and_then(|price| state.engine.greeks(&params).map(|greeks| (price, greeks)));
    let (price, greeks) = match priced {
        Ok(v) => v,
        Err(e) => {
            state.counters.errors_recovered.fetch_add(1, portable_atomic::Ordering::Relaxed);
            return Err(reject(StatusCode::UNPROCESSABLE_ENTITY, e));
        }
    };
    state.counters.quotes_priced.fetch_add(1, portable_atomic::Ordering::Relaxed);

    let implied = q
        .market_price
        .map(|target| implied_volatility(&params, target).map_err(|e| e.to_string()));

    Ok(Json(serde_json::json!({
        "flavor": q.flavor,
        "day": day,
        "expiry_day": expiry_day,
        "model": state.engine.model_for(params.style).name(),
        "params": params,
        "price": price,
        "greeks": greeks,
        "implied_volatility": implied.as_ref().and_then(|r| r.as_ref().ok()),
        "implied_volatility_error": implied.as_ref().and_then(|r| r.as_ref().err()),
    })))
}

/// POST /api/positions -- open a paper position through the engine task
pub async fn open_position(
    State(state): State<Arc<AppState>>,
    Json(request): Json<OpenRequest>,
) -> ApiResult {
    let (reply_tx, reply_rx) = oneshot::channel();
    state
        .engine_tx
        .send(EngineEvent::OpenPosition { request, reply: reply_tx })
        .await
        .map_err(|_| reject(StatusCode::SERVICE_UNAVAILABLE, "engine stopped"))?;

    match reply_rx.await {
        Ok(Ok(position)) => Ok(Json(serde_json::json!({ "position": position }))),
        Ok(Err(e)) => Err(reject(StatusCode::UNPROCESSABLE_ENTITY, e)),
        Err(_) => Err(reject(StatusCode::SERVICE_UNAVAILABLE, "engine dropped the request")),
    }
}

/// GET /api/positions -- opened and settled positions from DB (cold path)
pub async fn get_positions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LimitQuery>,
) -> Json<serde_json::Value> {
    let limit = params.limit.unwrap_or(50).min(500);
    match db::get_positions(&state.db, limit) {
        Ok(positions) => Json(serde_json::json!({ "positions": positions })),
        Err(e) => Json(serde_json::json!({ "error": e.to_string() })),
    }
}

/// GET /api/portfolio -- portfolio value series from DB (cold path)
pub async fn get_portfolio(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LimitQuery>,
) -> Json<serde_json::Value> {
    let limit = params.limit.unwrap_or(500).min(5000);
    let current = state.snapshot_rx.borrow().portfolio.clone();
    match db::get_portfolio_series(&state.db, limit) {
        Ok(series) => Json(serde_json::json!({ "current": current, "series": series })),
        Err(e) => Json(serde_json::json!({ "error": e.to_string() })),
    }
}

/// GET /api/counters -- performance counters (lock-free reads)
pub async fn get_counters(
    State(state): State<Arc<AppState>>,
) -> Json<serde_json::Value> {
    use portable_atomic::Ordering::Relaxed;
    Json(serde_json::json!({
        "ticks_processed": state.counters.ticks_processed.load(Relaxed),
        "quotes_priced": state.counters.quotes_priced.load(Relaxed),
        "positions_opened": state.counters.positions_opened.load(Relaxed),
        "positions_settled": state.counters.positions_settled.load(Relaxed),
        "errors_recovered": state.counters.errors_recovered.load(Relaxed),
        "ws_messages_sent": state.counters.ws_messages_sent.load(Relaxed),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_horizon_defaults_and_caps() {
        assert_eq!(quote_horizon(10, None, 30), (30, 40));
        assert_eq!(quote_horizon(10, Some(7), 30), (7, 17));
        assert_eq!(quote_horizon(0, Some(u64::MAX), 30), (MAX_QUOTE_DAYS, MAX_QUOTE_DAYS));
    }

    #[test]
    fn test_quote_horizon_saturates_on_late_day() {
        let (days, expiry_day) = quote_horizon(u64::MAX, Some(u64::MAX), 30);
        assert_eq!(days, MAX_QUOTE_DAYS);
        assert_eq!(expiry_day, u64::MAX);
    }
}
