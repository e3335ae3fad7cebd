//! 폴백 REST 조회 endpoint.
//!
//! 푸시 채널을 쓸 수 없는 클라이언트가 같은 데이터를 요청/응답으로 가져갑니다.
//! 퍼블리셔와 같은 데이터 소스를 사용합니다.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::{extract::State, routing::get, routing::post, Json, Router};
use tracing::debug;

use livefeed_core::{
    FeedError, MarketGateSnapshot, PriceLookupRequest, PriceLookupResponse, MAX_PRICE_LOOKUP,
};

use crate::error::{bad_request, feed_error_response, ApiResult};
use crate::state::AppState;

/// 종목 시세 일괄 조회.
///
/// POST /api/realtime/prices
///
/// ```json
/// {"tickers": ["005930", "000660"]}
/// ```
pub async fn lookup_prices(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PriceLookupRequest>,
) -> ApiResult<Json<PriceLookupResponse>> {
    let tickers: BTreeSet<String> = request
        .tickers
        .iter()
        .map(|t| t.trim().to_uppercase())
        .filter(|t| !t.is_empty())
        .collect();

    if tickers.is_empty() {
        return Err(bad_request("tickers must not be empty"));
    }
    if tickers.len() > MAX_PRICE_LOOKUP {
        return Err(bad_request(format!(
            "at most {} tickers per request",
            MAX_PRICE_LOOKUP
        )));
    }

    let source = state.prices.as_ref().ok_or_else(|| {
        feed_error_response(FeedError::Source("price source not configured".to_string()))
    })?;

    let keys: Vec<String> = tickers.into_iter().collect();
    let updates = source.fetch(&keys).await.map_err(feed_error_response)?;

    let prices = updates
        .into_iter()
        .map(|update| (update.ticker, update.data))
        .collect();

    debug!(requested = keys.len(), "Price lookup served");
    Ok(Json(PriceLookupResponse { prices }))
}

/// 마켓 게이트 조회.
///
/// GET /api/market-gate
pub async fn market_gate(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<MarketGateSnapshot>> {
    let source = state.market_gate.as_ref().ok_or_else(|| {
        feed_error_response(FeedError::Source(
            "market gate source not configured".to_string(),
        ))
    })?;

    let latest = source
        .fetch(&[])
        .await
        .map_err(feed_error_response)?
        .into_iter()
        .max_by_key(|update| update.timestamp)
        .ok_or_else(|| {
            feed_error_response(FeedError::Source("no market gate data".to_string()))
        })?;

    Ok(Json(latest.into()))
}

/// 폴백 조회 라우터 생성.
pub fn realtime_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/realtime/prices", post(lookup_prices))
        .route("/api/market-gate", get(market_gate))
}
