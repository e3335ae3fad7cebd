//! HTTP 라우트.
//!
//! - `GET /ws` - WebSocket 푸시 채널
//! - `POST /api/realtime/prices`, `GET /api/market-gate` - 폴백 조회
//! - `GET /health` - 헬스 체크
//! - `GET /metrics` - Prometheus 메트릭

pub mod health;
pub mod realtime;

use std::sync::Arc;

use axum::{extract::State, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;

pub use health::{health_check, health_router, HealthResponse};
pub use realtime::{lookup_prices, market_gate, realtime_router};

use crate::state::AppState;
use crate::websocket::websocket_handler;

/// /metrics 엔드포인트 핸들러.
async fn metrics_handler(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}

/// 전체 라우터 생성 (미들웨어 제외).
///
/// 메트릭 레코더가 설치되지 않았으면 `/metrics`는 등록되지 않습니다.
pub fn create_router(state: Arc<AppState>, metrics_handle: Option<PrometheusHandle>) -> Router {
    let api_router = Router::new()
        .route("/ws", get(websocket_handler))
        .merge(health_router())
        .merge(realtime_router())
        .with_state(state);

    match metrics_handle {
        Some(handle) => {
            let metrics_router = Router::new()
                .route("/metrics", get(metrics_handler))
                .with_state(handle);
            api_router.merge(metrics_router)
        }
        None => api_router,
    }
}
