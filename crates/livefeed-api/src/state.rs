//! 모든 핸들러에서 공유되는 애플리케이션 상태.

use std::time::Instant;

use livefeed_core::{MarketGateUpdate, PriceUpdate};

use crate::publishers::{FeedSources, SharedSource};
use crate::websocket::SharedRegistry;

/// 애플리케이션 공유 상태.
///
/// Axum의 State extractor를 통해 WebSocket 핸들러와 REST 핸들러에 주입됩니다.
#[derive(Clone)]
pub struct AppState {
    /// 연결 레지스트리 - 세션, 구독, 브로드캐스트
    pub registry: SharedRegistry,

    /// 시세 소스 - REST 폴백 조회용 (퍼블리셔와 같은 소스)
    pub prices: Option<SharedSource<PriceUpdate>>,

    /// 마켓 게이트 소스 - REST 폴백 조회용
    pub market_gate: Option<SharedSource<MarketGateUpdate>>,

    /// API 버전
    pub version: String,

    started_at: Instant,
}

impl AppState {
    /// 레지스트리만 가진 상태 생성.
    pub fn new(registry: SharedRegistry) -> Self {
        Self {
            registry,
            prices: None,
            market_gate: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Instant::now(),
        }
    }

    /// REST 조회에 사용할 소스 설정.
    pub fn with_sources(mut self, sources: &FeedSources) -> Self {
        self.prices = sources.prices.clone();
        self.market_gate = sources.market_gate.clone();
        self
    }

    /// 서버 업타임(초).
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// 테스트용 상태.
#[cfg(test)]
pub fn create_test_state() -> AppState {
    use crate::publishers::MarketSimulator;
    use std::sync::Arc;

    let simulator = Arc::new(MarketSimulator::new());
    let sources = FeedSources {
        prices: Some(simulator.clone() as SharedSource<PriceUpdate>),
        market_gate: Some(simulator as SharedSource<MarketGateUpdate>),
        ..FeedSources::default()
    };

    AppState::new(crate::websocket::create_registry(16)).with_sources(&sources)
}
