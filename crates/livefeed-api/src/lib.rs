//! 실시간 시세 배포 서버.
//!
//! 이 크레이트는 다음을 제공합니다:
//! - 세션과 토픽 구독을 관리하는 연결 레지스트리
//! - 핑/퐁 기반 세션 생존 확인
//! - 피드별 주기 퍼블리셔 (라이브 소스 → 저장 소스 폴백)
//! - 백그라운드 작업 메시지를 중계하는 Redis Pub/Sub 릴레이
//! - 폴백 REST 조회, 헬스 체크, Prometheus 메트릭
//!
//! # 모듈 구성
//!
//! - [`websocket`]: 연결 레지스트리, 생존 확인, WebSocket 핸들러
//! - [`publishers`]: 데이터 소스와 주기 퍼블리셔
//! - [`relay`]: Redis Pub/Sub 릴레이
//! - [`routes`]: HTTP 엔드포인트
//! - [`state`]: 애플리케이션 공유 상태 (AppState)
//! - [`metrics`]: Prometheus 메트릭 수집

pub mod error;
pub mod metrics;
pub mod publishers;
pub mod relay;
pub mod routes;
pub mod state;
pub mod websocket;

pub use error::{ApiErrorResponse, ApiResult};
pub use metrics::setup_metrics_recorder;
pub use publishers::{start_publishers, FeedSources};
pub use relay::{start_relay, PubSubRelay};
pub use routes::create_router;
pub use state::AppState;
pub use websocket::{create_registry, start_liveness, ConnectionRegistry, SharedRegistry};
