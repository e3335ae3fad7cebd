//! 실시간 데이터 배포를 위한 WebSocket 서버.
//!
//! # 구독 토픽
//!
//! - `price:{ticker}` - 종목 시세
//! - `market:{index}` - 지수 업데이트, `market:GATE`는 마켓 게이트 상태
//! - `signal:{strategy}` - 시그널 배치
//!
//! # 메시지 형식
//!
//! ## 클라이언트 → 서버
//!
//! ```json
//! {"type": "subscribe", "topic": "price:005930"}
//! {"type": "unsubscribe", "topic": "price:005930"}
//! {"type": "pong"}
//! ```
//!
//! ## 서버 → 클라이언트
//!
//! ```json
//! {"type": "connected", "client_id": "..."}
//! {"type": "price_update", "ticker": "005930", "data": {...}, "timestamp": 1738300800000}
//! {"type": "ping"}
//! ```

pub mod handler;
pub mod liveness;
pub mod registry;

pub use handler::websocket_handler;
pub use liveness::{start_liveness, LivenessMonitor, LivenessTick};
pub use registry::{
    create_registry, BroadcastReport, ConnectionRegistry, Frame, Session, SessionHandle,
    SessionReceiver, SharedRegistry,
};
