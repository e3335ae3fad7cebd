//! 푸시 채널 메시지 타입.
//!
//! 서버와 클라이언트가 주고받는 모든 메시지는 `type` 태그를 가진 JSON입니다.
//!
//! ## 서버 → 클라이언트
//!
//! ```json
//! {"type": "connected", "client_id": "..."}
//! {"type": "price_update", "ticker": "005930", "data": {"price": 82400, ...}, "timestamp": 1738300800000}
//! {"type": "ping"}
//! ```
//!
//! ## 클라이언트 → 서버
//!
//! ```json
//! {"type": "subscribe", "topic": "price:005930"}
//! {"type": "unsubscribe", "topic": "price:005930"}
//! {"type": "pong"}
//! ```

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FeedError;
use crate::topic::Topic;

/// 시그널 배치에 전략 이름이 없을 때 사용하는 키.
pub const DEFAULT_SIGNAL_STRATEGY: &str = "default";

/// 현재 시각 (Unix 밀리초).
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// ==================== 서버 → 클라이언트 ====================

/// 서버에서 클라이언트로 보내는 메시지.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    /// 핸드셰이크 완료
    Connected {
        /// 서버가 부여한 세션 ID
        client_id: String,
    },
    /// 구독 확인
    Subscribed {
        /// 구독된 토픽
        topic: Topic,
    },
    /// 구독 해제 확인
    Unsubscribed {
        /// 구독 해제된 토픽
        topic: Topic,
    },
    /// 서버 하트비트
    Ping,
    /// 하트비트 응답 (클라이언트 요청에 대한 서버 응답)
    Pong,
    /// 종목 시세
    PriceUpdate(PriceUpdate),
    /// 지수 업데이트
    IndexUpdate(IndexUpdate),
    /// 마켓 게이트 상태
    MarketGateUpdate(MarketGateUpdate),
    /// 시그널 배치
    SignalUpdate(SignalUpdate),
    /// 에러
    Error {
        /// 에러 메시지
        message: String,
    },
}

impl Envelope {
    /// JSON 문자열로 직렬화.
    pub fn to_json(&self) -> Result<String, FeedError> {
        serde_json::to_string(self).map_err(FeedError::encode)
    }

    /// JSON 문자열에서 파싱.
    pub fn from_json(json: &str) -> Result<Self, FeedError> {
        serde_json::from_str(json).map_err(FeedError::from)
    }

    /// 에러 메시지 생성 헬퍼.
    pub fn error(message: impl Into<String>) -> Self {
        Envelope::Error {
            message: message.into(),
        }
    }

    /// 데이터 메시지가 라우팅되는 토픽.
    ///
    /// 제어 메시지(`connected`, `ping` 등)는 토픽이 없습니다.
    pub fn topic(&self) -> Option<Topic> {
        match self {
            Envelope::PriceUpdate(update) => Some(Topic::price(&update.ticker)),
            Envelope::IndexUpdate(update) => Some(Topic::market(&update.code)),
            Envelope::MarketGateUpdate(_) => Some(Topic::market_gate()),
            Envelope::SignalUpdate(update) => Some(Topic::signal(
                update
                    .strategy
                    .as_deref()
                    .unwrap_or(DEFAULT_SIGNAL_STRATEGY),
            )),
            _ => None,
        }
    }

    /// 메시지 타입 이름 (로그/메트릭용).
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Connected { .. } => "connected",
            Envelope::Subscribed { .. } => "subscribed",
            Envelope::Unsubscribed { .. } => "unsubscribed",
            Envelope::Ping => "ping",
            Envelope::Pong => "pong",
            Envelope::PriceUpdate(_) => "price_update",
            Envelope::IndexUpdate(_) => "index_update",
            Envelope::MarketGateUpdate(_) => "market_gate_update",
            Envelope::SignalUpdate(_) => "signal_update",
            Envelope::Error { .. } => "error",
        }
    }
}

impl From<PriceUpdate> for Envelope {
    fn from(update: PriceUpdate) -> Self {
        Envelope::PriceUpdate(update)
    }
}

impl From<IndexUpdate> for Envelope {
    fn from(update: IndexUpdate) -> Self {
        Envelope::IndexUpdate(update)
    }
}

impl From<MarketGateUpdate> for Envelope {
    fn from(update: MarketGateUpdate) -> Self {
        Envelope::MarketGateUpdate(update)
    }
}

impl From<SignalUpdate> for Envelope {
    fn from(update: SignalUpdate) -> Self {
        Envelope::SignalUpdate(update)
    }
}

// ==================== 클라이언트 → 서버 ====================

/// 클라이언트에서 서버로 보내는 제어 메시지.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// 토픽 구독
    Subscribe {
        /// 구독할 토픽
        topic: Topic,
    },
    /// 토픽 구독 해제
    Unsubscribe {
        /// 구독 해제할 토픽
        topic: Topic,
    },
    /// 서버 핑에 대한 응답
    Pong,
    /// 클라이언트 핑 (서버는 `pong`으로 응답)
    Ping,
}

impl ControlMessage {
    /// JSON 문자열에서 파싱.
    pub fn from_json(json: &str) -> Result<Self, FeedError> {
        serde_json::from_str(json).map_err(|e| FeedError::Decode(e.to_string()))
    }

    /// JSON 문자열로 직렬화.
    pub fn to_json(&self) -> Result<String, FeedError> {
        serde_json::to_string(self).map_err(FeedError::encode)
    }
}

// ==================== 데이터 타입 ====================

/// 종목 시세 값.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceData {
    /// 현재가
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    /// 전일대비
    #[serde(with = "rust_decimal::serde::float")]
    pub change: Decimal,
    /// 등락률 (%)
    #[serde(with = "rust_decimal::serde::float")]
    pub change_rate: Decimal,
    /// 누적 거래량
    pub volume: i64,
}

/// `price_update` 메시지 본문.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdate {
    /// 종목코드
    pub ticker: String,
    /// 시세
    pub data: PriceData,
    /// 타임스탬프 (Unix 밀리초)
    pub timestamp: i64,
}

/// 지수 값.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexData {
    /// 지수
    #[serde(with = "rust_decimal::serde::float")]
    pub index: Decimal,
    /// 전일대비
    #[serde(with = "rust_decimal::serde::float")]
    pub change: Decimal,
    /// 등락률 (%)
    #[serde(with = "rust_decimal::serde::float")]
    pub change_rate: Decimal,
    /// 거래량
    pub volume: i64,
}

/// `index_update` 메시지 본문.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexUpdate {
    /// 지수 코드 (KOSPI, KOSDAQ)
    pub code: String,
    /// 지수 이름
    pub name: String,
    /// 지수 값
    pub data: IndexData,
    /// 타임스탬프 (Unix 밀리초)
    pub timestamp: i64,
}

/// 마켓 게이트 신호등.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GateStatus {
    /// 매매 자제
    Red,
    /// 주의
    Yellow,
    /// 매매 가능
    Green,
}

impl GateStatus {
    /// 게이트 점수(0~100)에서 상태 결정.
    ///
    /// 70 이상은 GREEN, 40 이상은 YELLOW, 그 외는 RED.
    pub fn from_level(level: i32) -> Self {
        match level {
            l if l >= 70 => GateStatus::Green,
            l if l >= 40 => GateStatus::Yellow,
            _ => GateStatus::Red,
        }
    }
}

/// 마켓 게이트 값.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketGateData {
    /// 신호등 상태
    pub status: GateStatus,
    /// 게이트 점수 (0~100)
    pub level: i32,
    /// KOSPI 지수
    #[serde(with = "rust_decimal::serde::float")]
    pub kospi: Decimal,
    /// KOSPI 등락률 (%)
    #[serde(with = "rust_decimal::serde::float")]
    pub kospi_change_pct: Decimal,
    /// KOSDAQ 지수
    #[serde(with = "rust_decimal::serde::float")]
    pub kosdaq: Decimal,
    /// KOSDAQ 등락률 (%)
    #[serde(with = "rust_decimal::serde::float")]
    pub kosdaq_change_pct: Decimal,
}

/// `market_gate_update` 메시지 본문.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketGateUpdate {
    /// 게이트 값
    pub data: MarketGateData,
    /// 타임스탬프 (Unix 밀리초)
    pub timestamp: i64,
}

/// 시그널 배치.
///
/// 개별 시그널의 구조는 스코어링 작업이 결정하므로 그대로 전달합니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalBatch {
    /// 시그널 목록
    pub signals: Vec<Value>,
    /// 배치 생성 시각 (Unix 밀리초)
    pub timestamp: i64,
}

/// `signal_update` 메시지 본문.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalUpdate {
    /// 전략 이름
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    /// 시그널 배치
    pub data: SignalBatch,
}
