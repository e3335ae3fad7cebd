//! # Livefeed Core
//!
//! 실시간 시세 배포 시스템의 공통 타입을 제공합니다:
//! - 토픽(라우팅 키)
//! - 푸시 채널 메시지 (Envelope, ControlMessage)
//! - 폴백 REST 조회 타입
//! - 에러 분류
//! - 설정 관리
//! - 로깅 인프라

pub mod config;
pub mod envelope;
pub mod error;
pub mod logging;
pub mod rest;
pub mod topic;

pub use crate::config::*;
pub use envelope::*;
pub use error::*;
pub use logging::{init_logging, LogConfig, LogFormat};
pub use rest::{MarketGateSnapshot, PriceLookupRequest, PriceLookupResponse, MAX_PRICE_LOOKUP};
pub use topic::{Topic, TopicKind, MARKET_GATE_KEY};
