//! 폴백 REST 조회의 요청/응답 타입.
//!
//! 푸시 채널을 쓸 수 없을 때 클라이언트가 같은 데이터를 요청/응답으로 가져옵니다.
//! 두 조회 모두 멱등이며 부작용이 없습니다.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::envelope::{MarketGateData, MarketGateUpdate, PriceData};

/// 한 번에 조회할 수 있는 최대 종목 수.
pub const MAX_PRICE_LOOKUP: usize = 100;

/// `POST /api/realtime/prices` 요청.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLookupRequest {
    /// 종목코드 목록
    pub tickers: Vec<String>,
}

/// `POST /api/realtime/prices` 응답.
///
/// 알 수 없는 종목은 빠집니다.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PriceLookupResponse {
    /// 종목코드 → 시세
    pub prices: BTreeMap<String, PriceData>,
}

/// `GET /api/market-gate` 응답.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketGateSnapshot {
    /// 게이트 값
    #[serde(flatten)]
    pub data: MarketGateData,
    /// 기준 시각 (Unix 밀리초)
    pub timestamp: i64,
}

impl From<MarketGateUpdate> for MarketGateSnapshot {
    fn from(update: MarketGateUpdate) -> Self {
        Self {
            data: update.data,
            timestamp: update.timestamp,
        }
    }
}

impl From<MarketGateSnapshot> for MarketGateUpdate {
    fn from(snapshot: MarketGateSnapshot) -> Self {
        Self {
            data: snapshot.data,
            timestamp: snapshot.timestamp,
        }
    }
}
