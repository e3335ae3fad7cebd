//! 폴백 REST 조회 클라이언트.
//!
//! 푸시 채널이 연결되지 않았을 때 훅이 같은 데이터를 요청/응답으로 가져옵니다.
//! 두 엔드포인트 모두 부작용이 없습니다.

use std::time::Duration;

use tracing::debug;

use livefeed_core::{MarketGateSnapshot, PriceLookupRequest, PriceLookupResponse};

use crate::error::{ClientError, ClientResult};

/// 기본 요청 타임아웃.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// 폴백 REST 클라이언트.
#[derive(Debug, Clone)]
pub struct FallbackApi {
    client: reqwest::Client,
    base_url: String,
}

impl FallbackApi {
    /// 새 클라이언트 생성.
    ///
    /// # Arguments
    ///
    /// * `base_url` - 서버 기본 URL (예: `http://localhost:3000`)
    pub fn new(base_url: impl Into<String>) -> ClientResult<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    /// 요청 타임아웃을 지정해 생성.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> ClientResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Http(format!("HTTP 클라이언트 생성 실패: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// 종목 시세 일괄 조회 (`POST /api/realtime/prices`).
    ///
    /// 모르는 종목은 응답에서 빠집니다.
    pub async fn prices(&self, tickers: &[String]) -> ClientResult<PriceLookupResponse> {
        let url = format!("{}/api/realtime/prices", self.base_url);
        let body = PriceLookupRequest {
            tickers: tickers.to_vec(),
        };

        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Http(format!("{} responded with {}", url, status)));
        }

        let prices: PriceLookupResponse = response.json().await?;
        debug!(requested = tickers.len(), received = prices.prices.len(), "Polled prices");
        Ok(prices)
    }

    /// 마켓 게이트 조회 (`GET /api/market-gate`).
    pub async fn market_gate(&self) -> ClientResult<MarketGateSnapshot> {
        let url = format!("{}/api/market-gate", self.base_url);

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Http(format!("{} responded with {}", url, status)));
        }

        Ok(response.json().await?)
    }
}
