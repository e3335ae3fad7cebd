//! 피드별 어댑터.

use std::collections::BTreeSet;

use async_trait::async_trait;

use livefeed_core::{
    Envelope, IndexData, MarketGateData, PriceData, SignalBatch, Topic, DEFAULT_SIGNAL_STRATEGY,
    MARKET_GATE_KEY,
};

use super::FeedAdapter;
use crate::api::FallbackApi;
use crate::error::{ClientError, ClientResult};

/// 종목 시세 피드 (`price:{ticker}`).
#[derive(Debug, Clone)]
pub struct PriceFeed {
    tickers: Vec<String>,
}

impl PriceFeed {
    /// 종목코드 목록으로 생성. 공백 제거, 대문자 변환, 중복 제거됩니다.
    pub fn new<I, S>(tickers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tickers: BTreeSet<String> = tickers
            .into_iter()
            .map(|t| t.as_ref().trim().to_uppercase())
            .filter(|t| !t.is_empty())
            .collect();
        Self {
            tickers: tickers.into_iter().collect(),
        }
    }

    /// 대상 종목코드.
    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    fn watches(&self, ticker: &str) -> bool {
        let ticker = ticker.trim().to_uppercase();
        self.tickers.binary_search(&ticker).is_ok()
    }
}

#[async_trait]
impl FeedAdapter for PriceFeed {
    type Key = String;
    type Value = PriceData;

    fn name(&self) -> &'static str {
        "price"
    }

    fn topics(&self) -> Vec<Topic> {
        self.tickers.iter().map(Topic::price).collect()
    }

    fn extract(&self, envelope: &Envelope) -> Option<(String, PriceData)> {
        match envelope {
            Envelope::PriceUpdate(update) if self.watches(&update.ticker) => Some((
                update.ticker.trim().to_uppercase(),
                update.data.clone(),
            )),
            _ => None,
        }
    }

    async fn poll(&self, api: &FallbackApi) -> ClientResult<Vec<(String, PriceData)>> {
        if self.tickers.is_empty() {
            return Ok(Vec::new());
        }
        let response = api.prices(&self.tickers).await?;
        Ok(response
            .prices
            .into_iter()
            .filter(|(ticker, _)| self.watches(ticker))
            .collect())
    }
}

/// 지수 피드 (`market:{code}`).
///
/// 폴백 REST 조회가 없으므로 푸시로만 갱신됩니다.
#[derive(Debug, Clone)]
pub struct IndexFeed {
    codes: Vec<String>,
}

impl IndexFeed {
    /// 지수 코드 목록으로 생성 (예: `KOSPI`, `KOSDAQ`).
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let codes: BTreeSet<String> = codes
            .into_iter()
            .map(|c| c.as_ref().trim().to_uppercase())
            .filter(|c| !c.is_empty() && c != MARKET_GATE_KEY)
            .collect();
        Self {
            codes: codes.into_iter().collect(),
        }
    }
}

#[async_trait]
impl FeedAdapter for IndexFeed {
    type Key = String;
    type Value = IndexData;

    fn name(&self) -> &'static str {
        "index"
    }

    fn topics(&self) -> Vec<Topic> {
        self.codes.iter().map(Topic::market).collect()
    }

    fn extract(&self, envelope: &Envelope) -> Option<(String, IndexData)> {
        match envelope {
            Envelope::IndexUpdate(update) => {
                let code = update.code.trim().to_uppercase();
                self.codes
                    .binary_search(&code)
                    .is_ok()
                    .then(|| (code, update.data.clone()))
            }
            _ => None,
        }
    }

    fn polls(&self) -> bool {
        false
    }

    async fn poll(&self, _api: &FallbackApi) -> ClientResult<Vec<(String, IndexData)>> {
        Err(ClientError::Unsupported("index feed has no REST fallback".to_string()))
    }
}

/// 마켓 게이트 피드 (`market:GATE`).
#[derive(Debug, Clone, Default)]
pub struct MarketGateFeed;

#[async_trait]
impl FeedAdapter for MarketGateFeed {
    type Key = &'static str;
    type Value = MarketGateData;

    fn name(&self) -> &'static str {
        "market_gate"
    }

    fn topics(&self) -> Vec<Topic> {
        vec![Topic::market_gate()]
    }

    fn extract(&self, envelope: &Envelope) -> Option<(&'static str, MarketGateData)> {
        match envelope {
            Envelope::MarketGateUpdate(update) => Some((MARKET_GATE_KEY, update.data.clone())),
            _ => None,
        }
    }

    async fn poll(&self, api: &FallbackApi) -> ClientResult<Vec<(&'static str, MarketGateData)>> {
        let snapshot = api.market_gate().await?;
        Ok(vec![(MARKET_GATE_KEY, snapshot.data)])
    }
}

/// 전략 시그널 피드 (`signal:{strategy}`).
///
/// 시그널은 스코어링 작업이 발행할 때만 생기므로 폴링하지 않습니다.
#[derive(Debug, Clone)]
pub struct SignalFeed {
    strategy: String,
}

impl SignalFeed {
    /// 전략 이름으로 생성.
    pub fn new(strategy: impl Into<String>) -> Self {
        Self {
            strategy: strategy.into().trim().to_string(),
        }
    }
}

impl Default for SignalFeed {
    fn default() -> Self {
        Self::new(DEFAULT_SIGNAL_STRATEGY)
    }
}

#[async_trait]
impl FeedAdapter for SignalFeed {
    type Key = String;
    type Value = SignalBatch;

    fn name(&self) -> &'static str {
        "signal"
    }

    fn topics(&self) -> Vec<Topic> {
        vec![Topic::signal(&self.strategy)]
    }

    fn extract(&self, envelope: &Envelope) -> Option<(String, SignalBatch)> {
        match envelope {
            Envelope::SignalUpdate(update) => {
                let strategy = update
                    .strategy
                    .as_deref()
                    .unwrap_or(DEFAULT_SIGNAL_STRATEGY);
                (strategy == self.strategy).then(|| (self.strategy.clone(), update.data.clone()))
            }
            _ => None,
        }
    }

    fn polls(&self) -> bool {
        false
    }

    async fn poll(&self, _api: &FallbackApi) -> ClientResult<Vec<(String, SignalBatch)>> {
        Err(ClientError::Unsupported("signal feed has no REST fallback".to_string()))
    }
}
