//! 브로드캐스트 라우팅 키(토픽).
//!
//! 토픽은 `네임스페이스:키` 형식의 문자열이며 저장되지 않고
//! 브로드캐스트 필터로만 사용됩니다.
//!
//! - `price:{ticker}` - 종목별 시세 (예: `price:005930`)
//! - `market:{index}` - 지수 업데이트 (예: `market:KOSPI`), 마켓 게이트는 `market:GATE`
//! - `signal:{strategy}` - 전략별 시그널 배치 (예: `signal:vcp`)

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FeedError;

/// 마켓 게이트 상태가 발행되는 `market` 네임스페이스 키.
pub const MARKET_GATE_KEY: &str = "GATE";

/// 토픽 네임스페이스.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TopicKind {
    /// 종목 시세
    Price,
    /// 지수 / 마켓 게이트
    Market,
    /// 시그널 배치
    Signal,
}

impl TopicKind {
    /// 네임스페이스 접두어.
    pub fn prefix(&self) -> &'static str {
        match self {
            TopicKind::Price => "price",
            TopicKind::Market => "market",
            TopicKind::Signal => "signal",
        }
    }
}

impl fmt::Display for TopicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// 구독/브로드캐스트 토픽.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Topic {
    /// `price:{ticker}`
    Price(String),
    /// `market:{index}`
    Market(String),
    /// `signal:{strategy}`
    Signal(String),
}

impl Topic {
    /// 종목 시세 토픽.
    pub fn price(ticker: impl AsRef<str>) -> Self {
        Topic::Price(ticker.as_ref().trim().to_uppercase())
    }

    /// 지수 토픽.
    pub fn market(index: impl AsRef<str>) -> Self {
        Topic::Market(index.as_ref().trim().to_uppercase())
    }

    /// 마켓 게이트 토픽 (`market:GATE`).
    pub fn market_gate() -> Self {
        Topic::Market(MARKET_GATE_KEY.to_string())
    }

    /// 시그널 토픽.
    pub fn signal(strategy: impl AsRef<str>) -> Self {
        Topic::Signal(strategy.as_ref().trim().to_string())
    }

    /// 토픽 네임스페이스.
    pub fn kind(&self) -> TopicKind {
        match self {
            Topic::Price(_) => TopicKind::Price,
            Topic::Market(_) => TopicKind::Market,
            Topic::Signal(_) => TopicKind::Signal,
        }
    }

    /// 네임스페이스를 제외한 엔티티 키.
    pub fn key(&self) -> &str {
        match self {
            Topic::Price(key) | Topic::Market(key) | Topic::Signal(key) => key,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind().prefix(), self.key())
    }
}

impl FromStr for Topic {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, key) = s
            .split_once(':')
            .ok_or_else(|| FeedError::InvalidTopic(s.to_string()))?;

        if key.trim().is_empty() {
            return Err(FeedError::InvalidTopic(s.to_string()));
        }

        match prefix.trim().to_lowercase().as_str() {
            "price" => Ok(Topic::price(key)),
            "market" => Ok(Topic::market(key)),
            "signal" => Ok(Topic::signal(key)),
            _ => Err(FeedError::InvalidTopic(s.to_string())),
        }
    }
}

impl TryFrom<String> for Topic {
    type Error = FeedError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.to_string()
    }
}
