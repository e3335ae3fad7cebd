//! 개발용 모의 시세 소스.
//!
//! 업스트림이 설정되지 않았을 때 종목 시세, 지수, 마켓 게이트를 랜덤 워크로 생성합니다.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use livefeed_core::{
    now_millis, FeedResult, GateStatus, IndexData, IndexUpdate, MarketGateData,
    MarketGateUpdate, PriceData, PriceUpdate,
};

use super::source::DataSource;

/// 종목/지수 하나의 랜덤 워크 상태.
#[derive(Debug, Clone)]
struct Walk {
    base: Decimal,
    current: Decimal,
    volume: i64,
}

impl Walk {
    fn new(base: Decimal, volume: i64) -> Self {
        Self {
            base,
            current: base,
            volume,
        }
    }

    fn step(&mut self, max_move: f64) {
        let mut rng = rand::thread_rng();
        let pct = rng.gen_range(-max_move..max_move);
        let delta = self.current * Decimal::try_from(pct).unwrap_or(Decimal::ZERO);

        // 기준가의 절반 아래로는 내려가지 않음
        let floor = self.base / dec!(2);
        self.current = (self.current + delta).max(floor).round_dp(2);
        self.volume += rng.gen_range(0..self.volume.max(1000) / 1000 + 1);
    }

    fn change(&self) -> Decimal {
        (self.current - self.base).round_dp(2)
    }

    fn change_rate(&self) -> Decimal {
        if self.base.is_zero() {
            return Decimal::ZERO;
        }
        ((self.current - self.base) / self.base * dec!(100)).round_dp(2)
    }
}

/// 모의 시세 생성기.
pub struct MarketSimulator {
    prices: Mutex<HashMap<String, Walk>>,
    indices: Mutex<HashMap<String, Walk>>,
}

impl MarketSimulator {
    /// 주요 종목과 지수로 초기화된 시뮬레이터 생성.
    pub fn new() -> Self {
        let mut prices = HashMap::new();
        prices.insert("005930".to_string(), Walk::new(dec!(82400), 12_000_000)); // 삼성전자
        prices.insert("000660".to_string(), Walk::new(dec!(178000), 3_500_000)); // SK하이닉스
        prices.insert("035720".to_string(), Walk::new(dec!(42500), 2_800_000)); // 카카오
        prices.insert("035420".to_string(), Walk::new(dec!(185000), 1_200_000)); // 네이버
        prices.insert("005380".to_string(), Walk::new(dec!(215000), 900_000)); // 현대차

        let mut indices = HashMap::new();
        indices.insert("KOSPI".to_string(), Walk::new(dec!(2650.12), 450_000_000));
        indices.insert("KOSDAQ".to_string(), Walk::new(dec!(870.45), 900_000_000));

        Self {
            prices: Mutex::new(prices),
            indices: Mutex::new(indices),
        }
    }

    /// 종목 시세 한 단계 진행.
    pub fn next_price(&self, ticker: &str) -> PriceUpdate {
        let mut prices = self.prices.lock();
        let walk = prices.entry(ticker.to_string()).or_insert_with(|| {
            let base = base_price_for(ticker);
            debug!(ticker, base = %base, "Created dynamic price for new ticker");
            Walk::new(base, 1_000_000)
        });
        walk.step(0.005);

        PriceUpdate {
            ticker: ticker.to_string(),
            data: PriceData {
                price: walk.current,
                change: walk.change(),
                change_rate: walk.change_rate(),
                volume: walk.volume,
            },
            timestamp: now_millis(),
        }
    }

    /// 지수 한 단계 진행.
    pub fn next_index(&self, code: &str) -> IndexUpdate {
        let mut indices = self.indices.lock();
        let walk = indices
            .entry(code.to_string())
            .or_insert_with(|| Walk::new(dec!(1000), 100_000_000));
        walk.step(0.002);

        IndexUpdate {
            code: code.to_string(),
            name: index_name(code).to_string(),
            data: IndexData {
                index: walk.current,
                change: walk.change(),
                change_rate: walk.change_rate(),
                volume: walk.volume,
            },
            timestamp: now_millis(),
        }
    }

    /// 현재 지수 등락률로 마켓 게이트 계산.
    pub fn market_gate(&self) -> MarketGateUpdate {
        let (kospi, kosdaq) = {
            let mut indices = self.indices.lock();
            let kospi = indices
                .entry("KOSPI".to_string())
                .or_insert_with(|| Walk::new(dec!(2650.12), 450_000_000))
                .clone();
            let kosdaq = indices
                .entry("KOSDAQ".to_string())
                .or_insert_with(|| Walk::new(dec!(870.45), 900_000_000))
                .clone();
            (kospi, kosdaq)
        };

        let level = gate_level(kospi.change_rate(), kosdaq.change_rate());

        MarketGateUpdate {
            data: MarketGateData {
                status: GateStatus::from_level(level),
                level,
                kospi: kospi.current,
                kospi_change_pct: kospi.change_rate(),
                kosdaq: kosdaq.current,
                kosdaq_change_pct: kosdaq.change_rate(),
            },
            timestamp: now_millis(),
        }
    }
}

impl Default for MarketSimulator {
    fn default() -> Self {
        Self::new()
    }
}

/// 알려지지 않은 종목의 기준가.
///
/// 같은 종목코드는 항상 같은 기준가를 갖습니다.
fn base_price_for(ticker: &str) -> Decimal {
    if ticker.chars().all(|c| c.is_ascii_digit()) {
        let seed: u64 = ticker.bytes().map(u64::from).sum::<u64>() * 997;
        Decimal::from(10_000 + (seed % 900) * 100)
    } else {
        dec!(100)
    }
}

fn index_name(code: &str) -> &str {
    match code {
        "KOSPI" => "코스피",
        "KOSDAQ" => "코스닥",
        other => other,
    }
}

/// 두 지수 등락률(%)에서 게이트 점수(0~100) 계산.
///
/// 보합이면 50점, 평균 등락률 1%p당 20점씩 가감합니다.
fn gate_level(kospi_pct: Decimal, kosdaq_pct: Decimal) -> i32 {
    let avg = (kospi_pct + kosdaq_pct) / dec!(2);
    let score = dec!(50) + avg * dec!(20);
    score.round().to_i32().unwrap_or(50).clamp(0, 100)
}

#[async_trait]
impl DataSource<PriceUpdate> for MarketSimulator {
    fn name(&self) -> &str {
        "simulator"
    }

    async fn fetch(&self, keys: &[String]) -> FeedResult<Vec<PriceUpdate>> {
        Ok(keys.iter().map(|t| self.next_price(t)).collect())
    }
}

#[async_trait]
impl DataSource<IndexUpdate> for MarketSimulator {
    fn name(&self) -> &str {
        "simulator"
    }

    async fn fetch(&self, keys: &[String]) -> FeedResult<Vec<IndexUpdate>> {
        Ok(keys.iter().map(|c| self.next_index(c)).collect())
    }
}

#[async_trait]
impl DataSource<MarketGateUpdate> for MarketSimulator {
    fn name(&self) -> &str {
        "simulator"
    }

    async fn fetch(&self, _keys: &[String]) -> FeedResult<Vec<MarketGateUpdate>> {
        Ok(vec![self.market_gate()])
    }
}
