//! 업데이트 퍼블리셔.
//!
//! 피드(시세, 지수, 마켓 게이트, 시그널)마다 하나의 [`UpdatePublisher`]가
//! 자기 주기로 소스를 조회하고 레지스트리에 브로드캐스트합니다.
//!
//! 소스 구성:
//! - 1차: 실시간 시세 서비스 HTTP ([`HttpSource`]), 미설정 시 [`MarketSimulator`]
//! - 2차: Redis 스냅샷 ([`RedisSnapshotSource`])

pub mod http;
pub mod redis_snapshot;
pub mod scheduler;
pub mod simulator;
pub mod source;

use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use livefeed_core::{
    Envelope, FeedConfig, FeedResult, FeedSchedule, IndexUpdate, MarketGateUpdate, PriceUpdate,
    SignalUpdate, TopicKind,
};

pub use http::HttpSource;
pub use redis_snapshot::RedisSnapshotSource;
pub use scheduler::{KeySelector, PublishOutcome, UpdatePublisher};
pub use simulator::MarketSimulator;
pub use source::{DataSource, FallbackSource, SharedSource};

use crate::websocket::SharedRegistry;

/// 피드별로 구성된 데이터 소스.
///
/// 구성할 수 있는 소스가 없는 피드는 `None`이며 퍼블리셔도 시작되지 않습니다.
#[derive(Clone, Default)]
pub struct FeedSources {
    /// 종목 시세
    pub prices: Option<SharedSource<PriceUpdate>>,
    /// 지수
    pub indices: Option<SharedSource<IndexUpdate>>,
    /// 마켓 게이트
    pub market_gate: Option<SharedSource<MarketGateUpdate>>,
    /// 시그널 (모의 데이터 없음)
    pub signals: Option<SharedSource<SignalUpdate>>,
}

impl FeedSources {
    /// 설정에서 소스를 구성합니다.
    ///
    /// # Arguments
    ///
    /// * `config` - 서버 설정
    /// * `redis` - 스냅샷 폴백에 사용할 Redis 연결 (없으면 폴백 없음)
    pub fn from_config(config: &FeedConfig, redis: Option<ConnectionManager>) -> FeedResult<Self> {
        let publishers = &config.publishers;
        let timeout = publishers.source_timeout();
        let prefix = config.redis.snapshot_prefix.as_str();

        let simulator = (publishers.upstream_url.is_none() && publishers.mock_data)
            .then(|| Arc::new(MarketSimulator::new()));

        if simulator.is_some() {
            info!("No upstream configured, using market simulator");
        }

        let upstream = publishers.upstream_url.as_deref();

        let prices = compose(
            match (upstream, &simulator) {
                (Some(url), _) => Some(http_source::<PriceUpdate>(url, "prices", timeout)?),
                (None, Some(sim)) => Some(sim.clone() as SharedSource<PriceUpdate>),
                (None, None) => None,
            },
            snapshot_source(&redis, prefix, "price"),
            timeout,
        );

        let indices = compose(
            match (upstream, &simulator) {
                (Some(url), _) => Some(http_source::<IndexUpdate>(url, "indices", timeout)?),
                (None, Some(sim)) => Some(sim.clone() as SharedSource<IndexUpdate>),
                (None, None) => None,
            },
            snapshot_source(&redis, prefix, "index"),
            timeout,
        );

        let market_gate = compose(
            match (upstream, &simulator) {
                (Some(url), _) => Some(http_source::<MarketGateUpdate>(
                    url,
                    "market-gate",
                    timeout,
                )?),
                (None, Some(sim)) => Some(sim.clone() as SharedSource<MarketGateUpdate>),
                (None, None) => None,
            },
            snapshot_source(&redis, prefix, "market_gate"),
            timeout,
        );

        let signals = compose(
            match upstream {
                Some(url) => Some(http_source::<SignalUpdate>(url, "signals", timeout)?),
                None => None,
            },
            snapshot_source(&redis, prefix, "signal"),
            timeout,
        );

        Ok(Self {
            prices,
            indices,
            market_gate,
            signals,
        })
    }
}

fn http_source<T>(base_url: &str, path: &str, timeout: Duration) -> FeedResult<SharedSource<T>>
where
    T: DeserializeOwned + Send + 'static,
{
    let source: SharedSource<T> = Arc::new(HttpSource::<T>::new(base_url, path, timeout)?);
    Ok(source)
}

fn snapshot_source<T>(
    redis: &Option<ConnectionManager>,
    prefix: &str,
    feed: &str,
) -> Option<SharedSource<T>>
where
    T: DeserializeOwned + Send + 'static,
{
    redis.as_ref().map(|conn| {
        Arc::new(RedisSnapshotSource::<T>::new(conn.clone(), prefix, feed)) as SharedSource<T>
    })
}

fn compose<T: Send + 'static>(
    primary: Option<SharedSource<T>>,
    secondary: Option<SharedSource<T>>,
    timeout: Duration,
) -> Option<SharedSource<T>> {
    match (primary, secondary) {
        (Some(primary), secondary) => {
            Some(Arc::new(FallbackSource::new(primary, secondary, timeout)) as SharedSource<T>)
        }
        (None, secondary) => secondary,
    }
}

/// 설정된 퍼블리셔를 모두 시작합니다.
pub fn start_publishers(
    config: &FeedConfig,
    registry: &SharedRegistry,
    sources: &FeedSources,
    shutdown: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    let publishers = &config.publishers;
    let mut handles = Vec::new();

    spawn_feed(
        &mut handles,
        "price",
        &publishers.price,
        registry,
        sources.prices.clone(),
        KeySelector::Subscribed {
            kind: TopicKind::Price,
            extra: publishers.price.keys.clone(),
        },
        shutdown,
    );
    spawn_feed(
        &mut handles,
        "index",
        &publishers.index,
        registry,
        sources.indices.clone(),
        KeySelector::Fixed(publishers.index.keys.clone()),
        shutdown,
    );
    spawn_feed(
        &mut handles,
        "market_gate",
        &publishers.market_gate,
        registry,
        sources.market_gate.clone(),
        KeySelector::None,
        shutdown,
    );
    spawn_feed(
        &mut handles,
        "signal",
        &publishers.signal,
        registry,
        sources.signals.clone(),
        KeySelector::Subscribed {
            kind: TopicKind::Signal,
            extra: publishers.signal.keys.clone(),
        },
        shutdown,
    );

    handles
}

fn spawn_feed<T>(
    handles: &mut Vec<JoinHandle<()>>,
    feed: &'static str,
    schedule: &FeedSchedule,
    registry: &SharedRegistry,
    source: Option<SharedSource<T>>,
    keys: KeySelector,
    shutdown: &CancellationToken,
) where
    T: Into<Envelope> + Send + 'static,
{
    if !schedule.enabled {
        info!(feed, "Publisher disabled");
        return;
    }
    let Some(source) = source else {
        warn!(feed, "No data source configured, publisher not started");
        return;
    };

    let publisher =
        UpdatePublisher::new(feed, registry.clone(), source, keys, schedule.interval());
    handles.push(publisher.start(shutdown.clone()));
}
