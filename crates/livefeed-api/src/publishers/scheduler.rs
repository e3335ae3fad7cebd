//! 피드별 주기 퍼블리셔.
//!
//! 주기마다 소스에서 엔티티를 조회하고 엔티티 키로 정해지는 토픽에 브로드캐스트합니다.
//! 같은 값을 다시 발행해도 클라이언트는 마지막 값으로 덮어쓰기 때문에 문제가 없습니다.

use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use livefeed_core::{Envelope, TopicKind};

use super::source::SharedSource;
use crate::metrics::record_publish_cycle;
use crate::websocket::SharedRegistry;

/// 주기마다 조회할 엔티티 키 결정 방식.
#[derive(Debug, Clone)]
pub enum KeySelector {
    /// 키 없이 조회 (마켓 게이트처럼 엔티티가 하나인 피드)
    None,
    /// 설정된 키 목록
    Fixed(Vec<String>),
    /// 현재 구독 중인 키 + 항상 발행할 키
    Subscribed {
        /// 구독 키를 모을 네임스페이스
        kind: TopicKind,
        /// 구독과 무관하게 항상 포함할 키
        extra: Vec<String>,
    },
}

/// 퍼블리셔 한 주기의 결과.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// 브로드캐스트 완료
    Published {
        /// 조회된 엔티티 수
        entities: usize,
        /// 세션에 전달된 메시지 수
        delivered: usize,
    },
    /// 조회할 키가 없어 건너뜀
    Skipped,
    /// 모든 소스 실패. 브로드캐스트하지 않음
    Failed,
}

/// 주기 퍼블리셔.
pub struct UpdatePublisher<T> {
    feed: &'static str,
    registry: SharedRegistry,
    source: SharedSource<T>,
    keys: KeySelector,
    interval: Duration,
}

impl<T> UpdatePublisher<T>
where
    T: Into<Envelope> + Send + 'static,
{
    /// 새 퍼블리셔 생성.
    ///
    /// # Arguments
    ///
    /// * `feed` - 피드 이름 (로그/메트릭용: `price`, `index`, `market_gate`, `signal`)
    /// * `registry` - 브로드캐스트 대상 레지스트리
    /// * `source` - 데이터 소스 (보통 [`FallbackSource`](super::FallbackSource))
    /// * `keys` - 엔티티 키 결정 방식
    /// * `interval` - 발행 주기
    pub fn new(
        feed: &'static str,
        registry: SharedRegistry,
        source: SharedSource<T>,
        keys: KeySelector,
        interval: Duration,
    ) -> Self {
        Self {
            feed,
            registry,
            source,
            keys,
            interval,
        }
    }

    async fn resolve_keys(&self) -> Option<Vec<String>> {
        match &self.keys {
            KeySelector::None => Some(Vec::new()),
            KeySelector::Fixed(keys) if keys.is_empty() => None,
            KeySelector::Fixed(keys) => Some(keys.clone()),
            KeySelector::Subscribed { kind, extra } => {
                let mut keys = self.registry.subscribed_keys(*kind).await;
                keys.extend(extra.iter().cloned());
                if keys.is_empty() {
                    None
                } else {
                    Some(keys.into_iter().collect())
                }
            }
        }
    }

    /// 한 주기 실행.
    pub async fn publish_once(&self) -> PublishOutcome {
        let Some(keys) = self.resolve_keys().await else {
            debug!(feed = self.feed, "No keys to publish");
            record_publish_cycle(self.feed, "skipped");
            return PublishOutcome::Skipped;
        };

        let items = match self.source.fetch(&keys).await {
            Ok(items) => items,
            Err(e) => {
                warn!(
                    feed = self.feed,
                    source = self.source.name(),
                    error = %e,
                    "All sources failed, skipping broadcast"
                );
                record_publish_cycle(self.feed, "failed");
                return PublishOutcome::Failed;
            }
        };

        let entities = items.len();
        let mut delivered = 0;
        for item in items {
            let envelope: Envelope = item.into();
            let Some(topic) = envelope.topic() else {
                continue;
            };
            delivered += self.registry.broadcast(&topic, &envelope).await.delivered;
        }

        debug!(feed = self.feed, entities, delivered, "Published");
        record_publish_cycle(self.feed, "published");
        PublishOutcome::Published {
            entities,
            delivered,
        }
    }

    /// 종료 토큰이 취소될 때까지 주기적으로 발행합니다.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            feed = self.feed,
            source = self.source.name(),
            interval = ?self.interval,
            "Publisher started"
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.publish_once().await;
                }
            }
        }

        info!(feed = self.feed, "Publisher stopped");
    }

    /// 백그라운드 태스크로 시작.
    pub fn start(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
