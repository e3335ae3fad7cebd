//! Redis Pub/Sub 릴레이.
//!
//! 백그라운드 작업(시그널 스캔, 마켓 게이트 재계산 등)이 Redis 채널에 발행한 메시지를
//! 푸시 메시지로 변환해 레지스트리에 브로드캐스트합니다. 프로토콜 변환만 수행하며
//! 작업 런타임과 메모리를 공유하지 않습니다.
//!
//! 디코딩에 실패한 메시지는 원본 payload와 함께 로그를 남기고 다음 메시지를 계속 처리합니다.

use std::collections::HashMap;
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use livefeed_core::{
    now_millis, Envelope, FeedError, FeedResult, IndexUpdate, MarketGateData, MarketGateUpdate,
    PriceUpdate, RelayConfig, RelayKind, SignalBatch, SignalUpdate,
};

use crate::metrics::record_relay_message;
use crate::websocket::SharedRegistry;

/// 연결 시도 타임아웃.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// 채널에서 받은 메시지.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Redis 채널 이름
    pub channel: String,
    /// 원본 payload
    pub payload: String,
}

impl InboundMessage {
    /// 새 메시지 생성.
    pub fn new(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// 시그널 스캔 완료 메시지.
///
/// 전략 이름이 포함된 객체 또는 시그널 배열만 올 수 있습니다.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignalPayload {
    Batch {
        #[serde(default)]
        strategy: Option<String>,
        signals: Vec<Value>,
        #[serde(default)]
        timestamp: Option<i64>,
    },
    Bare(Vec<Value>),
}

/// 마켓 게이트 메시지. `{data, timestamp}` 또는 게이트 값만 올 수 있습니다.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MarketGatePayload {
    Update(MarketGateUpdate),
    Bare(MarketGateData),
}

/// 메시지 종류에 따라 payload를 푸시 메시지로 변환합니다.
pub fn translate(kind: RelayKind, payload: &str) -> FeedResult<Envelope> {
    let envelope = match kind {
        RelayKind::Signal => match serde_json::from_str::<SignalPayload>(payload)? {
            SignalPayload::Batch {
                strategy,
                signals,
                timestamp,
            } => SignalUpdate {
                strategy,
                data: SignalBatch {
                    signals,
                    timestamp: timestamp.unwrap_or_else(now_millis),
                },
            }
            .into(),
            SignalPayload::Bare(signals) => SignalUpdate {
                strategy: None,
                data: SignalBatch {
                    signals,
                    timestamp: now_millis(),
                },
            }
            .into(),
        },
        RelayKind::MarketGate => match serde_json::from_str::<MarketGatePayload>(payload)? {
            MarketGatePayload::Update(update) => update.into(),
            MarketGatePayload::Bare(data) => MarketGateUpdate {
                data,
                timestamp: now_millis(),
            }
            .into(),
        },
        RelayKind::Price => serde_json::from_str::<PriceUpdate>(payload)?.into(),
        RelayKind::Index => serde_json::from_str::<IndexUpdate>(payload)?.into(),
    };
    Ok(envelope)
}

/// Pub/Sub 릴레이.
pub struct PubSubRelay {
    registry: SharedRegistry,
    routes: HashMap<String, RelayKind>,
    reconnect_delay: Duration,
}

impl PubSubRelay {
    /// 새 릴레이 생성.
    pub fn new(registry: SharedRegistry, config: &RelayConfig) -> Self {
        Self {
            registry,
            routes: config
                .routes
                .iter()
                .map(|r| (r.channel.clone(), r.kind))
                .collect(),
            reconnect_delay: config.reconnect_delay(),
        }
    }

    /// 구독할 채널 목록.
    pub fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.routes.keys().cloned().collect();
        channels.sort();
        channels
    }

    /// 메시지 하나를 처리합니다.
    ///
    /// # Returns
    ///
    /// 브로드캐스트했으면 전달된 세션 수, 버려졌으면 `None`
    pub async fn handle(&self, message: &InboundMessage) -> Option<usize> {
        let Some(kind) = self.routes.get(&message.channel) else {
            warn!(channel = %message.channel, "Message on unrouted channel");
            record_relay_message("unknown_channel");
            return None;
        };

        let envelope = match translate(*kind, &message.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(
                    channel = %message.channel,
                    error = %e,
                    payload = %message.payload,
                    "Failed to decode relay message"
                );
                record_relay_message("decode_error");
                return None;
            }
        };

        let topic = envelope.topic()?;
        let report = self.registry.broadcast(&topic, &envelope).await;
        debug!(
            channel = %message.channel,
            %topic,
            delivered = report.delivered,
            "Relayed message"
        );
        record_relay_message("relayed");
        Some(report.delivered)
    }

    /// 스트림이 끝날 때까지 메시지를 처리합니다.
    ///
    /// 잘못된 메시지가 있어도 중단하지 않습니다.
    ///
    /// # Returns
    ///
    /// 처리한 메시지 수
    pub async fn consume<S>(&self, stream: S) -> usize
    where
        S: Stream<Item = InboundMessage>,
    {
        let mut stream = std::pin::pin!(stream);
        let mut processed = 0;
        while let Some(message) = stream.next().await {
            self.handle(&message).await;
            processed += 1;
        }
        processed
    }

    /// Redis에 연결해 종료 토큰이 취소될 때까지 릴레이합니다.
    ///
    /// 연결이 끊기거나 연결에 실패하면 `reconnect_delay` 후 다시 연결합니다.
    pub async fn run(self, redis_url: String, shutdown: CancellationToken) {
        let channels = self.channels();
        info!(?channels, "Pub/Sub relay started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.run_connection(&redis_url, &channels) => {
                    match result {
                        Ok(processed) => warn!(
                            processed,
                            "Pub/Sub connection lost, reconnecting after {:?}",
                            self.reconnect_delay
                        ),
                        Err(e) => warn!(
                            error = %e,
                            "Pub/Sub connection failed, retrying after {:?}",
                            self.reconnect_delay
                        ),
                    }
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }

        info!("Pub/Sub relay stopped");
    }

    async fn run_connection(&self, redis_url: &str, channels: &[String]) -> FeedResult<usize> {
        let client = redis::Client::open(redis_url).map_err(|e| FeedError::Config(e.to_string()))?;

        let mut pubsub = tokio::time::timeout(CONNECT_TIMEOUT, client.get_async_pubsub())
            .await
            .map_err(|_| FeedError::Timeout("Redis Pub/Sub connection".to_string()))?
            .map_err(|e| FeedError::Transport(e.to_string()))?;

        pubsub
            .subscribe(channels)
            .await
            .map_err(|e| FeedError::Transport(e.to_string()))?;

        info!("Pub/Sub relay connected");

        let messages = pubsub.on_message().map(|msg| {
            InboundMessage::new(
                msg.get_channel_name(),
                String::from_utf8_lossy(msg.get_payload_bytes()).into_owned(),
            )
        });

        Ok(self.consume(messages).await)
    }
}

/// 릴레이를 백그라운드로 시작.
pub fn start_relay(
    registry: SharedRegistry,
    config: &RelayConfig,
    redis_url: String,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let relay = PubSubRelay::new(registry, config);
    tokio::spawn(relay.run(redis_url, shutdown))
}
