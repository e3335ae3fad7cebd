//! 연결 레지스트리.
//!
//! 세션과 세션별 토픽 구독을 관리하고 토픽 단위로 필터링된 브로드캐스트를 수행합니다.
//!
//! 모든 변경은 하나의 쓰기 잠금 아래에서 직렬화됩니다. 브로드캐스트는 잠금을 잡은 채
//! 수신 대상 스냅샷만 만들고, 실제 전송은 잠금 밖에서 세션별 큐에 `try_send`로 넣기 때문에
//! 느린 세션 하나가 다른 세션으로의 전달을 막지 않습니다.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use livefeed_core::{Envelope, FeedResult, Topic, TopicKind};

use crate::metrics::{record_broadcast, record_eviction};

/// 직렬화가 끝난 송신 프레임.
///
/// 브로드캐스트 한 번에 한 번만 직렬화하고 모든 세션이 공유합니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(Arc<str>);

impl Frame {
    /// 메시지를 JSON 프레임으로 직렬화.
    pub fn encode(envelope: &Envelope) -> FeedResult<Self> {
        Ok(Self(Arc::from(envelope.to_json()?)))
    }

    /// JSON 텍스트.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 프레임을 다시 메시지로 파싱 (테스트/디버깅용).
    pub fn decode(&self) -> FeedResult<Envelope> {
        Envelope::from_json(&self.0)
    }
}

/// 세션 전송 핸들.
///
/// 큐 송신측과 소켓 종료 토큰을 묶은 것입니다. 레지스트리가 세션을 제거하면
/// 토큰이 취소되어 연결 태스크가 소켓을 닫습니다.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<Frame>,
    closer: CancellationToken,
}

impl SessionHandle {
    /// 주어진 큐 크기로 핸들과 수신측을 생성합니다.
    pub fn channel(capacity: usize) -> (Self, SessionReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let closer = CancellationToken::new();
        (
            Self {
                tx,
                closer: closer.clone(),
            },
            SessionReceiver { rx, closer },
        )
    }

    fn try_send(&self, frame: Frame) -> Result<(), mpsc::error::TrySendError<Frame>> {
        self.tx.try_send(frame)
    }

    fn same_channel(&self, other: &SessionHandle) -> bool {
        self.tx.same_channel(&other.tx)
    }

    fn close(&self) {
        self.closer.cancel();
    }
}

/// 세션 전송 큐의 수신측. 연결 태스크가 소켓으로 흘려보냅니다.
#[derive(Debug)]
pub struct SessionReceiver {
    rx: mpsc::Receiver<Frame>,
    closer: CancellationToken,
}

impl SessionReceiver {
    /// 다음 프레임. 핸들이 모두 사라지면 `None`.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// 대기 중인 프레임을 즉시 꺼냅니다.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }

    /// 레지스트리가 세션을 제거하면 취소되는 토큰.
    pub fn closed(&self) -> CancellationToken {
        self.closer.clone()
    }
}

/// 클라이언트 세션.
#[derive(Debug)]
pub struct Session {
    /// 세션 ID
    pub id: String,
    /// 구독 중인 토픽
    pub subscriptions: HashSet<Topic>,
    /// 연결 시각
    pub connected_at: DateTime<Utc>,
    /// 마지막 퐁 수신 시각
    pub last_pong_at: Instant,
    handle: SessionHandle,
}

impl Session {
    fn new(id: impl Into<String>, handle: SessionHandle) -> Self {
        Self {
            id: id.into(),
            subscriptions: HashSet::new(),
            connected_at: Utc::now(),
            last_pong_at: Instant::now(),
            handle,
        }
    }
}

/// 브로드캐스트 결과.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// 전달에 성공한 세션 수
    pub delivered: usize,
    /// 전송 실패로 제거된 세션
    pub evicted: Vec<String>,
}

/// 연결 레지스트리.
pub struct ConnectionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
    queue_capacity: usize,
}

impl ConnectionRegistry {
    /// 새 레지스트리 생성.
    ///
    /// # Arguments
    ///
    /// * `queue_capacity` - 세션별 송신 큐 크기
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            queue_capacity,
        }
    }

    /// 레지스트리 설정 크기로 세션 채널을 생성합니다.
    pub fn channel(&self) -> (SessionHandle, SessionReceiver) {
        SessionHandle::channel(self.queue_capacity)
    }

    /// 세션 등록.
    ///
    /// 같은 ID로 다시 등록하면 이전 핸들을 닫고 빈 구독 집합으로 교체합니다.
    pub async fn connect(&self, session_id: &str, handle: SessionHandle) {
        let mut sessions = self.sessions.write().await;
        let replaced = sessions.insert(
            session_id.to_string(),
            Session::new(session_id, handle.clone()),
        );
        if let Some(previous) = replaced {
            if !previous.handle.same_channel(&handle) {
                previous.handle.close();
            }
            debug!(session_id, "Session re-registered, previous handle replaced");
        } else {
            debug!(session_id, "Session registered");
        }
    }

    /// 세션과 모든 구독 제거. 없는 세션이면 아무것도 하지 않습니다.
    pub async fn disconnect(&self, session_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(session_id);
        match removed {
            Some(session) => {
                session.handle.close();
                debug!(
                    session_id,
                    topics = session.subscriptions.len(),
                    "Session removed"
                );
                true
            }
            None => false,
        }
    }

    /// 토픽 구독 추가.
    ///
    /// # Returns
    ///
    /// 세션이 존재하면 `true`
    pub async fn subscribe(&self, session_id: &str, topic: &Topic) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(session_id) {
            Some(session) => {
                session.subscriptions.insert(topic.clone());
                debug!(session_id, %topic, "Subscribed");
                true
            }
            None => {
                info!(session_id, %topic, "Subscribe for unknown session ignored");
                false
            }
        }
    }

    /// 토픽 구독 해제.
    pub async fn unsubscribe(&self, session_id: &str, topic: &Topic) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(session_id) {
            Some(session) => {
                session.subscriptions.remove(topic);
                debug!(session_id, %topic, "Unsubscribed");
                true
            }
            None => {
                info!(session_id, %topic, "Unsubscribe for unknown session ignored");
                false
            }
        }
    }

    /// 토픽을 구독 중인 모든 세션에 메시지 전송.
    ///
    /// 전송에 실패한 세션(큐 가득 참, 연결 종료)은 끊긴 것으로 보고 제거하며,
    /// 나머지 세션으로의 전달은 계속됩니다.
    pub async fn broadcast(&self, topic: &Topic, envelope: &Envelope) -> BroadcastReport {
        let targets: Vec<(String, SessionHandle)> = {
            let sessions = self.sessions.read().await;
            sessions
                .values()
                .filter(|s| s.subscriptions.contains(topic))
                .map(|s| (s.id.clone(), s.handle.clone()))
                .collect()
        };

        let mut report = BroadcastReport::default();
        if targets.is_empty() {
            return report;
        }

        let frame = match Frame::encode(envelope) {
            Ok(frame) => frame,
            Err(e) => {
                error!(%topic, error = %e, "Failed to encode broadcast envelope");
                return report;
            }
        };

        let mut failed = Vec::new();
        for (session_id, handle) in targets {
            match handle.try_send(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(session_id = %session_id, %topic, error = %e, "Send failed, evicting session");
                    failed.push((session_id, handle));
                }
            }
        }

        for (session_id, handle) in failed {
            if self.evict_if_same(&session_id, &handle).await {
                record_eviction("send_failed");
                report.evicted.push(session_id);
            }
        }

        record_broadcast(topic.kind().prefix(), report.delivered);
        report
    }

    /// 한 세션에만 메시지 전송 (구독 확인, 에러, 핑).
    ///
    /// 실패해도 세션을 제거하지 않습니다.
    pub async fn send_to(&self, session_id: &str, envelope: &Envelope) -> bool {
        let handle = {
            let sessions = self.sessions.read().await;
            match sessions.get(session_id) {
                Some(session) => session.handle.clone(),
                None => return false,
            }
        };

        match Frame::encode(envelope) {
            Ok(frame) => handle.try_send(frame).is_ok(),
            Err(e) => {
                error!(session_id, error = %e, "Failed to encode envelope");
                false
            }
        }
    }

    /// 퐁 수신 기록. `last_pong_at`은 감소하지 않습니다.
    pub async fn record_pong(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(session_id) {
            Some(session) => {
                let now = Instant::now();
                if now > session.last_pong_at {
                    session.last_pong_at = now;
                }
                true
            }
            None => false,
        }
    }

    /// 모든 세션에 핑 전송. 전송 실패는 재시도하지 않고 퐁 누락과 동일하게 둡니다.
    ///
    /// # Returns
    ///
    /// 핑이 큐에 들어간 세션 수
    pub async fn ping_all(&self) -> usize {
        let handles: Vec<(String, SessionHandle)> = {
            let sessions = self.sessions.read().await;
            sessions
                .values()
                .map(|s| (s.id.clone(), s.handle.clone()))
                .collect()
        };

        let frame = match Frame::encode(&Envelope::Ping) {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "Failed to encode ping");
                return 0;
            }
        };

        let mut sent = 0;
        for (session_id, handle) in handles {
            match handle.try_send(frame.clone()) {
                Ok(()) => sent += 1,
                Err(e) => debug!(session_id = %session_id, error = %e, "Ping send failed"),
            }
        }
        sent
    }

    /// 마지막 퐁 이후 `timeout`을 넘긴 세션 제거.
    pub async fn evict_stale(&self, timeout: Duration) -> Vec<String> {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;

        let stale: Vec<String> = sessions
            .values()
            .filter(|s| now.saturating_duration_since(s.last_pong_at) > timeout)
            .map(|s| s.id.clone())
            .collect();

        for session_id in &stale {
            if let Some(session) = sessions.remove(session_id) {
                session.handle.close();
                record_eviction("pong_timeout");
                warn!(
                    session_id = %session_id,
                    silent_secs = now.saturating_duration_since(session.last_pong_at).as_secs(),
                    "Session evicted: pong timeout"
                );
            }
        }

        stale
    }

    /// 모든 세션 종료 (서버 종료 시).
    pub async fn close_all(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let count = sessions.len();
        for (_, session) in sessions.drain() {
            session.handle.close();
        }
        count
    }

    /// 연결된 클라이언트 수.
    pub async fn client_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// 특정 토픽 구독자 수.
    pub async fn subscriber_count(&self, topic: &Topic) -> usize {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .filter(|s| s.subscriptions.contains(topic))
            .count()
    }

    /// 세션의 현재 구독 목록.
    pub async fn session_topics(&self, session_id: &str) -> Option<HashSet<Topic>> {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).map(|s| s.subscriptions.clone())
    }

    /// 한 네임스페이스에서 하나 이상의 세션이 구독 중인 키 목록.
    pub async fn subscribed_keys(&self, kind: TopicKind) -> BTreeSet<String> {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .flat_map(|s| s.subscriptions.iter())
            .filter(|t| t.kind() == kind)
            .map(|t| t.key().to_string())
            .collect()
    }

    async fn evict_if_same(&self, session_id: &str, handle: &SessionHandle) -> bool {
        let mut sessions = self.sessions.write().await;
        let same = sessions
            .get(session_id)
            .map(|s| s.handle.same_channel(handle))
            .unwrap_or(false);

        if same {
            if let Some(session) = sessions.remove(session_id) {
                session.handle.close();
            }
        }
        same
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(256)
    }
}

/// 공유 가능한 레지스트리 타입.
pub type SharedRegistry = Arc<ConnectionRegistry>;

/// 새로운 공유 레지스트리 생성.
pub fn create_registry(queue_capacity: usize) -> SharedRegistry {
    Arc::new(ConnectionRegistry::new(queue_capacity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use livefeed_core::{PriceData, PriceUpdate};
    use rust_decimal_macros::dec;

    fn price(ticker: &str, price: rust_decimal::Decimal) -> Envelope {
        Envelope::PriceUpdate(PriceUpdate {
            ticker: ticker.to_string(),
            data: PriceData {
                price,
                change: dec!(0),
                change_rate: dec!(0),
                volume: 0,
            },
            timestamp: 1,
        })
    }

    async fn register(registry: &ConnectionRegistry, id: &str) -> SessionReceiver {
        let (handle, rx) = registry.channel();
        registry.connect(id, handle).await;
        rx
    }

    #[tokio::test]
    async fn test_broadcast_reaches_only_subscribers() {
        let registry = ConnectionRegistry::new(16);
        let mut samsung = register(&registry, "s1").await;
        let mut hynix = register(&registry, "s2").await;

        registry.subscribe("s1", &Topic::price("005930")).await;
        registry.subscribe("s2", &Topic::price("000660")).await;

        let report = registry
            .broadcast(&Topic::price("005930"), &price("005930", dec!(82400)))
            .await;

        assert_eq!(report.delivered, 1);
        let frame = samsung.try_recv().expect("subscriber should receive");
        match frame.decode().unwrap() {
            Envelope::PriceUpdate(update) => assert_eq!(update.data.price, dec!(82400)),
            other => panic!("unexpected {:?}", other),
        }
        assert!(hynix.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_subscription_sequence_determines_delivery() {
        let registry = ConnectionRegistry::new(16);
        let mut rx = register(&registry, "s1").await;
        let topic = Topic::price("005930");
        let msg = price("005930", dec!(1));

        registry.subscribe("s1", &topic).await;
        registry.subscribe("s1", &topic).await;
        registry.unsubscribe("s1", &topic).await;
        assert_eq!(registry.broadcast(&topic, &msg).await.delivered, 0);
        assert!(rx.try_recv().is_none());

        registry.subscribe("s1", &topic).await;
        assert_eq!(registry.broadcast(&topic, &msg).await.delivered, 1);
        assert!(rx.try_recv().is_some());
    }

    #[tokio::test]
    async fn test_topic_delivery_keeps_emission_order() {
        let registry = ConnectionRegistry::new(64);
        let mut rx = register(&registry, "s1").await;
        registry.subscribe("s1", &Topic::price("005930")).await;
        registry.subscribe("s1", &Topic::price("000660")).await;

        // 다른 토픽과 섞어서 발행
        for i in 1..=20 {
            registry
                .broadcast(&Topic::price("005930"), &price("005930", i.into()))
                .await;
            registry
                .broadcast(&Topic::price("000660"), &price("000660", (100 + i).into()))
                .await;
        }

        let mut samsung = Vec::new();
        let mut hynix = Vec::new();
        while let Some(frame) = rx.try_recv() {
            match frame.decode().unwrap() {
                Envelope::PriceUpdate(update) if update.ticker == "005930" => {
                    samsung.push(update.data.price)
                }
                Envelope::PriceUpdate(update) => hynix.push(update.data.price),
                other => panic!("unexpected {:?}", other),
            }
        }

        let expected: Vec<rust_decimal::Decimal> = (1..=20).map(Into::into).collect();
        assert_eq!(samsung, expected);
        let expected: Vec<rust_decimal::Decimal> = (101..=120).map(Into::into).collect();
        assert_eq!(hynix, expected);
    }

    #[tokio::test]
    async fn test_unknown_session_is_noop() {
        let registry = ConnectionRegistry::new(16);

        assert!(!registry.subscribe("ghost", &Topic::price("005930")).await);
        assert!(!registry.unsubscribe("ghost", &Topic::price("005930")).await);
        assert!(!registry.disconnect("ghost").await);
        assert_eq!(registry.client_count().await, 0);
    }

    #[tokio::test]
    async fn test_reconnect_replaces_handle_and_clears_topics() {
        let registry = ConnectionRegistry::new(16);
        let old = register(&registry, "s1").await;
        registry.subscribe("s1", &Topic::price("005930")).await;

        let _new = register(&registry, "s1").await;

        assert!(old.closed().is_cancelled());
        assert_eq!(registry.client_count().await, 1);
        assert!(registry.session_topics("s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_send_evicts_without_aborting_fanout() {
        let registry = ConnectionRegistry::new(1);
        let topic = Topic::price("005930");

        let dropped = register(&registry, "gone").await;
        let _full = register(&registry, "slow").await;
        let mut healthy = register(&registry, "ok").await;
        drop(dropped);

        for id in ["gone", "slow", "ok"] {
            registry.subscribe(id, &topic).await;
        }

        // "slow"의 큐(크기 1)를 미리 채워둔다
        assert!(registry.send_to("slow", &Envelope::Ping).await);

        let report = registry.broadcast(&topic, &price("005930", dec!(2))).await;

        assert_eq!(report.delivered, 1);
        let mut evicted = report.evicted.clone();
        evicted.sort();
        assert_eq!(evicted, vec!["gone".to_string(), "slow".to_string()]);
        assert!(healthy.try_recv().is_some());
        assert_eq!(registry.client_count().await, 1);
    }

    #[tokio::test]
    async fn test_disconnect_removes_from_fanout() {
        let registry = ConnectionRegistry::new(16);
        let rx = register(&registry, "s1").await;
        let topic = Topic::market("KOSPI");
        registry.subscribe("s1", &topic).await;

        assert!(registry.disconnect("s1").await);
        assert!(rx.closed().is_cancelled());
        assert_eq!(registry.subscriber_count(&topic).await, 0);
        assert_eq!(registry.broadcast(&topic, &Envelope::Ping).await.delivered, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_stale_sessions() {
        let registry = ConnectionRegistry::new(16);
        let _quiet = register(&registry, "quiet").await;
        let _alive = register(&registry, "alive").await;

        tokio::time::advance(Duration::from_secs(20)).await;
        registry.record_pong("alive").await;
        tokio::time::advance(Duration::from_secs(15)).await;

        let evicted = registry.evict_stale(Duration::from_secs(30)).await;

        assert_eq!(evicted, vec!["quiet".to_string()]);
        assert_eq!(registry.client_count().await, 1);
    }

    #[tokio::test]
    async fn test_subscribed_keys() {
        let registry = ConnectionRegistry::new(16);
        let _a = register(&registry, "a").await;
        let _b = register(&registry, "b").await;

        registry.subscribe("a", &Topic::price("005930")).await;
        registry.subscribe("b", &Topic::price("005930")).await;
        registry.subscribe("b", &Topic::price("000660")).await;
        registry.subscribe("b", &Topic::market("KOSPI")).await;

        let keys: Vec<String> = registry
            .subscribed_keys(TopicKind::Price)
            .await
            .into_iter()
            .collect();
        assert_eq!(keys, vec!["000660".to_string(), "005930".to_string()]);
    }
}
