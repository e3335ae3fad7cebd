//! 토픽 훅.
//!
//! 훅은 활성화될 때 피드의 토픽을 구독하고, 해제(teardown/drop)될 때 구독을 해제합니다.
//! 공유 연결 자체는 닫지 않습니다.
//!
//! 엔티티 키별 상태를 유지하며 일치하는 푸시 메시지가 오면 그 자리에서 갱신합니다.
//! 유예 시간 안에 연결되지 않고 데이터도 없으면 REST 폴링으로 전환하고,
//! 푸시 메시지가 오면 폴링을 멈춥니다. 두 경로가 겹치면 항상 푸시가 우선합니다.
//!
//! # 사용 예제
//!
//! ```rust,ignore
//! use livefeed_client::hooks::{PriceFeed, TopicHook};
//!
//! let hook = TopicHook::activate(&client, PriceFeed::new(["005930"]), Some(api), HookConfig::default());
//! let snapshot = hook.snapshot();
//! if let Some(price) = snapshot.data.get("005930") { ... }
//! ```

mod feeds;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use livefeed_core::{Envelope, ErrorKind, Topic};

pub use feeds::{IndexFeed, MarketGateFeed, PriceFeed, SignalFeed};

use crate::api::FallbackApi;
use crate::client::FeedClient;
use crate::config::HookConfig;
use crate::error::{ClientError, ClientResult};
use crate::listeners::ListenerGuard;
use crate::state::ConnectionStatus;

/// 훅이 다루는 피드.
///
/// 토픽 집합, 푸시 메시지 해석, 폴백 조회 방법을 정의합니다.
#[async_trait]
pub trait FeedAdapter: Send + Sync + 'static {
    /// 엔티티 키 (종목코드, 전략 이름 등)
    type Key: Clone + Ord + Debug + Send + Sync + 'static;
    /// 엔티티 값
    type Value: Clone + Debug + Send + Sync + 'static;

    /// 피드 이름 (로그용).
    fn name(&self) -> &'static str;

    /// 구독할 토픽.
    fn topics(&self) -> Vec<Topic>;

    /// 푸시 메시지에서 이 피드의 엔티티를 꺼냅니다. 관련 없는 메시지는 `None`.
    fn extract(&self, envelope: &Envelope) -> Option<(Self::Key, Self::Value)>;

    /// REST 폴백을 지원하는지.
    fn polls(&self) -> bool {
        true
    }

    /// REST로 같은 데이터를 조회합니다.
    async fn poll(&self, api: &FallbackApi) -> ClientResult<Vec<(Self::Key, Self::Value)>>;
}

/// 훅 상태 스냅샷.
#[derive(Debug, Clone)]
pub struct HookSnapshot<K, V> {
    /// 엔티티 키별 최신 값
    pub data: BTreeMap<K, V>,
    /// 마지막 갱신이 푸시로 왔는지 (`false`면 폴링 데이터이거나 데이터 없음)
    pub push_delivered: bool,
    /// 마지막 갱신 시각
    pub last_update: Option<DateTime<Utc>>,
    /// 공유 연결이 연결되어 있는지
    pub connected: bool,
    /// 공유 연결의 마지막 실패 분류
    pub connection_error: Option<ErrorKind>,
    /// 마지막 폴링 실패 메시지
    pub poll_error: Option<String>,
    /// 폴링 중인지
    pub polling: bool,
}

impl<K, V> Default for HookSnapshot<K, V> {
    fn default() -> Self {
        Self {
            data: BTreeMap::new(),
            push_delivered: false,
            last_update: None,
            connected: false,
            connection_error: None,
            poll_error: None,
            polling: false,
        }
    }
}

impl<K, V> HookSnapshot<K, V> {
    /// 푸시와 폴링이 모두 실패한 상태인지.
    pub fn failed(&self) -> bool {
        !self.connected && self.connection_error.is_some() && self.poll_error.is_some()
    }
}

struct HookState<K, V> {
    snapshot: HookSnapshot<K, V>,
    /// 마지막 값이 푸시로 온 키
    pushed: BTreeSet<K>,
    closed: bool,
}

struct HookShared<A: FeedAdapter> {
    adapter: A,
    api: Option<FallbackApi>,
    state: Mutex<HookState<A::Key, A::Value>>,
    /// 푸시 갱신 횟수. 폴링 결과가 그 사이 푸시를 덮어쓰지 않도록 비교합니다.
    push_seq: AtomicU64,
    pushed: Notify,
}

impl<A: FeedAdapter> HookShared<A> {
    fn push_seq(&self) -> u64 {
        self.push_seq.load(Ordering::SeqCst)
    }

    fn can_poll(&self) -> bool {
        self.api.is_some() && self.adapter.polls()
    }

    fn apply_push(&self, envelope: &Envelope) {
        let Some((key, value)) = self.adapter.extract(envelope) else {
            return;
        };

        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.pushed.insert(key.clone());
            let snapshot = &mut state.snapshot;
            snapshot.data.insert(key, value);
            snapshot.push_delivered = true;
            snapshot.last_update = Some(Utc::now());
            self.push_seq.fetch_add(1, Ordering::SeqCst);
        }
        self.pushed.notify_one();
    }

    fn apply_status(&self, status: &ConnectionStatus) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.snapshot.connected = status.is_connected();
        state.snapshot.connection_error = status.last_error;
    }

    fn set_polling(&self, polling: bool) {
        let mut state = self.state.lock();
        if !state.closed {
            state.snapshot.polling = polling;
        }
    }

    /// 한 번 조회해 반영합니다.
    ///
    /// `since` 이후 푸시가 도착했으면 결과를 버립니다.
    /// 연결되어 푸시를 받는 중이면 푸시로 받은 적 없는 키만 채웁니다.
    ///
    /// # Returns
    ///
    /// 결과를 반영했으면 `true`
    async fn poll_once(&self, since: u64) -> ClientResult<bool> {
        let Some(api) = &self.api else {
            return Err(ClientError::Unsupported(format!(
                "{} hook has no fallback API",
                self.adapter.name()
            )));
        };

        let result = self.adapter.poll(api).await;

        let mut state = self.state.lock();
        if state.closed {
            return Ok(false);
        }

        match result {
            Ok(entries) => {
                if self.push_seq() != since {
                    debug!(feed = self.adapter.name(), "Discarding poll result, push is newer");
                    return Ok(false);
                }
                let state = &mut *state;
                if state.snapshot.connected && state.snapshot.push_delivered {
                    let mut filled = 0;
                    for (key, value) in entries {
                        if !state.pushed.contains(&key) {
                            state.snapshot.data.insert(key, value);
                            filled += 1;
                        }
                    }
                    state.snapshot.poll_error = None;
                    debug!(feed = self.adapter.name(), filled, "Poll filled keys without push data");
                    return Ok(filled > 0);
                }

                state.pushed.clear();
                let snapshot = &mut state.snapshot;
                let count = entries.len();
                snapshot.data.extend(entries);
                snapshot.push_delivered = false;
                snapshot.last_update = Some(Utc::now());
                snapshot.poll_error = None;
                debug!(feed = self.adapter.name(), count, "Applied poll result");
                Ok(true)
            }
            Err(e) => {
                state.snapshot.poll_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// 푸시가 올 때까지 폴링합니다.
    ///
    /// # Returns
    ///
    /// 취소되었으면 `false`
    async fn poll_until_push(&self, config: &HookConfig, cancel: &CancellationToken) -> bool {
        let since = self.push_seq();
        self.set_polling(true);

        let mut ticker = interval(config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = self.pushed.notified() => {}
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once(since).await {
                        warn!(feed = self.adapter.name(), error = %e, "Fallback poll failed");
                    }
                }
            }

            if self.push_seq() != since {
                info!(feed = self.adapter.name(), "Push data arrived, polling stopped");
                self.set_polling(false);
                return true;
            }
        }
    }
}

/// 폴백 감시 태스크.
///
/// 유예 시간 뒤 연결도 새 데이터도 없으면 폴링합니다. 그 외에는 연결이 끊긴 상태가 될 때까지
/// 기다렸다가 새 유예 시간부터 반복합니다. 클라이언트가 재시도를 멈춰 다시 연결되지 않아도
/// 폴링으로 넘어갑니다.
async fn supervise<A: FeedAdapter>(
    shared: Arc<HookShared<A>>,
    mut status: watch::Receiver<ConnectionStatus>,
    config: HookConfig,
    cancel: CancellationToken,
) {
    loop {
        let since = shared.push_seq();
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(config.grace) => {}
        }

        let connected = status.borrow().is_connected();
        if !connected && shared.push_seq() == since {
            info!(
                feed = shared.adapter.name(),
                grace = ?config.grace,
                "No push data within grace window, falling back to polling"
            );
            if !shared.poll_until_push(&config, &cancel).await {
                return;
            }
        }

        // 끊긴 상태가 될 때까지 대기 (이미 끊겨 있으면 바로 반환)
        let disconnected = async { status.wait_for(|s| !s.is_connected()).await.is_ok() };
        tokio::select! {
            _ = cancel.cancelled() => return,
            alive = disconnected => {
                if !alive {
                    debug!(feed = shared.adapter.name(), "Client dropped, supervisor stopped");
                    return;
                }
            }
        }
    }
}

/// 토픽 훅.
///
/// drop되면 [`teardown`](Self::teardown)과 같이 해제됩니다.
pub struct TopicHook<A: FeedAdapter> {
    client: FeedClient,
    shared: Arc<HookShared<A>>,
    topics: Vec<Topic>,
    guards: Vec<ListenerGuard>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    active: bool,
}

impl<A: FeedAdapter> TopicHook<A> {
    /// 훅 활성화.
    ///
    /// 리스너를 등록하고 토픽을 구독한 뒤 폴백 감시 태스크를 시작합니다.
    /// tokio 런타임 안에서 호출해야 합니다.
    ///
    /// # Arguments
    ///
    /// * `client` - 공유 클라이언트
    /// * `adapter` - 피드 어댑터
    /// * `api` - 폴백 REST 클라이언트 (없으면 폴링하지 않음)
    /// * `config` - 유예 시간/폴링 주기
    pub fn activate(
        client: &FeedClient,
        adapter: A,
        api: Option<FallbackApi>,
        config: HookConfig,
    ) -> Self {
        let initial = client.status();
        let topics = adapter.topics();

        let shared = Arc::new(HookShared {
            adapter,
            api,
            state: Mutex::new(HookState {
                snapshot: HookSnapshot {
                    connected: initial.is_connected(),
                    connection_error: initial.last_error,
                    ..HookSnapshot::default()
                },
                pushed: BTreeSet::new(),
                closed: false,
            }),
            push_seq: AtomicU64::new(0),
            pushed: Notify::new(),
        });

        let on_message = {
            let shared = shared.clone();
            client.on_message(move |envelope| shared.apply_push(envelope))
        };
        let on_state = {
            let shared = shared.clone();
            client.on_state_change(move |status| shared.apply_status(status))
        };

        for topic in &topics {
            client.subscribe(topic.clone());
        }

        let cancel = CancellationToken::new();
        let task = shared.can_poll().then(|| {
            tokio::spawn(supervise(
                shared.clone(),
                client.watch_status(),
                config,
                cancel.clone(),
            ))
        });

        debug!(feed = shared.adapter.name(), ?topics, "Hook activated");

        Self {
            client: client.clone(),
            shared,
            topics,
            guards: vec![on_message, on_state],
            cancel,
            task,
            active: true,
        }
    }

    /// 현재 상태 스냅샷.
    pub fn snapshot(&self) -> HookSnapshot<A::Key, A::Value> {
        self.shared.state.lock().snapshot.clone()
    }

    /// 엔티티 하나의 현재 값.
    pub fn get(&self, key: &A::Key) -> Option<A::Value> {
        self.shared.state.lock().snapshot.data.get(key).cloned()
    }

    /// 구독 중인 토픽.
    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    /// 해제되지 않았는지.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// 지금 한 번 REST로 조회합니다.
    ///
    /// 조회 중 푸시가 도착하면 결과는 버려집니다. 푸시를 받는 중이면 푸시 값은 덮어쓰지 않습니다.
    ///
    /// # Returns
    ///
    /// 결과를 반영했으면 `true`
    pub async fn refetch(&self) -> ClientResult<bool> {
        if !self.shared.adapter.polls() {
            return Err(ClientError::Unsupported(format!(
                "{} feed has no REST fallback",
                self.shared.adapter.name()
            )));
        }
        let since = self.shared.push_seq();
        self.shared.poll_once(since).await
    }

    /// 공유 연결을 즉시 다시 연결합니다.
    pub fn reconnect(&self) {
        self.client.reconnect();
    }

    /// 훅 해제.
    ///
    /// 이 호출이 끝난 뒤에는 상태가 바뀌지 않습니다. 공유 연결은 유지됩니다.
    pub fn teardown(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;

        self.shared.state.lock().closed = true;
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.guards.clear();

        for topic in &self.topics {
            self.client.unsubscribe(topic);
        }

        debug!(feed = self.shared.adapter.name(), "Hook torn down");
    }
}

impl<A: FeedAdapter> Drop for TopicHook<A> {
    fn drop(&mut self) {
        self.teardown();
    }
}
