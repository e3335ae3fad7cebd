//! 재연결 가능한 푸시 채널 클라이언트.
//!
//! [`FeedClient`]는 백그라운드 태스크 하나가 소유한 WebSocket 연결에 대한 핸들입니다.
//! 여러 훅이 같은 핸들을 복제해 공유하며, 리스너 해제나 구독 해제는
//! 공유 연결을 닫지 않습니다.
//!
//! # 연결 수명
//!
//! - 연결 전/재연결 대기 중 요청된 토픽은 요청 순서대로 대기열에 쌓였다가
//!   연결되면 한 번에 전송됩니다.
//! - 재연결 후에는 이전 연결에서 활성화된 토픽을 먼저 복원합니다.
//! - 예상치 못한 종료는 지수 백오프로 재시도하고, 최대 횟수에 도달하면
//!   `max_reconnect_reached`를 세우고 멈춥니다.
//! - 서버의 `ping`에는 자동으로 `pong`을 응답합니다. 클라이언트가 먼저 ping하지 않습니다.
//!
//! # 사용 예제
//!
//! ```rust,ignore
//! use livefeed_client::{ClientConfig, FeedClient};
//! use livefeed_core::Topic;
//!
//! let client = FeedClient::new(ClientConfig::new("ws://localhost:3000/ws"));
//! client.connect();
//! client.subscribe(Topic::price("005930"));
//!
//! let _guard = client.on_message(|envelope| println!("{:?}", envelope));
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use livefeed_core::{ControlMessage, Envelope, Topic};

use crate::backoff::ReconnectPolicy;
use crate::config::ClientConfig;
use crate::error::{ClientError, GatewayDetector};
use crate::listeners::{ListenerGuard, Listeners};
use crate::state::{ConnectionState, ConnectionStatus};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

/// 연결 태스크로 보내는 명령.
#[derive(Debug)]
enum Command {
    Connect,
    Reconnect,
    Disconnect,
    Subscribe(Topic),
    Unsubscribe(Topic),
}

/// 연결 태스크의 다음 단계.
enum Next {
    Idle,
    Connect,
    Backoff(Duration),
    Stop,
}

/// 연결 하나가 끝난 이유.
enum ConnectionEnd {
    /// `disconnect()` 요청
    Requested,
    /// `reconnect()` 요청
    Reconnect,
    /// 모든 핸들이 drop됨
    Shutdown,
    /// 서버가 닫았거나 전송 실패
    Lost(ClientError),
}

struct ClientInner {
    url: String,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    message_listeners: Arc<Listeners<Envelope>>,
    state_listeners: Arc<Listeners<ConnectionStatus>>,
    /// 토픽별 참조 수. 0 → 1에서 구독, 1 → 0에서 구독 해제
    refs: Mutex<HashMap<Topic, usize>>,
}

/// 공유 푸시 채널 클라이언트 핸들.
#[derive(Clone)]
pub struct FeedClient {
    inner: Arc<ClientInner>,
}

impl FeedClient {
    /// 새 클라이언트 생성.
    ///
    /// 연결 태스크를 띄우지만 [`connect`](Self::connect)를 호출하기 전까지는 연결하지 않습니다.
    /// tokio 런타임 안에서 호출해야 합니다.
    pub fn new(config: ClientConfig) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(ConnectionStatus::default());
        let message_listeners = Listeners::new();
        let state_listeners = Listeners::new();

        let connection = Connection {
            url: config.url.clone(),
            policy: config.reconnect.clone(),
            handshake_timeout: config.handshake_timeout,
            stable_after: config.stable_after,
            gateway: GatewayDetector::new(config.stable_after, config.gateway_threshold),
            status: ConnectionStatus::default(),
            status_tx,
            message_listeners: message_listeners.clone(),
            state_listeners: state_listeners.clone(),
            active: Vec::new(),
            pending: Vec::new(),
        };
        tokio::spawn(connection.run(receiver));

        Self {
            inner: Arc::new(ClientInner {
                url: config.url,
                commands,
                status,
                message_listeners,
                state_listeners,
                refs: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// 연결 URL.
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    fn send(&self, command: Command) {
        if self.inner.commands.send(command).is_err() {
            debug!(url = %self.inner.url, "Client task already stopped");
        }
    }

    /// 연결되어 있지 않으면 연결을 시작합니다.
    ///
    /// 최대 재시도 초과나 비활성화로 멈춘 상태에서는 무시되며 [`reconnect`](Self::reconnect)를 사용해야 합니다.
    pub fn connect(&self) {
        self.send(Command::Connect);
    }

    /// 재시도 횟수를 초기화하고 즉시 다시 연결합니다.
    ///
    /// 남은 백오프 대기는 건너뜁니다.
    pub fn reconnect(&self) {
        self.send(Command::Reconnect);
    }

    /// 예약된 재연결을 취소하고 연결을 닫습니다.
    ///
    /// 구독 토픽은 유지되어 다음 연결 시 복원됩니다.
    pub fn disconnect(&self) {
        self.send(Command::Disconnect);
    }

    /// 토픽 구독.
    ///
    /// 같은 토픽을 여러 번 구독하면 참조 수만 늘어납니다.
    ///
    /// # Returns
    ///
    /// 첫 참조여서 서버 구독이 요청되었으면 `true`
    pub fn subscribe(&self, topic: Topic) -> bool {
        let mut refs = self.inner.refs.lock();
        let count = refs.entry(topic.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            self.send(Command::Subscribe(topic));
            true
        } else {
            false
        }
    }

    /// 토픽 구독 해제.
    ///
    /// # Returns
    ///
    /// 마지막 참조여서 서버 구독 해제가 요청되었으면 `true`
    pub fn unsubscribe(&self, topic: &Topic) -> bool {
        let mut refs = self.inner.refs.lock();
        let Some(count) = refs.get_mut(topic) else {
            return false;
        };
        *count -= 1;
        if *count == 0 {
            refs.remove(topic);
            self.send(Command::Unsubscribe(topic.clone()));
            true
        } else {
            false
        }
    }

    /// 토픽의 현재 참조 수.
    pub fn ref_count(&self, topic: &Topic) -> usize {
        self.inner.refs.lock().get(topic).copied().unwrap_or(0)
    }

    /// 현재 연결 상태.
    pub fn status(&self) -> ConnectionStatus {
        self.inner.status.borrow().clone()
    }

    /// 연결 상태 watch 채널.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.clone()
    }

    /// 연결되어 있는지 확인.
    pub fn is_connected(&self) -> bool {
        self.inner.status.borrow().is_connected()
    }

    /// 수신 메시지 리스너 등록.
    ///
    /// `ping`은 클라이언트가 직접 처리하므로 전달되지 않습니다.
    pub fn on_message<F>(&self, callback: F) -> ListenerGuard
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.inner.message_listeners.add(callback)
    }

    /// 상태 변경 리스너 등록.
    pub fn on_state_change<F>(&self, callback: F) -> ListenerGuard
    where
        F: Fn(&ConnectionStatus) + Send + Sync + 'static,
    {
        self.inner.state_listeners.add(callback)
    }

    /// 등록된 메시지 리스너 수.
    pub fn message_listener_count(&self) -> usize {
        self.inner.message_listeners.len()
    }
}

impl std::fmt::Debug for FeedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedClient")
            .field("url", &self.inner.url)
            .field("status", &*self.inner.status.borrow())
            .finish()
    }
}

/// 연결을 소유하는 백그라운드 태스크.
struct Connection {
    url: String,
    policy: ReconnectPolicy,
    handshake_timeout: Duration,
    stable_after: Duration,
    gateway: GatewayDetector,
    status: ConnectionStatus,
    status_tx: watch::Sender<ConnectionStatus>,
    message_listeners: Arc<Listeners<Envelope>>,
    state_listeners: Arc<Listeners<ConnectionStatus>>,
    /// 서버에 구독이 전송된 토픽 (재연결 시 복원)
    active: Vec<Topic>,
    /// 연결 전 요청된 토픽 (요청 순서 유지)
    pending: Vec<Topic>,
}

impl Connection {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut next = Next::Idle;
        loop {
            next = match next {
                Next::Idle => match commands.recv().await {
                    Some(command) => self.offline_command(command, true).unwrap_or(Next::Idle),
                    None => Next::Stop,
                },
                Next::Connect => self.connect(&mut commands).await,
                Next::Backoff(delay) => self.backoff(delay, &mut commands).await,
                Next::Stop => break,
            };
        }
        debug!(url = %self.url, "Client task stopped");
    }

    /// 연결이 없을 때 받은 명령 처리.
    ///
    /// 현재 단계를 벗어나야 하면 다음 단계를 반환합니다.
    fn offline_command(&mut self, command: Command, idle: bool) -> Option<Next> {
        match command {
            Command::Connect => {
                let halted = self.status.max_reconnect_reached
                    || self.status.state == ConnectionState::Error;
                (idle && !halted).then_some(Next::Connect)
            }
            Command::Reconnect => {
                self.reset_attempts();
                Some(Next::Connect)
            }
            Command::Disconnect => {
                self.mark_disconnected();
                Some(Next::Idle)
            }
            Command::Subscribe(topic) => {
                if !self.pending.contains(&topic) && !self.active.contains(&topic) {
                    debug!(%topic, "Queued subscription until connected");
                    self.pending.push(topic);
                }
                None
            }
            Command::Unsubscribe(topic) => {
                self.pending.retain(|t| t != &topic);
                self.active.retain(|t| t != &topic);
                None
            }
        }
    }

    async fn backoff(
        &mut self,
        delay: Duration,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> Next {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return Next::Connect,
                command = commands.recv() => match command {
                    Some(command) => {
                        if let Some(next) = self.offline_command(command, false) {
                            return next;
                        }
                    }
                    None => return Next::Stop,
                }
            }
        }
    }

    async fn connect(&mut self, commands: &mut mpsc::UnboundedReceiver<Command>) -> Next {
        self.update(|s| {
            s.state = ConnectionState::Connecting;
            s.client_id = None;
        });
        info!(
            url = %self.url,
            attempt = self.status.reconnect_count,
            "Connecting push channel"
        );

        let handshake = tokio::time::timeout(self.handshake_timeout, connect_async(self.url.clone()));
        tokio::pin!(handshake);

        let result = loop {
            tokio::select! {
                result = &mut handshake => break result,
                command = commands.recv() => match command {
                    Some(command) => {
                        if let Some(next) = self.offline_command(command, false) {
                            return next;
                        }
                    }
                    None => return Next::Stop,
                }
            }
        };

        let stream = match result {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => return self.retry_after(ClientError::from_handshake(e)),
            Err(_) => {
                return self.retry_after(ClientError::Timeout(format!(
                    "handshake did not complete within {:?}",
                    self.handshake_timeout
                )))
            }
        };

        let opened_at = Instant::now();
        let end = self.serve(stream, commands).await;
        let lifetime = opened_at.elapsed();

        match end {
            ConnectionEnd::Requested => {
                self.mark_disconnected();
                Next::Idle
            }
            ConnectionEnd::Reconnect => {
                self.reset_attempts();
                Next::Connect
            }
            ConnectionEnd::Shutdown => Next::Stop,
            ConnectionEnd::Lost(err) => self.connection_lost(err, lifetime),
        }
    }

    /// 연결된 동안의 송수신 루프.
    async fn serve(
        &mut self,
        stream: WsStream,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> ConnectionEnd {
        let (mut write, mut read) = stream.split();

        self.update(|s| {
            s.state = ConnectionState::Connected;
            s.last_error = None;
        });
        info!(url = %self.url, "Push channel connected");

        // 이전 연결의 토픽을 먼저 복원하고 대기열을 요청 순서대로 전송
        let mut topics = std::mem::take(&mut self.active);
        for topic in self.pending.drain(..) {
            if !topics.contains(&topic) {
                topics.push(topic);
            }
        }
        self.active = topics;

        for topic in self.active.clone() {
            if let Err(e) = send_control(&mut write, &ControlMessage::Subscribe { topic }).await {
                return ConnectionEnd::Lost(e);
            }
        }
        if !self.active.is_empty() {
            debug!(count = self.active.len(), "Subscriptions sent");
        }

        loop {
            tokio::select! {
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = self.dispatch(&text) {
                            if let Err(e) = send_control(&mut write, &reply).await {
                                return ConnectionEnd::Lost(e);
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let err = match frame {
                            Some(frame) => ClientError::from_close(u16::from(frame.code), frame.reason.to_string()),
                            None => ClientError::Transport("closed without close frame".to_string()),
                        };
                        return ConnectionEnd::Lost(err);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return ConnectionEnd::Lost(ClientError::Transport(e.to_string())),
                    None => return ConnectionEnd::Lost(ClientError::Transport("stream ended".to_string())),
                },
                command = commands.recv() => {
                    let Some(command) = command else {
                        close(&mut write, &mut read).await;
                        return ConnectionEnd::Shutdown;
                    };
                    match command {
                        Command::Connect => {}
                        Command::Reconnect => {
                            close(&mut write, &mut read).await;
                            return ConnectionEnd::Reconnect;
                        }
                        Command::Disconnect => {
                            close(&mut write, &mut read).await;
                            return ConnectionEnd::Requested;
                        }
                        Command::Subscribe(topic) => {
                            if !self.active.contains(&topic) {
                                self.active.push(topic.clone());
                                if let Err(e) = send_control(&mut write, &ControlMessage::Subscribe { topic }).await {
                                    return ConnectionEnd::Lost(e);
                                }
                            }
                        }
                        Command::Unsubscribe(topic) => {
                            self.active.retain(|t| t != &topic);
                            if let Err(e) = send_control(&mut write, &ControlMessage::Unsubscribe { topic }).await {
                                return ConnectionEnd::Lost(e);
                            }
                        }
                    }
                }
            }
        }
    }

    /// 수신 메시지 처리. 응답이 필요하면 보낼 제어 메시지를 반환합니다.
    fn dispatch(&mut self, text: &str) -> Option<ControlMessage> {
        let envelope = match Envelope::from_json(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, payload = %text, "Dropping undecodable message");
                return None;
            }
        };

        match &envelope {
            Envelope::Ping => return Some(ControlMessage::Pong),
            Envelope::Connected { client_id } => {
                let client_id = client_id.clone();
                debug!(%client_id, "Session assigned");
                self.update(|s| s.client_id = Some(client_id));
            }
            Envelope::Error { message } => {
                warn!(%message, "Server reported error");
            }
            _ => {}
        }

        self.message_listeners.emit(&envelope);
        None
    }

    /// 예상치 못한 종료 처리.
    fn connection_lost(&mut self, err: ClientError, lifetime: Duration) -> Next {
        let err = if lifetime >= self.stable_after {
            self.gateway.reset();
            self.reset_attempts();
            err
        } else if self.gateway.record(lifetime) && err.is_retryable() {
            ClientError::Gateway(format!(
                "{} consecutive connections closed within {:?}",
                self.gateway.short_lived(),
                self.stable_after
            ))
        } else {
            err
        };
        self.retry_after(err)
    }

    /// 재시도 예약. 재시도할 수 없으면 `Error` 상태로 멈춥니다.
    fn retry_after(&mut self, err: ClientError) -> Next {
        let kind = err.kind();

        if !err.is_retryable() {
            error!(url = %self.url, error = %err, "Push channel rejected, not retrying");
            self.update(|s| {
                s.state = ConnectionState::Error;
                s.last_error = Some(kind);
                s.client_id = None;
            });
            return Next::Idle;
        }

        let attempt = self.status.reconnect_count + 1;
        if !self.policy.allows(attempt) {
            error!(
                url = %self.url,
                error = %err,
                max_attempts = self.policy.max_attempts,
                "Max reconnect attempts reached, giving up"
            );
            self.update(|s| {
                s.state = ConnectionState::Error;
                s.max_reconnect_reached = true;
                s.last_error = Some(kind);
                s.client_id = None;
            });
            return Next::Idle;
        }

        let delay = self.policy.delay_for(attempt);
        warn!(
            url = %self.url,
            error = %err,
            attempt,
            max_attempts = self.policy.max_attempts,
            "Push channel lost, reconnecting in {:?}",
            delay
        );
        self.update(|s| {
            s.state = ConnectionState::Disconnected;
            s.reconnect_count = attempt;
            s.last_error = Some(kind);
            s.client_id = None;
        });
        Next::Backoff(delay)
    }

    fn reset_attempts(&mut self) {
        self.gateway.reset();
        self.update(|s| {
            s.reconnect_count = 0;
            s.max_reconnect_reached = false;
        });
    }

    fn mark_disconnected(&mut self) {
        info!(url = %self.url, "Push channel disconnected");
        self.gateway.reset();
        self.update(|s| {
            *s = ConnectionStatus::default();
        });
    }

    /// 상태를 바꾸고 바뀌었으면 watch 채널과 리스너에 알립니다.
    fn update(&mut self, change: impl FnOnce(&mut ConnectionStatus)) {
        let before = self.status.clone();
        change(&mut self.status);
        if self.status == before {
            return;
        }
        self.status_tx.send_replace(self.status.clone());
        self.state_listeners.emit(&self.status);
    }
}

async fn send_control(write: &mut WsWrite, message: &ControlMessage) -> Result<(), ClientError> {
    let json = message.to_json()?;
    write
        .send(Message::Text(json))
        .await
        .map_err(|e| ClientError::Transport(e.to_string()))
}

/// 정상 종료 프레임을 보내고 서버 응답을 잠시 기다립니다.
async fn close(write: &mut WsWrite, read: &mut WsRead) {
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: "client closing".into(),
    };
    if write.send(Message::Close(Some(frame))).await.is_err() {
        return;
    }
    let _ = tokio::time::timeout(Duration::from_secs(1), async {
        while let Some(Ok(_)) = read.next().await {}
    })
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use livefeed_core::ErrorKind;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    /// 연결을 받아 수신한 텍스트 프레임을 채널로 넘기는 테스트 서버.
    async fn spawn_server(
        greeting: Option<String>,
    ) -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let tx = tx.clone();
                let greeting = greeting.clone();
                tokio::spawn(async move {
                    let mut ws = accept_async(socket).await.unwrap();
                    if let Some(greeting) = greeting {
                        ws.send(Message::Text(greeting)).await.unwrap();
                    }
                    while let Some(Ok(frame)) = ws.next().await {
                        if let Message::Text(text) = frame {
                            let _ = tx.send(text);
                        }
                    }
                });
            }
        });

        (format!("ws://{}", addr), rx)
    }

    async fn wait_for(client: &FeedClient, predicate: impl Fn(&ConnectionStatus) -> bool) {
        let mut status = client.watch_status();
        tokio::time::timeout(Duration::from_secs(5), status.wait_for(|s| predicate(s)))
            .await
            .expect("status not reached")
            .unwrap();
    }

    fn fast_config(url: &str, max_attempts: u32) -> ClientConfig {
        ClientConfig::new(url)
            .with_reconnect(ReconnectPolicy::fixed(Duration::from_millis(5), max_attempts))
            .with_handshake_timeout(Duration::from_secs(2))
    }

    #[tokio::test]
    async fn test_subscribe_while_disconnected_flushes_once() {
        let (url, mut frames) = spawn_server(None).await;
        let client = FeedClient::new(fast_config(&url, 3));

        assert!(client.subscribe(Topic::price("005930")));
        assert!(!client.subscribe(Topic::price("005930")));
        client.connect();

        let first = tokio::time::timeout(Duration::from_secs(5), frames.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            ControlMessage::from_json(&first).unwrap(),
            ControlMessage::Subscribe {
                topic: Topic::price("005930")
            }
        );

        // 중복 구독 없음
        let extra = tokio::time::timeout(Duration::from_millis(200), frames.recv()).await;
        assert!(extra.is_err());
        assert_eq!(client.ref_count(&Topic::price("005930")), 2);
    }

    #[tokio::test]
    async fn test_pending_topics_flushed_in_request_order() {
        let (url, mut frames) = spawn_server(None).await;
        let client = FeedClient::new(fast_config(&url, 3));

        let topics = vec![
            Topic::market_gate(),
            Topic::price("000660"),
            Topic::signal("vcp"),
            Topic::price("005930"),
        ];
        for topic in &topics {
            client.subscribe(topic.clone());
        }
        client.unsubscribe(&Topic::signal("vcp"));
        client.connect();

        let mut received = Vec::new();
        for _ in 0..3 {
            let text = tokio::time::timeout(Duration::from_secs(5), frames.recv())
                .await
                .unwrap()
                .unwrap();
            match ControlMessage::from_json(&text).unwrap() {
                ControlMessage::Subscribe { topic } => received.push(topic),
                other => panic!("unexpected {:?}", other),
            }
        }

        assert_eq!(
            received,
            vec![
                Topic::market_gate(),
                Topic::price("000660"),
                Topic::price("005930")
            ]
        );
    }

    #[tokio::test]
    async fn test_last_release_sends_unsubscribe() {
        let (url, mut frames) = spawn_server(None).await;
        let client = FeedClient::new(fast_config(&url, 3));
        client.connect();
        wait_for(&client, |s| s.is_connected()).await;

        let topic = Topic::price("005930");
        client.subscribe(topic.clone());
        client.subscribe(topic.clone());
        assert!(!client.unsubscribe(&topic));
        assert!(client.unsubscribe(&topic));

        let subscribe = frames.recv().await.unwrap();
        let unsubscribe = frames.recv().await.unwrap();
        assert!(matches!(
            ControlMessage::from_json(&subscribe).unwrap(),
            ControlMessage::Subscribe { .. }
        ));
        assert_eq!(
            ControlMessage::from_json(&unsubscribe).unwrap(),
            ControlMessage::Unsubscribe { topic }
        );
    }

    #[tokio::test]
    async fn test_records_client_id() {
        let (url, mut frames) = spawn_server(Some(
            r#"{"type":"connected","client_id":"session-1"}"#.to_string(),
        ))
        .await;
        let client = FeedClient::new(fast_config(&url, 3));
        client.connect();

        wait_for(&client, |s| s.client_id.as_deref() == Some("session-1")).await;
        assert!(frames.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_server_ping_gets_pong() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (tx, mut replies) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(socket).await.unwrap();
            ws.send(Message::Text(r#"{"type":"ping"}"#.to_string()))
                .await
                .unwrap();
            while let Some(Ok(frame)) = ws.next().await {
                if let Message::Text(text) = frame {
                    let _ = tx.send(text);
                }
            }
        });

        let client = FeedClient::new(fast_config(&url, 3));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _guard = client.on_message(move |e| sink.lock().push(e.kind()));
        client.connect();

        let reply = tokio::time::timeout(Duration::from_secs(5), replies.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            ControlMessage::from_json(&reply).unwrap(),
            ControlMessage::Pong
        );
        // ping은 애플리케이션 리스너에 전달되지 않음
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        // 아무도 듣지 않는 포트
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        drop(listener);

        let client = FeedClient::new(fast_config(&url, 10));
        let counts = Arc::new(Mutex::new(Vec::new()));
        let sink = counts.clone();
        let _guard = client.on_state_change(move |s| {
            sink.lock().push((s.reconnect_count, s.max_reconnect_reached))
        });
        client.connect();

        wait_for(&client, |s| s.max_reconnect_reached).await;

        let status = client.status();
        assert_eq!(status.reconnect_count, 10);
        assert_eq!(status.state, ConnectionState::Error);
        assert_eq!(status.last_error, Some(ErrorKind::Transport));

        let counts = counts.lock();
        let attempts: Vec<u32> = counts.iter().map(|(c, _)| *c).collect();
        assert!(attempts.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(
            counts
                .windows(2)
                .filter(|w| !w[0].1 && w[1].1)
                .count(),
            1
        );

        // connect()로는 재개되지 않음
        client.connect();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(client.status().max_reconnect_reached);
    }

    #[tokio::test]
    async fn test_manual_reconnect_resets_attempts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let url = format!("ws://{}", addr);

        let client = FeedClient::new(fast_config(&url, 2));
        client.connect();
        wait_for(&client, |s| s.max_reconnect_reached).await;

        // 서버가 올라온 뒤 수동 재연결
        let listener = TcpListener::bind(addr).await.unwrap();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(socket).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        client.reconnect();
        wait_for(&client, |s| s.is_connected()).await;

        let status = client.status();
        assert_eq!(status.reconnect_count, 0);
        assert!(!status.max_reconnect_reached);
    }

    #[tokio::test]
    async fn test_policy_close_is_not_retried() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(socket).await.unwrap();
            ws.close(Some(CloseFrame {
                code: CloseCode::Policy,
                reason: "push disabled".into(),
            }))
            .await
            .unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let client = FeedClient::new(fast_config(&url, 10));
        client.connect();
        wait_for(&client, |s| s.state == ConnectionState::Error).await;

        let status = client.status();
        assert!(status.is_disabled());
        assert_eq!(status.reconnect_count, 0);
        assert!(!status.max_reconnect_reached);
    }

    #[tokio::test]
    async fn test_short_lived_connections_classified_as_gateway() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        // 연결을 받자마자 끊는 서버
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                if let Ok(mut ws) = accept_async(socket).await {
                    let _ = ws.close(None).await;
                }
            }
        });

        let client = FeedClient::new(fast_config(&url, 10));
        client.connect();
        wait_for(&client, |s| s.is_gateway_error()).await;

        assert!(client.status().reconnect_count >= 3);
    }

    #[tokio::test]
    async fn test_refused_handshake_is_disabled() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/ws")
            .with_status(404)
            .create_async()
            .await;

        let url = format!("{}/ws", server.url().replacen("http", "ws", 1));
        let client = FeedClient::new(fast_config(&url, 10));
        client.connect();
        wait_for(&client, |s| s.state == ConnectionState::Error).await;

        assert!(client.status().is_disabled());
    }

    #[tokio::test]
    async fn test_dropping_listener_keeps_connection() {
        let (url, _frames) = spawn_server(None).await;
        let client = FeedClient::new(fast_config(&url, 3));
        client.connect();
        wait_for(&client, |s| s.is_connected()).await;

        let guard = client.on_message(|_| {});
        assert_eq!(client.message_listener_count(), 1);
        drop(guard);

        assert_eq!(client.message_listener_count(), 0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(client.is_connected());
    }
}
