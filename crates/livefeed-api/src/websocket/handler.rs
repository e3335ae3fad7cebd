//! WebSocket 연결 handler.
//!
//! 연결마다 세션을 레지스트리에 등록하고, 송신 큐를 소켓으로 흘려보내는 태스크와
//! 클라이언트 제어 메시지를 처리하는 태스크를 실행합니다.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tokio::time::timeout;
use tracing::{debug, info, warn, Instrument};

use livefeed_core::{session_span, ControlMessage, Envelope};

use super::registry::ConnectionRegistry;
use crate::metrics::{decrement_websocket_connections, increment_websocket_connections};
use crate::state::AppState;

/// 소켓 쓰기 한 번의 최대 대기 시간.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket 업그레이드 핸들러.
///
/// # 엔드포인트
///
/// `GET /ws`
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// WebSocket 연결 처리.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let session_id = uuid::Uuid::new_v4().to_string();
    let span = session_span!(session_id);

    run_session(socket, state, session_id).instrument(span).await;
}

async fn run_session(socket: WebSocket, state: Arc<AppState>, session_id: String) {
    let registry = state.registry.clone();

    let (handle, mut outbound) = registry.channel();
    let closed = outbound.closed();
    registry.connect(&session_id, handle).await;
    increment_websocket_connections();
    info!("WebSocket connected");

    // 첫 메시지는 항상 connected
    registry
        .send_to(
            &session_id,
            &Envelope::Connected {
                client_id: session_id.clone(),
            },
        )
        .await;

    let (mut sender, mut receiver) = socket.split();

    // 송신 큐 → 소켓
    let mut send_task = tokio::spawn(
        async move {
            loop {
                tokio::select! {
                    _ = closed.cancelled() => {
                        let frame = CloseFrame {
                            code: close_code::AWAY,
                            reason: Utf8Bytes::from_static("session closed"),
                        };
                        let _ = sender.send(Message::Close(Some(frame))).await;
                        break;
                    }
                    next = outbound.recv() => {
                        let Some(frame) = next else { break };
                        let message = Message::Text(frame.as_str().to_owned().into());
                        match timeout(WRITE_TIMEOUT, sender.send(message)).await {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => {
                                debug!(error = %e, "Socket write failed");
                                break;
                            }
                            Err(_) => {
                                warn!("Socket write timed out");
                                break;
                            }
                        }
                    }
                }
            }
        }
        .in_current_span(),
    );

    // 소켓 → 제어 메시지 처리
    let recv_registry = registry.clone();
    let recv_session = session_id.clone();
    let mut receive_task = tokio::spawn(
        async move {
            while let Some(result) = receiver.next().await {
                match result {
                    Ok(msg) => {
                        if !handle_client_message(&recv_session, msg, &recv_registry).await {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "WebSocket receive error");
                        break;
                    }
                }
            }
        }
        .in_current_span(),
    );

    // 하나의 태스크가 종료되면 다른 것도 종료
    tokio::select! {
        _ = &mut send_task => {
            receive_task.abort();
            debug!("Send task ended");
        }
        _ = &mut receive_task => {
            send_task.abort();
            debug!("Receive task ended");
        }
    }

    registry.disconnect(&session_id).await;
    decrement_websocket_connections();

    info!("WebSocket disconnected");
}

/// 클라이언트 메시지 처리.
///
/// # Returns
///
/// `true`면 연결 유지, `false`면 연결 종료
async fn handle_client_message(
    session_id: &str,
    msg: Message,
    registry: &ConnectionRegistry,
) -> bool {
    match msg {
        Message::Text(text) => {
            match ControlMessage::from_json(text.as_str()) {
                Ok(control) => process_control_message(session_id, control, registry).await,
                Err(e) => {
                    warn!(error = %e, "Invalid control message");
                    // 해당 세션에만 에러 응답
                    registry
                        .send_to(session_id, &Envelope::error(e.to_string()))
                        .await;
                    true
                }
            }
        }
        Message::Binary(_) => {
            registry
                .send_to(session_id, &Envelope::error("binary messages are not supported"))
                .await;
            true
        }
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => {
            debug!("Close message received");
            false
        }
    }
}

/// 파싱된 제어 메시지 처리.
async fn process_control_message(
    session_id: &str,
    msg: ControlMessage,
    registry: &ConnectionRegistry,
) -> bool {
    match msg {
        ControlMessage::Subscribe { topic } => {
            if registry.subscribe(session_id, &topic).await {
                registry
                    .send_to(session_id, &Envelope::Subscribed { topic })
                    .await;
            }
        }
        ControlMessage::Unsubscribe { topic } => {
            if registry.unsubscribe(session_id, &topic).await {
                registry
                    .send_to(session_id, &Envelope::Unsubscribed { topic })
                    .await;
            }
        }
        ControlMessage::Pong => {
            registry.record_pong(session_id).await;
        }
        ControlMessage::Ping => {
            registry.send_to(session_id, &Envelope::Pong).await;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::registry::{create_registry, SessionReceiver};
    use livefeed_core::Topic;

    fn text(json: &str) -> Message {
        Message::Text(json.to_string().into())
    }

    async fn session(registry: &ConnectionRegistry, id: &str) -> SessionReceiver {
        let (handle, rx) = registry.channel();
        registry.connect(id, handle).await;
        rx
    }

    #[tokio::test]
    async fn test_subscribe_is_acknowledged_to_sender_only() {
        let registry = create_registry(16);
        let mut me = session(&registry, "me").await;
        let mut other = session(&registry, "other").await;

        let keep = handle_client_message(
            "me",
            text(r#"{"type":"subscribe","topic":"price:005930"}"#),
            &registry,
        )
        .await;

        assert!(keep);
        assert_eq!(
            me.try_recv().unwrap().decode().unwrap(),
            Envelope::Subscribed {
                topic: Topic::price("005930")
            }
        );
        assert!(other.try_recv().is_none());
        assert_eq!(registry.subscriber_count(&Topic::price("005930")).await, 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_acknowledged() {
        let registry = create_registry(16);
        let mut me = session(&registry, "me").await;
        registry.subscribe("me", &Topic::market("KOSPI")).await;

        handle_client_message(
            "me",
            text(r#"{"type":"unsubscribe","topic":"market:KOSPI"}"#),
            &registry,
        )
        .await;

        assert!(matches!(
            me.try_recv().unwrap().decode().unwrap(),
            Envelope::Unsubscribed { .. }
        ));
        assert_eq!(registry.subscriber_count(&Topic::market("KOSPI")).await, 0);
    }

    #[tokio::test]
    async fn test_invalid_message_keeps_connection() {
        let registry = create_registry(16);
        let mut me = session(&registry, "me").await;
        let mut other = session(&registry, "other").await;

        let keep = handle_client_message("me", text("not json"), &registry).await;

        assert!(keep);
        assert!(matches!(
            me.try_recv().unwrap().decode().unwrap(),
            Envelope::Error { .. }
        ));
        assert!(other.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_client_ping_gets_pong() {
        let registry = create_registry(16);
        let mut me = session(&registry, "me").await;

        handle_client_message("me", text(r#"{"type":"ping"}"#), &registry).await;

        assert_eq!(me.try_recv().unwrap().decode().unwrap(), Envelope::Pong);
    }

    #[tokio::test]
    async fn test_close_ends_session() {
        let registry = create_registry(16);
        let _me = session(&registry, "me").await;

        assert!(!handle_client_message("me", Message::Close(None), &registry).await);
    }
}
