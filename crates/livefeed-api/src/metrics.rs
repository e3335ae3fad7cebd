//! Prometheus 메트릭 설정 및 유틸리티.
//!
//! 세션 수, 브로드캐스트, 퇴출, 퍼블리셔/릴레이 결과를 수집하고
//! `/metrics` 엔드포인트로 노출합니다.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Prometheus 메트릭 레코더를 설치하고 렌더링 핸들을 반환합니다.
///
/// 레코더는 프로세스당 한 번만 설치할 수 있습니다.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

// ============================================================================
// 세션
// ============================================================================

/// WebSocket 연결 수 증가.
pub fn increment_websocket_connections() {
    gauge!("livefeed_sessions_active").increment(1.0);
}

/// WebSocket 연결 수 감소.
pub fn decrement_websocket_connections() {
    gauge!("livefeed_sessions_active").decrement(1.0);
}

/// 세션 퇴출 기록.
///
/// `reason`: `send_failed`, `pong_timeout`
pub fn record_eviction(reason: &'static str) {
    counter!("livefeed_sessions_evicted_total", "reason" => reason).increment(1);
}

// ============================================================================
// 브로드캐스트
// ============================================================================

/// 토픽 브로드캐스트 결과 기록.
pub fn record_broadcast(namespace: &'static str, delivered: usize) {
    counter!("livefeed_broadcasts_total", "namespace" => namespace).increment(1);
    counter!("livefeed_messages_delivered_total", "namespace" => namespace)
        .increment(delivered as u64);
}

// ============================================================================
// 퍼블리셔 / 릴레이
// ============================================================================

/// 퍼블리셔 주기 결과 기록.
///
/// `outcome`: `published`, `skipped`, `failed`
pub fn record_publish_cycle(feed: &'static str, outcome: &'static str) {
    counter!("livefeed_publish_cycles_total", "feed" => feed, "outcome" => outcome).increment(1);
}

/// 릴레이 수신 메시지 기록.
///
/// `outcome`: `relayed`, `decode_error`, `unknown_channel`
pub fn record_relay_message(outcome: &'static str) {
    counter!("livefeed_relay_messages_total", "outcome" => outcome).increment(1);
}
