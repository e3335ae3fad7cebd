//! 클라이언트 설정.

use std::time::Duration;

use crate::backoff::ReconnectPolicy;

/// 푸시 채널 클라이언트 설정.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket URL (예: `ws://localhost:3000/ws`)
    pub url: String,
    /// 재연결 정책
    pub reconnect: ReconnectPolicy,
    /// 핸드셰이크 타임아웃
    pub handshake_timeout: Duration,
    /// 이 시간 이상 유지된 연결은 정상 연결로 보고 재시도 횟수를 초기화
    pub stable_after: Duration,
    /// 게이트웨이 장애로 판단할 연속 단명 연결 수
    pub gateway_threshold: u32,
}

impl ClientConfig {
    /// 기본값으로 설정 생성.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectPolicy::default(),
            handshake_timeout: Duration::from_secs(10),
            stable_after: Duration::from_secs(1),
            gateway_threshold: 3,
        }
    }

    /// 재연결 정책 설정.
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// 핸드셰이크 타임아웃 설정.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// 정상 연결 판단 기준 설정.
    pub fn with_stable_after(mut self, duration: Duration) -> Self {
        self.stable_after = duration;
        self
    }
}

/// 토픽 훅 설정.
///
/// 폴링 유예 시간은 서버 하트비트 타임아웃과 별개로 조정합니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookConfig {
    /// 연결/데이터를 기다리는 시간. 지나면 REST 폴링 시작
    pub grace: Duration,
    /// 폴링 주기
    pub poll_interval: Duration,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(5),
            poll_interval: Duration::from_secs(10),
        }
    }
}

impl HookConfig {
    /// 유예 시간 설정.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// 폴링 주기 설정.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}
