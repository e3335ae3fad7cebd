//! 연결 상태.

use std::fmt;

use livefeed_core::ErrorKind;

/// 푸시 채널 연결 상태.
///
/// `Disconnected → Connecting → Connected`, 치명적인 실패는 `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// 연결 안 됨 (재연결 대기 포함)
    #[default]
    Disconnected,
    /// 핸드셰이크 중
    Connecting,
    /// 연결됨
    Connected,
    /// 재시도하지 않는 실패 (비활성화, 최대 재시도 초과)
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// 상태 변경 리스너와 watch 채널로 전달되는 연결 상태 스냅샷.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionStatus {
    /// 현재 상태
    pub state: ConnectionState,
    /// 현재 끊김 구간의 재연결 시도 횟수
    pub reconnect_count: u32,
    /// 최대 재시도 횟수에 도달해 자동 재연결이 멈췄는지
    pub max_reconnect_reached: bool,
    /// 마지막 실패 분류
    pub last_error: Option<ErrorKind>,
    /// 서버가 부여한 세션 ID (연결 중일 때만)
    pub client_id: Option<String>,
}

impl ConnectionStatus {
    /// 연결되어 있는지 확인.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// 게이트웨이 장애로 분류된 실패인지 확인.
    pub fn is_gateway_error(&self) -> bool {
        self.last_error == Some(ErrorKind::Gateway)
    }

    /// 서버가 푸시 채널을 거부했는지 확인.
    pub fn is_disabled(&self) -> bool {
        self.last_error == Some(ErrorKind::Disabled)
    }
}
