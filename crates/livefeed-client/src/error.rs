//! 클라이언트 에러 타입.
//!
//! 연결 실패를 재시도 대상(전송/게이트웨이)과 재시도 불가(비활성화)로 분류합니다.

use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

use livefeed_core::{ErrorKind, FeedError};

/// 정책 위반으로 서버가 연결을 거부할 때의 종료 코드.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// 인증 실패 종료 코드 (애플리케이션 정의).
pub const CLOSE_UNAUTHORIZED: u16 = 4001;

/// 권한 없음 종료 코드 (애플리케이션 정의).
pub const CLOSE_FORBIDDEN: u16 = 4003;

/// 클라이언트 에러.
#[derive(Debug, Error)]
pub enum ClientError {
    /// 연결 거부, 비정상 종료, 프로토콜 오류
    #[error("전송 에러: {0}")]
    Transport(String),

    /// 게이트웨이 장애 추정
    #[error("게이트웨이 에러: {0}")]
    Gateway(String),

    /// 서버가 푸시 채널을 거부함
    #[error("푸시 채널 비활성화: {0}")]
    Disabled(String),

    /// 서버가 종료 프레임을 보냄
    #[error("연결 종료 (code={code}): {reason}")]
    Closed {
        /// 종료 코드
        code: u16,
        /// 종료 사유
        reason: String,
    },

    /// 타임아웃
    #[error("타임아웃: {0}")]
    Timeout(String),

    /// REST 조회 실패
    #[error("HTTP 에러: {0}")]
    Http(String),

    /// 메시지/응답 디코딩 실패
    #[error("디코딩 에러: {0}")]
    Decode(String),

    /// 지원되지 않는 작업
    #[error("지원되지 않음: {0}")]
    Unsupported(String),
}

/// 클라이언트 작업을 위한 Result 타입.
pub type ClientResult<T> = Result<T, ClientError>;

impl ClientError {
    /// 종료 프레임의 코드로 에러를 분류합니다.
    ///
    /// 1008/4001/4003은 재시도 불가([`ClientError::Disabled`]).
    pub fn from_close(code: u16, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        match code {
            CLOSE_POLICY_VIOLATION | CLOSE_UNAUTHORIZED | CLOSE_FORBIDDEN => {
                ClientError::Disabled(format!("close code {}: {}", code, reason))
            }
            _ => ClientError::Closed { code, reason },
        }
    }

    /// WebSocket 핸드셰이크 실패를 분류합니다.
    ///
    /// - 401/403/404: 엔드포인트가 없거나 거부됨 → [`ClientError::Disabled`]
    /// - 502/503/504: 프록시/로드밸런서 장애 → [`ClientError::Gateway`]
    /// - 그 외: [`ClientError::Transport`]
    pub fn from_handshake(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::Http(response) => {
                let status = response.status().as_u16();
                match status {
                    401 | 403 | 404 => {
                        ClientError::Disabled(format!("handshake rejected with HTTP {}", status))
                    }
                    502..=504 => {
                        ClientError::Gateway(format!("handshake failed with HTTP {}", status))
                    }
                    _ => ClientError::Transport(format!("handshake failed with HTTP {}", status)),
                }
            }
            other => ClientError::Transport(other.to_string()),
        }
    }

    /// 에러 분류를 반환합니다.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Transport(_) | ClientError::Closed { .. } | ClientError::Timeout(_) => {
                ErrorKind::Transport
            }
            ClientError::Gateway(_) => ErrorKind::Gateway,
            ClientError::Disabled(_) => ErrorKind::Disabled,
            ClientError::Decode(_) => ErrorKind::Decode,
            ClientError::Http(_) => ErrorKind::Source,
            ClientError::Unsupported(_) => ErrorKind::Other,
        }
    }

    /// 자동 재연결 대상인지 확인합니다.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Transport(_)
                | ClientError::Gateway(_)
                | ClientError::Closed { .. }
                | ClientError::Timeout(_)
        )
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout(err.to_string())
        } else if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else {
            ClientError::Http(err.to_string())
        }
    }
}

impl From<FeedError> for ClientError {
    fn from(err: FeedError) -> Self {
        match err {
            FeedError::Transport(msg) => ClientError::Transport(msg),
            FeedError::Gateway(msg) => ClientError::Gateway(msg),
            FeedError::Disabled(msg) => ClientError::Disabled(msg),
            FeedError::Timeout(msg) => ClientError::Timeout(msg),
            FeedError::Decode(msg) | FeedError::InvalidTopic(msg) => ClientError::Decode(msg),
            FeedError::Source(msg) => ClientError::Http(msg),
            FeedError::Unsupported(msg) => ClientError::Unsupported(msg),
            FeedError::Config(msg) | FeedError::Internal(msg) => ClientError::Transport(msg),
        }
    }
}

impl From<ClientError> for FeedError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Transport(msg) => FeedError::Transport(msg),
            ClientError::Closed { code, reason } => {
                FeedError::Transport(format!("closed with {}: {}", code, reason))
            }
            ClientError::Gateway(msg) => FeedError::Gateway(msg),
            ClientError::Disabled(msg) => FeedError::Disabled(msg),
            ClientError::Timeout(msg) => FeedError::Timeout(msg),
            ClientError::Http(msg) => FeedError::Source(msg),
            ClientError::Decode(msg) => FeedError::Decode(msg),
            ClientError::Unsupported(msg) => FeedError::Unsupported(msg),
        }
    }
}

/// 연속된 단명 연결로 게이트웨이 장애를 감지합니다.
///
/// 연결이 열린 뒤 `window` 안에 닫히는 일이 `threshold`번 연속되면
/// 서버가 아니라 중간 게이트웨이 문제로 판단합니다.
#[derive(Debug, Clone)]
pub struct GatewayDetector {
    window: Duration,
    threshold: u32,
    short_lived: u32,
}

impl GatewayDetector {
    /// 새 감지기 생성.
    pub fn new(window: Duration, threshold: u32) -> Self {
        Self {
            window,
            threshold,
            short_lived: 0,
        }
    }

    /// 연결 하나의 수명을 기록합니다.
    ///
    /// # Returns
    ///
    /// 게이트웨이 장애로 판단되면 `true`
    pub fn record(&mut self, lifetime: Duration) -> bool {
        if lifetime >= self.window {
            self.short_lived = 0;
            return false;
        }
        self.short_lived += 1;
        self.short_lived >= self.threshold
    }

    /// 연속 단명 연결 수.
    pub fn short_lived(&self) -> u32 {
        self.short_lived
    }

    /// 카운터 초기화.
    pub fn reset(&mut self) {
        self.short_lived = 0;
    }
}

impl Default for GatewayDetector {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_code_classification() {
        assert!(matches!(
            ClientError::from_close(1008, "policy"),
            ClientError::Disabled(_)
        ));
        assert!(matches!(
            ClientError::from_close(4003, "forbidden"),
            ClientError::Disabled(_)
        ));
        assert!(!ClientError::from_close(4001, "").is_retryable());

        let away = ClientError::from_close(1001, "Session evicted");
        assert!(away.is_retryable());
        assert_eq!(away.kind(), ErrorKind::Transport);
    }

    #[test]
    fn test_gateway_detector() {
        let mut detector = GatewayDetector::default();
        let short = Duration::from_millis(200);

        assert!(!detector.record(short));
        assert!(!detector.record(short));
        assert!(detector.record(short));

        // 정상 수명의 연결이 끼면 초기화
        assert!(!detector.record(Duration::from_secs(5)));
        assert_eq!(detector.short_lived(), 0);
        assert!(!detector.record(short));
    }

    #[test]
    fn test_feed_error_conversion() {
        let err: FeedError = ClientError::Gateway("502".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Gateway);

        let err: ClientError = FeedError::Decode("bad".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Decode);
    }
}
