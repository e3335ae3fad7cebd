//! 실시간 피드 에러 타입.
//!
//! 서버/클라이언트 양쪽에서 공통으로 사용하는 에러 분류를 정의합니다.

use thiserror::Error;

/// 라이브 피드 에러.
#[derive(Debug, Error)]
pub enum FeedError {
    /// 연결 거부, 비정상 종료, 프로토콜 오류
    #[error("전송 에러: {0}")]
    Transport(String),

    /// 중간 게이트웨이(프록시/로드밸런서) 장애로 추정되는 연속 실패
    #[error("게이트웨이 에러: {0}")]
    Gateway(String),

    /// 서버가 푸시 채널을 거부함 (재시도 불가)
    #[error("푸시 채널 비활성화: {0}")]
    Disabled(String),

    /// 메시지 디코딩 실패
    #[error("디코딩 에러: {0}")]
    Decode(String),

    /// 퍼블리셔 업스트림 조회 실패
    #[error("데이터 소스 에러: {0}")]
    Source(String),

    /// 타임아웃
    #[error("타임아웃: {0}")]
    Timeout(String),

    /// 잘못된 토픽 문자열
    #[error("잘못된 토픽: {0}")]
    InvalidTopic(String),

    /// 설정 에러
    #[error("설정 에러: {0}")]
    Config(String),

    /// 지원되지 않는 작업
    #[error("지원되지 않음: {0}")]
    Unsupported(String),

    /// 내부 불변식 위반 (자체 메시지 직렬화 실패 등)
    #[error("내부 에러: {0}")]
    Internal(String),
}

/// 에러 분류.
///
/// UI가 "연결 불가"와 "비활성화"를 구분해 표시할 수 있도록 합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// 재시도 대상 전송 에러
    Transport,
    /// 게이트웨이 장애
    Gateway,
    /// 서버측 비활성화
    Disabled,
    /// 디코딩 실패
    Decode,
    /// 업스트림 소스 실패
    Source,
    /// 그 외
    Other,
}

/// 라이브 피드 작업을 위한 Result 타입.
pub type FeedResult<T> = Result<T, FeedError>;

impl FeedError {
    /// 에러 분류를 반환합니다.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FeedError::Transport(_) | FeedError::Timeout(_) => ErrorKind::Transport,
            FeedError::Gateway(_) => ErrorKind::Gateway,
            FeedError::Disabled(_) => ErrorKind::Disabled,
            FeedError::Decode(_) | FeedError::InvalidTopic(_) => ErrorKind::Decode,
            FeedError::Source(_) => ErrorKind::Source,
            FeedError::Config(_) | FeedError::Unsupported(_) | FeedError::Internal(_) => {
                ErrorKind::Other
            }
        }
    }

    /// 재시도 가능한 에러인지 확인합니다.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FeedError::Transport(_)
                | FeedError::Gateway(_)
                | FeedError::Timeout(_)
                | FeedError::Source(_)
        )
    }
}

impl FeedError {
    /// 보내려는 메시지를 직렬화하지 못한 경우.
    ///
    /// 수신 payload 파싱 실패(`Decode`)와 달리 상대방 데이터와 무관한 내부 에러입니다.
    pub fn encode(err: serde_json::Error) -> Self {
        FeedError::Internal(format!("failed to serialize message: {}", err))
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::Decode(err.to_string())
    }
}

impl From<config::ConfigError> for FeedError {
    fn from(err: config::ConfigError) -> Self {
        FeedError::Config(err.to_string())
    }
}
