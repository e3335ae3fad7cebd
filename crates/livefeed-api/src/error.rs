//! REST 폴백 엔드포인트의 에러 응답 타입.

use axum::http::StatusCode;
use axum::Json;
use livefeed_core::{ErrorKind, FeedError};
use serde::{Deserialize, Serialize};

/// API 에러 응답.
///
/// ```json
/// {
///   "code": "SOURCE_UNAVAILABLE",
///   "message": "데이터 소스 에러: upstream timeout",
///   "timestamp": 1738300800
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    /// 에러 코드 (예: "INVALID_INPUT", "SOURCE_UNAVAILABLE")
    pub code: String,
    /// 사람이 읽을 수 있는 에러 메시지
    pub message: String,
    /// 에러 발생 타임스탬프 (Unix 초)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl ApiErrorResponse {
    /// 타임스탬프가 포함된 에러 생성.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            timestamp: Some(chrono::Utc::now().timestamp()),
        }
    }
}

impl std::fmt::Display for ApiErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiErrorResponse {}

/// API 핸들러 Result 타입 별칭.
pub type ApiResult<T> = Result<T, (StatusCode, Json<ApiErrorResponse>)>;

/// 잘못된 요청 응답 생성.
pub fn bad_request(message: impl Into<String>) -> (StatusCode, Json<ApiErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiErrorResponse::new("INVALID_INPUT", message)),
    )
}

/// 피드 에러를 HTTP 응답으로 변환.
///
/// 소스/전송 계열은 503, 디코딩은 502, 나머지는 500입니다.
pub fn feed_error_response(err: FeedError) -> (StatusCode, Json<ApiErrorResponse>) {
    let (status, code) = match err.kind() {
        ErrorKind::Source | ErrorKind::Transport | ErrorKind::Gateway => {
            (StatusCode::SERVICE_UNAVAILABLE, "SOURCE_UNAVAILABLE")
        }
        ErrorKind::Decode => (StatusCode::BAD_GATEWAY, "UPSTREAM_DECODE_ERROR"),
        ErrorKind::Disabled | ErrorKind::Other => {
            (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
        }
    };

    (status, Json(ApiErrorResponse::new(code, err.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_response_new() {
        let error = ApiErrorResponse::new("TEST_ERROR", "Test message");
        assert_eq!(error.code, "TEST_ERROR");
        assert!(error.timestamp.is_some());
        assert_eq!(error.to_string(), "[TEST_ERROR] Test message");
    }

    #[test]
    fn test_feed_error_mapping() {
        let (status, body) = feed_error_response(FeedError::Source("down".to_string()));
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.code, "SOURCE_UNAVAILABLE");

        let (status, _) = feed_error_response(FeedError::Timeout("3s".to_string()));
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, _) = feed_error_response(FeedError::Decode("bad".to_string()));
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }
}
