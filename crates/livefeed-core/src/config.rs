//! 설정 관리.
//!
//! `config/default.toml`과 `LIVEFEED__` 접두어 환경 변수에서 서버 설정을 로드합니다.
//!
//! ```text
//! LIVEFEED__LIVENESS__PONG_TIMEOUT_SECS=45
//! LIVEFEED__RELAY__ENABLED=true
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::FeedError;

/// 기본 설정 파일 경로.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// 라이브 피드 서버 설정.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FeedConfig {
    /// HTTP/WebSocket 서버
    pub server: ServerConfig,
    /// 연결 레지스트리
    pub registry: RegistryConfig,
    /// 하트비트
    pub liveness: LivenessConfig,
    /// 업데이트 퍼블리셔
    pub publishers: PublishersConfig,
    /// Redis (스냅샷 폴백 소스, Pub/Sub 릴레이)
    pub redis: RedisConfig,
    /// Pub/Sub 릴레이
    pub relay: RelayConfig,
    /// 로깅
    pub logging: LoggingConfig,
}

/// 서버 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 바인딩할 호스트
    pub host: String,
    /// 리스닝할 포트
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

/// 연결 레지스트리 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// 세션별 송신 큐 크기. 큐가 가득 찬 세션은 끊긴 것으로 처리합니다.
    pub session_queue_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            session_queue_capacity: 256,
        }
    }
}

/// 하트비트 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LivenessConfig {
    /// 핑 전송 주기 (초)
    pub ping_interval_secs: u64,
    /// 마지막 퐁 이후 세션을 제거하기까지의 시간 (초)
    pub pong_timeout_secs: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: 15,
            pong_timeout_secs: 30,
        }
    }
}

impl LivenessConfig {
    /// 핑 주기.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }

    /// 퐁 타임아웃.
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }
}

/// 퍼블리셔 하나의 스케줄.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedSchedule {
    /// 활성화 여부
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// 발행 주기 (초)
    pub interval_secs: u64,
    /// 항상 발행할 엔티티 키 (종목코드, 지수 코드, 전략 이름)
    #[serde(default)]
    pub keys: Vec<String>,
}

impl FeedSchedule {
    fn new(interval_secs: u64, keys: &[&str]) -> Self {
        Self {
            enabled: true,
            interval_secs,
            keys: keys.iter().map(|k| k.to_string()).collect(),
        }
    }

    /// 발행 주기.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

fn default_true() -> bool {
    true
}

/// 업데이트 퍼블리셔 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PublishersConfig {
    /// 실시간 시세 서비스 기본 URL (없으면 모의 데이터 사용)
    pub upstream_url: Option<String>,
    /// 업스트림 미설정 시 모의 데이터 사용
    pub mock_data: bool,
    /// 소스 조회 타임아웃 (밀리초)
    pub source_timeout_ms: u64,
    /// 종목 시세
    pub price: FeedSchedule,
    /// 지수
    pub index: FeedSchedule,
    /// 마켓 게이트
    pub market_gate: FeedSchedule,
    /// 시그널
    pub signal: FeedSchedule,
}

impl Default for PublishersConfig {
    fn default() -> Self {
        Self {
            upstream_url: None,
            mock_data: true,
            source_timeout_ms: 3000,
            price: FeedSchedule::new(5, &[]),
            index: FeedSchedule::new(10, &["KOSPI", "KOSDAQ"]),
            market_gate: FeedSchedule::new(60, &[]),
            signal: FeedSchedule::new(300, &[]),
        }
    }
}

impl PublishersConfig {
    /// 소스 조회 타임아웃.
    pub fn source_timeout(&self) -> Duration {
        Duration::from_millis(self.source_timeout_ms)
    }
}

/// Redis 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis URL (redis://host:port/db). 없으면 Redis 기능 비활성화.
    pub url: Option<String>,
    /// 스냅샷 키 접두어
    pub snapshot_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            snapshot_prefix: "livefeed:snapshot".to_string(),
        }
    }
}

/// 릴레이 채널이 전달하는 메시지 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayKind {
    /// 시그널 스캔 완료 → `signal_update`
    Signal,
    /// 마켓 게이트 재계산 → `market_gate_update`
    MarketGate,
    /// 시세 → `price_update`
    Price,
    /// 지수 → `index_update`
    Index,
}

/// 외부 채널 하나와 메시지 종류의 매핑.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RelayRoute {
    /// Redis 채널 이름
    pub channel: String,
    /// 메시지 종류
    pub kind: RelayKind,
}

/// Pub/Sub 릴레이 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    /// 활성화 여부 (`redis.url` 필요)
    pub enabled: bool,
    /// 연결 끊김 후 재연결 대기 (초)
    pub reconnect_delay_secs: u64,
    /// 구독할 채널
    pub routes: Vec<RelayRoute>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            reconnect_delay_secs: 5,
            routes: vec![
                RelayRoute {
                    channel: "jobs:signal_scan".to_string(),
                    kind: RelayKind::Signal,
                },
                RelayRoute {
                    channel: "jobs:market_gate".to_string(),
                    kind: RelayKind::MarketGate,
                },
            ],
        }
    }
}

impl RelayConfig {
    /// 재연결 대기 시간.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

/// 로깅 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 로그 레벨
    pub level: String,
    /// 로그 형식 (pretty, json, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl FeedConfig {
    /// 파일과 환경 변수에서 설정을 로드합니다.
    ///
    /// 파일이 없으면 기본값에 환경 변수만 적용합니다.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, FeedError> {
        let builder = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(
                config::Environment::with_prefix("LIVEFEED")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize().map_err(FeedError::from)
    }

    /// 기본 경로에서 설정을 로드합니다.
    pub fn load_default() -> Result<Self, FeedError> {
        Self::load(DEFAULT_CONFIG_PATH)
    }

    /// `host:port` 바인딩 주소.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FeedConfig::default();

        assert_eq!(config.server.port, 3000);
        assert_eq!(config.liveness.pong_timeout(), Duration::from_secs(30));
        assert_eq!(config.publishers.index.keys, vec!["KOSPI", "KOSDAQ"]);
        assert!(!config.relay.enabled);
        assert_eq!(config.bind_address(), "127.0.0.1:3000");
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = FeedConfig::load("does/not/exist.toml").unwrap();
        assert_eq!(config.registry.session_queue_capacity, 256);
        assert_eq!(config.relay.routes.len(), 2);
    }

    #[test]
    fn test_partial_toml() {
        let toml = r#"
            [liveness]
            pong_timeout_secs = 45

            [publishers.price]
            interval_secs = 2
            keys = ["005930", "000660"]

            [[relay.routes]]
            channel = "jobs:prices"
            kind = "price"
        "#;

        let config: FeedConfig = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.liveness.pong_timeout_secs, 45);
        assert_eq!(config.liveness.ping_interval_secs, 15);
        assert_eq!(config.publishers.price.interval(), Duration::from_secs(2));
        assert_eq!(config.publishers.price.keys.len(), 2);
        assert!(config.publishers.price.enabled);
        assert_eq!(config.relay.routes[0].kind, RelayKind::Price);
    }
}
