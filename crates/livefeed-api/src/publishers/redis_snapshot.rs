//! Redis 스냅샷 소스.
//!
//! 배치 작업이 `{prefix}:{feed}:{key}`에 저장해 둔 마지막 JSON 값을 읽는 2차 소스입니다.
//! 키 없이 조회하면 `{prefix}:{feed}:latest`를 읽습니다.

use std::marker::PhantomData;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use livefeed_core::{FeedError, FeedResult};

use super::source::DataSource;

/// 키가 없을 때 읽는 스냅샷 키.
pub const LATEST_KEY: &str = "latest";

/// Redis 연결을 생성합니다.
pub async fn connect(url: &str) -> FeedResult<ConnectionManager> {
    info!("Connecting to Redis...");

    let client = redis::Client::open(url).map_err(|e| FeedError::Config(e.to_string()))?;
    let manager = ConnectionManager::new(client)
        .await
        .map_err(|e| FeedError::Transport(e.to_string()))?;

    info!("Redis connection established");
    Ok(manager)
}

/// Redis 스냅샷 소스.
pub struct RedisSnapshotSource<T> {
    connection: ConnectionManager,
    prefix: String,
    feed: String,
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> RedisSnapshotSource<T> {
    /// 새 스냅샷 소스 생성.
    ///
    /// # Arguments
    ///
    /// * `connection` - Redis 연결
    /// * `prefix` - 키 접두어 (예: `livefeed:snapshot`)
    /// * `feed` - 피드 이름 (예: `price`, `index`, `market_gate`)
    pub fn new(connection: ConnectionManager, prefix: &str, feed: &str) -> Self {
        Self {
            connection,
            prefix: prefix.trim_end_matches(':').to_string(),
            feed: feed.to_string(),
            name: format!("redis:{}", feed),
            _marker: PhantomData,
        }
    }

    fn keys_for(&self, keys: &[String]) -> Vec<String> {
        snapshot_keys(&self.prefix, &self.feed, keys)
    }
}

/// 조회할 Redis 키 목록.
fn snapshot_keys(prefix: &str, feed: &str, keys: &[String]) -> Vec<String> {
    if keys.is_empty() {
        vec![format!("{}:{}:{}", prefix, feed, LATEST_KEY)]
    } else {
        keys.iter()
            .map(|k| format!("{}:{}:{}", prefix, feed, k))
            .collect()
    }
}

/// MGET 결과에서 존재하고 파싱 가능한 값만 남깁니다.
fn decode_values<T: DeserializeOwned>(keys: &[String], values: Vec<Option<String>>) -> Vec<T> {
    keys.iter()
        .zip(values)
        .filter_map(|(key, value)| {
            let json = value?;
            match serde_json::from_str(&json) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!(key = %key, error = %e, "Ignoring undecodable snapshot");
                    None
                }
            }
        })
        .collect()
}

#[async_trait]
impl<T: DeserializeOwned + Send + 'static> DataSource<T> for RedisSnapshotSource<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, keys: &[String]) -> FeedResult<Vec<T>> {
        let redis_keys = self.keys_for(keys);
        let mut conn = self.connection.clone();

        // 키가 하나여도 배열 응답을 받도록 MGET을 직접 사용
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&redis_keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| FeedError::Source(format!("{}: {}", self.name, e)))?;

        let items = decode_values(&redis_keys, values);
        debug!(source = %self.name, count = items.len(), "Loaded snapshots");
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livefeed_core::MarketGateUpdate;

    #[test]
    fn test_snapshot_keys() {
        assert_eq!(
            snapshot_keys("livefeed:snapshot", "price", &["005930".to_string()]),
            vec!["livefeed:snapshot:price:005930"]
        );
        assert_eq!(
            snapshot_keys("livefeed:snapshot", "market_gate", &[]),
            vec!["livefeed:snapshot:market_gate:latest"]
        );
    }

    #[test]
    fn test_decode_values_skips_missing_and_invalid() {
        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let gate = r#"{"data":{"status":"GREEN","level":80,"kospi":2650.1,"kospi_change_pct":0.5,"kosdaq":870.2,"kosdaq_change_pct":0.1},"timestamp":1}"#;

        let items: Vec<MarketGateUpdate> = decode_values(
            &keys,
            vec![Some(gate.to_string()), None, Some("garbage".to_string())],
        );

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].data.level, 80);
    }
}
