//! 실시간 시세 서비스 HTTP 소스.
//!
//! `GET {base_url}/{path}?keys=005930,000660` 요청에 엔티티 JSON 배열로 응답하는
//! 업스트림을 1차 소스로 사용합니다.

use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;

use livefeed_core::{FeedError, FeedResult};

use super::source::DataSource;

/// HTTP 업스트림 소스.
pub struct HttpSource<T> {
    client: reqwest::Client,
    url: String,
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> HttpSource<T> {
    /// 새 HTTP 소스 생성.
    ///
    /// # Arguments
    ///
    /// * `base_url` - 업스트림 기본 URL
    /// * `path` - 피드 경로 (예: `prices`, `indices`, `market-gate`)
    /// * `timeout` - 요청 타임아웃
    pub fn new(base_url: &str, path: &str, timeout: Duration) -> FeedResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FeedError::Config(format!("HTTP 클라이언트 생성 실패: {}", e)))?;

        Ok(Self {
            client,
            url: format!(
                "{}/{}",
                base_url.trim_end_matches('/'),
                path.trim_start_matches('/')
            ),
            name: format!("http:{}", path.trim_start_matches('/')),
            _marker: PhantomData,
        })
    }
}

#[async_trait]
impl<T: DeserializeOwned + Send + 'static> DataSource<T> for HttpSource<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, keys: &[String]) -> FeedResult<Vec<T>> {
        let mut request = self.client.get(&self.url);
        if !keys.is_empty() {
            request = request.query(&[("keys", keys.join(","))]);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                FeedError::Timeout(format!("{}: {}", self.url, e))
            } else {
                FeedError::Source(format!("{}: {}", self.url, e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Source(format!(
                "{} responded with {}",
                self.url, status
            )));
        }

        let items: Vec<T> = response
            .json()
            .await
            .map_err(|e| FeedError::Decode(format!("{}: {}", self.url, e)))?;

        debug!(source = %self.name, count = items.len(), "Fetched from upstream");
        Ok(items)
    }
}
