//! 퍼블리셔 데이터 소스.
//!
//! 라이브 소스(1차)와 저장된 소스(2차)를 같은 trait로 다루고,
//! [`FallbackSource`]가 1차 실패/타임아웃 시 2차로 넘어갑니다.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use livefeed_core::{FeedError, FeedResult};

/// 엔티티 목록을 조회하는 데이터 소스.
#[async_trait]
pub trait DataSource<T>: Send + Sync {
    /// 소스 이름 (로그용).
    fn name(&self) -> &str;

    /// 주어진 키의 최신 값을 조회합니다.
    ///
    /// 키가 비어 있으면 소스가 아는 기본 엔티티를 반환합니다 (예: 마켓 게이트).
    /// 모르는 키는 결과에서 빠질 수 있습니다.
    async fn fetch(&self, keys: &[String]) -> FeedResult<Vec<T>>;
}

/// 공유 가능한 데이터 소스.
pub type SharedSource<T> = Arc<dyn DataSource<T>>;

/// 1차 소스 실패 시 2차 소스로 넘어가는 소스.
pub struct FallbackSource<T> {
    primary: SharedSource<T>,
    secondary: Option<SharedSource<T>>,
    timeout: Duration,
    name: String,
}

impl<T> FallbackSource<T> {
    /// 새 폴백 소스 생성.
    ///
    /// # Arguments
    ///
    /// * `primary` - 라이브 소스
    /// * `secondary` - 1차 실패 시 사용할 저장 소스
    /// * `timeout` - 1차 소스 조회 타임아웃
    pub fn new(
        primary: SharedSource<T>,
        secondary: Option<SharedSource<T>>,
        timeout: Duration,
    ) -> Self {
        let name = match &secondary {
            Some(s) => format!("{}|{}", primary.name(), s.name()),
            None => primary.name().to_string(),
        };
        Self {
            primary,
            secondary,
            timeout,
            name,
        }
    }
}

#[async_trait]
impl<T: Send + 'static> DataSource<T> for FallbackSource<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, keys: &[String]) -> FeedResult<Vec<T>> {
        let primary_err = match tokio::time::timeout(self.timeout, self.primary.fetch(keys)).await
        {
            Ok(Ok(items)) => return Ok(items),
            Ok(Err(e)) => e,
            Err(_) => FeedError::Timeout(format!(
                "{} did not respond within {:?}",
                self.primary.name(),
                self.timeout
            )),
        };

        let Some(secondary) = &self.secondary else {
            return Err(primary_err);
        };

        warn!(
            primary = self.primary.name(),
            secondary = secondary.name(),
            error = %primary_err,
            "Primary source failed, using fallback"
        );

        let fallback_err = match tokio::time::timeout(self.timeout, secondary.fetch(keys)).await {
            Ok(Ok(items)) => return Ok(items),
            Ok(Err(e)) => e,
            Err(_) => FeedError::Timeout(format!(
                "{} did not respond within {:?}",
                secondary.name(),
                self.timeout
            )),
        };

        Err(FeedError::Source(format!(
            "primary: {}; fallback: {}",
            primary_err, fallback_err
        )))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::StaticSource;
    use super::*;

    fn keys() -> Vec<String> {
        vec!["005930".to_string()]
    }

    #[tokio::test]
    async fn test_primary_success_skips_secondary() {
        let primary = Arc::new(StaticSource::ok("live", vec![1]));
        let secondary = Arc::new(StaticSource::ok("stored", vec![2]));
        let source = FallbackSource::new(
            primary.clone() as SharedSource<i32>,
            Some(secondary.clone() as SharedSource<i32>),
            Duration::from_secs(1),
        );

        assert_eq!(source.fetch(&keys()).await.unwrap(), vec![1]);
        assert!(secondary.calls().is_empty());
        assert_eq!(source.name(), "live|stored");
    }

    #[tokio::test]
    async fn test_primary_failure_uses_secondary() {
        let primary = Arc::new(StaticSource::<i32>::failing("live"));
        let secondary = Arc::new(StaticSource::ok("stored", vec![2]));
        let source = FallbackSource::new(
            primary as SharedSource<i32>,
            Some(secondary.clone() as SharedSource<i32>),
            Duration::from_secs(1),
        );

        assert_eq!(source.fetch(&keys()).await.unwrap(), vec![2]);
        assert_eq!(secondary.calls(), vec![keys()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_timeout_uses_secondary() {
        let primary = Arc::new(StaticSource::ok("live", vec![1]).slow(Duration::from_secs(10)));
        let secondary = Arc::new(StaticSource::ok("stored", vec![2]));
        let source = FallbackSource::new(
            primary as SharedSource<i32>,
            Some(secondary as SharedSource<i32>),
            Duration::from_secs(3),
        );

        assert_eq!(source.fetch(&keys()).await.unwrap(), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_secondary_times_out() {
        let source = FallbackSource::new(
            Arc::new(StaticSource::<i32>::failing("live")) as SharedSource<i32>,
            Some(Arc::new(StaticSource::ok("stored", vec![2]).slow(Duration::from_secs(10)))
                as SharedSource<i32>),
            Duration::from_secs(3),
        );

        let started = tokio::time::Instant::now();
        let err = source.fetch(&keys()).await.unwrap_err();

        assert!(matches!(err, FeedError::Source(ref msg) if msg.contains("stored did not respond")));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_both_fail() {
        let source = FallbackSource::new(
            Arc::new(StaticSource::<i32>::failing("live")) as SharedSource<i32>,
            Some(Arc::new(StaticSource::<i32>::failing("stored")) as SharedSource<i32>),
            Duration::from_secs(1),
        );

        let err = source.fetch(&keys()).await.unwrap_err();
        assert!(matches!(err, FeedError::Source(_)));
    }

    #[tokio::test]
    async fn test_no_secondary_returns_primary_error() {
        let source = FallbackSource::new(
            Arc::new(StaticSource::<i32>::failing("live")) as SharedSource<i32>,
            None,
            Duration::from_secs(1),
        );

        assert!(source.fetch(&keys()).await.is_err());
    }
}
