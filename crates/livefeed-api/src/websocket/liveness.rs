//! 하트비트(핑/퐁) 기반 세션 생존 확인.
//!
//! 주기마다 먼저 퐁 타임아웃을 넘긴 세션을 제거하고, 남은 세션에 핑을 보냅니다.
//! 핑 전송 실패는 재시도하지 않으며 결국 퐁 누락으로 제거됩니다.

use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use livefeed_core::LivenessConfig;

use super::registry::SharedRegistry;

/// 틱 한 번의 결과.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LivenessTick {
    /// 제거된 세션
    pub evicted: Vec<String>,
    /// 핑을 보낸 세션 수
    pub pinged: usize,
}

/// 세션 생존 모니터.
pub struct LivenessMonitor {
    registry: SharedRegistry,
    ping_interval: Duration,
    pong_timeout: Duration,
}

impl LivenessMonitor {
    /// 새 모니터 생성.
    pub fn new(registry: SharedRegistry, ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            registry,
            ping_interval,
            pong_timeout,
        }
    }

    /// 설정에서 생성.
    pub fn from_config(registry: SharedRegistry, config: &LivenessConfig) -> Self {
        Self::new(registry, config.ping_interval(), config.pong_timeout())
    }

    /// 한 주기 실행: 만료 세션 제거 후 핑.
    pub async fn tick(&self) -> LivenessTick {
        let evicted = self.registry.evict_stale(self.pong_timeout).await;
        let pinged = self.registry.ping_all().await;

        if !evicted.is_empty() {
            info!(count = evicted.len(), "Evicted unresponsive sessions");
        }
        debug!(pinged, "Heartbeat sent");

        LivenessTick { evicted, pinged }
    }

    /// 종료 토큰이 취소될 때까지 주기적으로 실행합니다.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            ping_interval = ?self.ping_interval,
            pong_timeout = ?self.pong_timeout,
            "Liveness monitor started"
        );

        let mut ticker = interval(self.ping_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // 첫 틱은 즉시 발생하므로 건너뜀
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }

        info!("Liveness monitor stopped");
    }
}

/// 모니터를 백그라운드로 시작.
pub fn start_liveness(
    registry: SharedRegistry,
    config: &LivenessConfig,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let monitor = LivenessMonitor::from_config(registry, config);
    tokio::spawn(monitor.run(shutdown))
}
