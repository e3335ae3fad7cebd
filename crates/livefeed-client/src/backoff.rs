//! 재연결 백오프 정책.
//!
//! `delay = min(base * multiplier^(attempt-1), max) * (1 ± jitter)`

use std::time::Duration;

use rand::Rng;

/// 재연결 정책.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// 첫 재시도 대기 시간
    pub base_delay: Duration,
    /// 최대 대기 시간
    pub max_delay: Duration,
    /// 시도마다 곱해지는 배수
    pub multiplier: f64,
    /// 지터 비율 (0.2 = ±20%)
    pub jitter: f64,
    /// 최대 재시도 횟수
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.2,
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// 지터 없이 계산한 `attempt`번째 재시도 대기 시간 (1부터 시작).
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        if exponent == 0 {
            return self.base_delay.min(self.max_delay);
        }
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        self.base_delay.mul_f64(self.multiplier.powi(exponent))
    }

    /// 지터를 적용한 `attempt`번째 재시도 대기 시간.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for(attempt);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let factor = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        base.mul_f64((1.0 + factor).max(0.0))
    }

    /// `attempt`번째 재시도가 허용되는지 확인합니다.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }

    /// 지터 없는 고정 정책 (테스트/개발용).
    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            jitter: 0.0,
            max_attempts,
        }
    }
}
