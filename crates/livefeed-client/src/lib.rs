//! # Livefeed Client
//!
//! 실시간 시세 푸시 채널 클라이언트입니다:
//! - 재연결/백오프를 처리하는 공유 연결 ([`FeedClient`])
//! - URL별 클라이언트 팩토리
//! - 푸시 채널이 없을 때의 REST 폴백 ([`FallbackApi`])
//! - 토픽 훅 ([`hooks::TopicHook`])

pub mod api;
pub mod backoff;
pub mod client;
pub mod config;
pub mod error;
pub mod factory;
pub mod hooks;
mod listeners;
pub mod state;

pub use api::FallbackApi;
pub use backoff::ReconnectPolicy;
pub use client::FeedClient;
pub use config::{ClientConfig, HookConfig};
pub use error::{ClientError, ClientResult, GatewayDetector};
pub use factory::{global, ClientFactory};
pub use hooks::{
    FeedAdapter, HookSnapshot, IndexFeed, MarketGateFeed, PriceFeed, SignalFeed, TopicHook,
};
pub use listeners::ListenerGuard;
pub use state::{ConnectionState, ConnectionStatus};
