//! 엔드포인트별 클라이언트 팩토리.
//!
//! 같은 URL에 대해서는 하나의 [`FeedClient`]만 만들어 공유합니다.
//! 프로세스 전역 인스턴스는 [`global`]로 얻고, 테스트에서는 독립된 팩토리를 직접 만듭니다.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::info;

use crate::client::FeedClient;
use crate::config::ClientConfig;

static GLOBAL_FACTORY: Lazy<ClientFactory> = Lazy::new(ClientFactory::new);

/// 전역 팩토리.
pub fn global() -> &'static ClientFactory {
    &GLOBAL_FACTORY
}

/// 클라이언트 팩토리.
#[derive(Default)]
pub struct ClientFactory {
    clients: Mutex<HashMap<String, FeedClient>>,
}

impl ClientFactory {
    /// 빈 팩토리 생성.
    pub fn new() -> Self {
        Self::default()
    }

    /// URL에 해당하는 클라이언트를 반환합니다.
    ///
    /// 없으면 `config`로 만들고 연결을 시작합니다. 이미 있으면 `config`는 무시됩니다.
    pub fn get_or_connect(&self, config: ClientConfig) -> FeedClient {
        let mut clients = self.clients.lock();
        if let Some(client) = clients.get(&config.url) {
            return client.clone();
        }

        info!(url = %config.url, "Creating shared feed client");
        let url = config.url.clone();
        let client = FeedClient::new(config);
        client.connect();
        clients.insert(url, client.clone());
        client
    }

    /// 이미 만들어진 클라이언트 조회.
    pub fn get(&self, url: &str) -> Option<FeedClient> {
        self.clients.lock().get(url).cloned()
    }

    /// 클라이언트를 팩토리에서 빼고 연결을 닫습니다.
    pub fn remove(&self, url: &str) -> Option<FeedClient> {
        let client = self.clients.lock().remove(url)?;
        client.disconnect();
        Some(client)
    }

    /// 관리 중인 클라이언트 수.
    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    /// 비어 있는지.
    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_one_client_per_url() {
        let factory = ClientFactory::new();

        let a = factory.get_or_connect(ClientConfig::new("ws://127.0.0.1:9/ws"));
        let b = factory.get_or_connect(ClientConfig::new("ws://127.0.0.1:9/ws"));
        let c = factory.get_or_connect(ClientConfig::new("ws://127.0.0.1:10/ws"));

        a.subscribe(livefeed_core::Topic::market_gate());
        assert_eq!(b.ref_count(&livefeed_core::Topic::market_gate()), 1);
        assert_ne!(a.url(), c.url());
        assert_eq!(factory.len(), 2);
    }

    #[tokio::test]
    async fn test_remove() {
        let factory = ClientFactory::new();
        factory.get_or_connect(ClientConfig::new("ws://127.0.0.1:9/ws"));

        assert!(factory.remove("ws://127.0.0.1:9/ws").is_some());
        assert!(factory.get("ws://127.0.0.1:9/ws").is_none());
        assert!(factory.is_empty());
    }
}
