//! 서버와 클라이언트를 실제 소켓으로 연결한 통합 테스트.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use rust_decimal_macros::dec;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;

use livefeed_api::publishers::{KeySelector, MarketSimulator, SharedSource, UpdatePublisher};
use livefeed_api::websocket::LivenessMonitor;
use livefeed_api::{create_registry, create_router, AppState, FeedSources, SharedRegistry};
use livefeed_client::{
    ClientConfig, FallbackApi, FeedClient, HookConfig, PriceFeed, ReconnectPolicy, TopicHook,
};
use livefeed_core::{
    Envelope, GateStatus, MarketGateUpdate, PriceData, PriceUpdate, Topic, TopicKind,
};

struct TestServer {
    registry: SharedRegistry,
    http_url: String,
    ws_url: String,
}

async fn start_server() -> TestServer {
    let registry = create_registry(64);
    let simulator = Arc::new(MarketSimulator::new());
    let sources = FeedSources {
        prices: Some(simulator.clone() as SharedSource<PriceUpdate>),
        market_gate: Some(simulator as SharedSource<MarketGateUpdate>),
        ..FeedSources::default()
    };
    let state = AppState::new(registry.clone()).with_sources(&sources);
    let app = create_router(Arc::new(state), None);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        registry,
        http_url: format!("http://{}", addr),
        ws_url: format!("ws://{}/ws", addr),
    }
}

fn client(server: &TestServer) -> FeedClient {
    FeedClient::new(
        ClientConfig::new(&server.ws_url)
            .with_reconnect(ReconnectPolicy::fixed(Duration::from_millis(20), 10))
            .with_stable_after(Duration::from_millis(50)),
    )
}

async fn until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test]
async fn test_queued_subscription_reaches_registry_once() {
    let server = start_server().await;
    let client = client(&server);
    let topic = Topic::price("005930");

    client.subscribe(topic.clone());
    client.connect();

    let registry = server.registry.clone();
    let watched = topic.clone();
    until(|| {
        let registry = registry.clone();
        let topic = watched.clone();
        async move { registry.subscriber_count(&topic).await == 1 }
    })
    .await;

    assert_eq!(server.registry.client_count().await, 1);
    let keys = server.registry.subscribed_keys(TopicKind::Price).await;
    assert_eq!(keys.into_iter().collect::<Vec<_>>(), vec!["005930"]);
}

#[tokio::test]
async fn test_publisher_update_reaches_hook() {
    let server = start_server().await;
    let client = client(&server);
    client.connect();

    let api = FallbackApi::new(&server.http_url).unwrap();
    let samsung = TopicHook::activate(
        &client,
        PriceFeed::new(["005930"]),
        Some(api.clone()),
        HookConfig::default(),
    );
    let hynix_client = self::client(&server);
    hynix_client.connect();
    let hynix = TopicHook::activate(
        &hynix_client,
        PriceFeed::new(["000660"]),
        Some(api),
        HookConfig::default(),
    );

    let registry = server.registry.clone();
    until(|| {
        let registry = registry.clone();
        async move {
            registry.subscriber_count(&Topic::price("005930")).await == 1
                && registry.subscriber_count(&Topic::price("000660")).await == 1
        }
    })
    .await;

    let update = PriceUpdate {
        ticker: "005930".to_string(),
        data: PriceData {
            price: dec!(82400),
            change: dec!(400),
            change_rate: dec!(0.49),
            volume: 1_000,
        },
        timestamp: 1,
    };
    let publisher = UpdatePublisher::new(
        "price",
        server.registry.clone(),
        Arc::new(FixedPrices(vec![update])) as SharedSource<PriceUpdate>,
        KeySelector::Subscribed {
            kind: TopicKind::Price,
            extra: vec![],
        },
        Duration::from_secs(5),
    );
    publisher.publish_once().await;

    tokio::time::timeout(Duration::from_secs(5), async {
        while !samsung.snapshot().push_delivered {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(samsung.snapshot().data["005930"].price, dec!(82400));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(hynix.snapshot().data.is_empty());
}

/// 항상 같은 시세를 돌려주는 소스.
struct FixedPrices(Vec<PriceUpdate>);

#[async_trait::async_trait]
impl livefeed_api::publishers::DataSource<PriceUpdate> for FixedPrices {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn fetch(&self, keys: &[String]) -> livefeed_core::FeedResult<Vec<PriceUpdate>> {
        Ok(self
            .0
            .iter()
            .filter(|u| keys.contains(&u.ticker))
            .cloned()
            .collect())
    }
}

#[tokio::test]
async fn test_client_receives_topic_updates_in_order() {
    let server = start_server().await;
    let client = client(&server);
    let received = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = received.clone();
    let _guard = client.on_message(move |envelope| {
        if let Envelope::PriceUpdate(update) = envelope {
            sink.lock().push(update.data.price);
        }
    });
    client.subscribe(Topic::price("005930"));
    client.connect();

    let registry = server.registry.clone();
    until(|| {
        let registry = registry.clone();
        async move { registry.subscriber_count(&Topic::price("005930")).await == 1 }
    })
    .await;

    for i in 1..=50i32 {
        let update = Envelope::PriceUpdate(PriceUpdate {
            ticker: "005930".to_string(),
            data: PriceData {
                price: i.into(),
                change: dec!(0),
                change_rate: dec!(0),
                volume: 0,
            },
            timestamp: i64::from(i),
        });
        server
            .registry
            .broadcast(&Topic::price("005930"), &update)
            .await;
    }

    let watched = received.clone();
    until(|| {
        let done = watched.lock().len() == 50;
        async move { done }
    })
    .await;

    let expected: Vec<rust_decimal::Decimal> = (1..=50).map(Into::into).collect();
    assert_eq!(*received.lock(), expected);
}

#[tokio::test]
async fn test_silent_session_is_evicted_and_closed() {
    let server = start_server().await;

    // 핑에 응답하지 않는 원시 소켓
    let (mut socket, _) = tokio_tungstenite::connect_async(&server.ws_url)
        .await
        .unwrap();
    match socket.next().await.unwrap().unwrap() {
        Message::Text(text) => assert!(matches!(
            Envelope::from_json(&text).unwrap(),
            Envelope::Connected { .. }
        )),
        other => panic!("unexpected {:?}", other),
    }

    let monitor = LivenessMonitor::new(
        server.registry.clone(),
        Duration::from_millis(50),
        Duration::from_millis(100),
    );
    tokio::time::sleep(Duration::from_millis(150)).await;
    let tick = monitor.tick().await;

    assert_eq!(tick.evicted.len(), 1);
    assert_eq!(server.registry.client_count().await, 0);

    let close = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(Ok(frame)) = socket.next().await {
            if let Message::Close(frame) = frame {
                return frame;
            }
        }
        None
    })
    .await
    .unwrap();
    assert_eq!(close.map(|f| f.code), Some(CloseCode::Away));
}

#[tokio::test]
async fn test_client_answers_heartbeat() {
    let server = start_server().await;
    let client = client(&server);
    client.connect();

    let registry = server.registry.clone();
    until(|| {
        let registry = registry.clone();
        async move { registry.client_count().await == 1 }
    })
    .await;

    let monitor = LivenessMonitor::new(
        server.registry.clone(),
        Duration::from_millis(50),
        Duration::from_millis(200),
    );
    for _ in 0..8 {
        let tick = monitor.tick().await;
        assert!(tick.evicted.is_empty());
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    assert_eq!(server.registry.client_count().await, 1);
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_subscriptions_restored_after_server_close() {
    let server = start_server().await;
    let client = client(&server);
    client.subscribe(Topic::market_gate());
    client.subscribe(Topic::signal("vcp"));
    client.connect();

    let registry = server.registry.clone();
    until(|| {
        let registry = registry.clone();
        async move { registry.subscriber_count(&Topic::signal("vcp")).await == 1 }
    })
    .await;
    let first_id = client.status().client_id;

    // 서버가 모든 세션을 닫으면 클라이언트가 재연결하고 구독을 복원
    tokio::time::sleep(Duration::from_millis(100)).await;
    server.registry.close_all().await;

    let watched = client.clone();
    until(|| {
        let registry = registry.clone();
        let client = watched.clone();
        let first_id = first_id.clone();
        async move {
            client.is_connected()
                && client.status().client_id.is_some()
                && client.status().client_id != first_id
                && registry.subscriber_count(&Topic::market_gate()).await == 1
                && registry.subscriber_count(&Topic::signal("vcp")).await == 1
        }
    })
    .await;
}

#[tokio::test]
async fn test_fallback_reads() {
    let server = start_server().await;
    let api = FallbackApi::new(&server.http_url).unwrap();

    let prices = api
        .prices(&["005930".to_string(), "000660".to_string()])
        .await
        .unwrap();
    assert_eq!(prices.prices.len(), 2);
    assert!(prices.prices["005930"].price > dec!(0));

    let gate = api.market_gate().await.unwrap();
    assert!((0..=100).contains(&gate.data.level));
    assert_eq!(gate.data.status, GateStatus::from_level(gate.data.level));
}
