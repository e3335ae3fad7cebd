//! 실시간 시세 배포 서버 바이너리.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use livefeed_api::publishers::redis_snapshot;
use livefeed_api::{
    create_registry, create_router, setup_metrics_recorder, start_liveness, start_publishers,
    start_relay, AppState, FeedSources,
};
use livefeed_core::{init_logging, FeedConfig, LogConfig};

/// CORS 레이어 생성.
///
/// `CORS_ORIGINS`(쉼표 구분)가 설정되어 있으면 해당 origin만 허용하고,
/// 없으면 개발 모드로 간주하여 모든 origin을 허용합니다.
fn cors_layer() -> CorsLayer {
    let allow_origin = match std::env::var("CORS_ORIGINS") {
        Ok(origins) if !origins.is_empty() => {
            let origins: Vec<_> = origins
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();

            if origins.is_empty() {
                warn!("CORS_ORIGINS is set but contains no valid origins, allowing any");
                AllowOrigin::any()
            } else {
                info!("CORS configured with {} allowed origins", origins.len());
                AllowOrigin::list(origins)
            }
        }
        _ => {
            warn!("CORS_ORIGINS not set, allowing any origin (development mode)");
            AllowOrigin::any()
        }
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers([axum::http::header::CONTENT_TYPE, axum::http::header::ACCEPT])
        .max_age(Duration::from_secs(3600))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = FeedConfig::load_default()?;
    init_logging(LogConfig::from_settings(&config.logging)).map_err(anyhow::Error::msg)?;

    info!("Starting livefeed server...");

    // 레코더 설치 실패 시 /metrics 없이 계속 진행
    let metrics_handle = match setup_metrics_recorder() {
        Ok(handle) => {
            info!("Prometheus metrics recorder initialized");
            Some(handle)
        }
        Err(e) => {
            warn!(error = %e, "Failed to install metrics recorder");
            None
        }
    };

    let addr: SocketAddr = config.bind_address().parse().map_err(|e| {
        error!(
            host = %config.server.host,
            port = config.server.port,
            error = %e,
            "소켓 주소 설정이 유효하지 않습니다. LIVEFEED__SERVER__HOST, LIVEFEED__SERVER__PORT를 확인하세요."
        );
        e
    })?;

    let registry = create_registry(config.registry.session_queue_capacity);

    // Redis 스냅샷 폴백 (선택)
    let redis = match &config.redis.url {
        Some(url) => match redis_snapshot::connect(url).await {
            Ok(conn) => Some(conn),
            Err(e) => {
                warn!(error = %e, "Redis unavailable, snapshot fallback disabled");
                None
            }
        },
        None => None,
    };

    let sources = FeedSources::from_config(&config, redis)?;
    let state = Arc::new(AppState::new(registry.clone()).with_sources(&sources));

    // 백그라운드 태스크
    let shutdown_token = CancellationToken::new();

    let mut tasks = vec![start_liveness(
        registry.clone(),
        &config.liveness,
        shutdown_token.clone(),
    )];
    tasks.extend(start_publishers(
        &config,
        &registry,
        &sources,
        &shutdown_token,
    ));

    match (&config.redis.url, config.relay.enabled) {
        (Some(url), true) => tasks.push(start_relay(
            registry.clone(),
            &config.relay,
            url.clone(),
            shutdown_token.clone(),
        )),
        (None, true) => warn!("Relay enabled but redis.url is not set, relay not started"),
        _ => info!("Pub/Sub relay disabled"),
    }

    let app = create_router(state, metrics_handle)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(30),
        ))
        .layer(cors_layer());

    info!(%addr, "Server listening");
    info!("WebSocket available at ws://{}/ws", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_token.clone()))
        .await?;

    info!("Server shutdown initiated, cleaning up...");
    shutdown_token.cancel();

    let closed = registry.close_all().await;
    info!(sessions = closed, "Closed remaining sessions");

    let cleanup = tokio::time::timeout(Duration::from_secs(10), async {
        for task in tasks {
            let _ = task.await;
        }
    })
    .await;

    if cleanup.is_err() {
        warn!("Cleanup timeout, forcing shutdown");
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Graceful shutdown 시그널 대기.
///
/// Ctrl+C 또는 SIGTERM 시그널을 수신하면 종료 토큰을 취소합니다.
async fn shutdown_signal(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        }
    }

    // 모든 백그라운드 태스크에 종료 시그널 전파
    shutdown_token.cancel();
    info!("Shutdown signal propagated to background tasks");
}
