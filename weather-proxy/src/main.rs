use common::http_client::HttpClient;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use weather_proxy::{
    AppState, RateLimiter, api_client::VisualCrossingClient, cache::RedisCache, config::Config,
    router,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    let config = Config::from_env();
    common::tracing::init(config.log_format);

    if config.weather_api_key.is_none() {
        warn!("WEATHER_API_KEY is not set, upstream requests will fail");
    }

    // Best-effort: a failed connection is logged and requests fail individually.
    let cache = Arc::new(RedisCache::connect(&config.redis_url()).await);

    let client = Arc::new(VisualCrossingClient::new(
        HttpClient::new(config.upstream_timeout())?,
        config.weather_api_url.clone(),
        config.weather_api_key.clone(),
    ));

    // Counters share the cache's Redis connection.
    let limiter = Arc::new(RateLimiter::new(
        cache.clone(),
        config.rate_limit_max_requests,
        config.rate_limit_window(),
    ));

    let state = AppState {
        cache,
        client,
        cache_ttl_seconds: config.cache_ttl_seconds,
    };

    let app = router(state, limiter);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Weather API running on port {}", config.port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Weather API stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
