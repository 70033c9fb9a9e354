pub mod api_client;
pub mod cache;
pub mod config;
pub mod handlers;
pub mod rate_limit;

use axum::{Router, middleware, routing::get};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub use handlers::AppState;
pub use rate_limit::RateLimiter;

/// Build the application. The rate limiter runs in front of every path,
/// including unmatched ones.
pub fn router(state: AppState, limiter: Arc<RateLimiter>) -> Router {
    Router::new()
        .route("/weather", get(handlers::get_weather))
        .layer(middleware::from_fn_with_state(limiter, rate_limit::rate_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
