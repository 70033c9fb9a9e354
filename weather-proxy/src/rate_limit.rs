//! Per-client fixed-window request limiting.
//!
//! Counting lives in the shared store: the first request from a client creates
//! a counter that expires after the window, later requests increment it.
//! Requests past the maximum are answered with 429 before reaching any handler.

use async_trait::async_trait;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, header::RETRY_AFTER},
    middleware::Next,
    response::{IntoResponse, Response},
};
use common::errors::AppError;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

const X_RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const X_RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const X_RATE_LIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Counter state right after a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowHit {
    pub count: u64,
    pub reset_after_secs: u64,
}

#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Increment the counter under `key`, giving it a `window_secs` expiry if it has none.
    async fn hit(&self, key: &str, window_secs: u64) -> Result<WindowHit, AppError>;
}

/// Outcome of counting one request against a client's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_after_secs: u64,
}

impl Decision {
    fn write_headers(&self, headers: &mut HeaderMap) {
        let reset_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
            + self.reset_after_secs;

        headers.insert(X_RATE_LIMIT_LIMIT, HeaderValue::from(self.limit));
        headers.insert(X_RATE_LIMIT_REMAINING, HeaderValue::from(self.remaining));
        headers.insert(X_RATE_LIMIT_RESET, HeaderValue::from(reset_at));
    }
}

pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    max_requests: u32,
    window_secs: u64,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, max_requests: u32, window: Duration) -> Self {
        Self {
            store,
            max_requests,
            window_secs: window.as_secs().max(1),
        }
    }

    /// Count a request from `client` and decide whether it may proceed.
    pub async fn check(&self, client: IpAddr) -> Result<Decision, AppError> {
        let key = format!("rate_limit:{}", client);
        let hit = self.store.hit(&key, self.window_secs).await?;

        let used = u32::try_from(hit.count).unwrap_or(u32::MAX);
        Ok(Decision {
            allowed: used <= self.max_requests,
            limit: self.max_requests,
            remaining: self.max_requests.saturating_sub(used),
            reset_after_secs: hit.reset_after_secs,
        })
    }
}

/// Peer address of the connection; proxy headers are not trusted.
fn client_ip(req: &Request) -> IpAddr {
    match req.extensions().get::<ConnectInfo<SocketAddr>>() {
        Some(ConnectInfo(addr)) => addr.ip(),
        None => {
            debug!("No connection info on request, using shared bucket");
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        }
    }
}

pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request,
    next: Next,
) -> Response {
    let ip = client_ip(&req);

    let decision = match limiter.check(ip).await {
        Ok(decision) => decision,
        Err(e) => {
            // Store unreachable: let the request through uncounted.
            warn!(client_ip = %ip, error = %e, "Rate limit check failed");
            return next.run(req).await;
        }
    };

    let mut response = if decision.allowed {
        next.run(req).await
    } else {
        warn!(client_ip = %ip, limit = decision.limit, "Rate limit exceeded");
        let mut rejected = AppError::rate_limited(decision.reset_after_secs).into_response();
        rejected
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from(decision.reset_after_secs));
        rejected
    };

    decision.write_headers(response.headers_mut());
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Expiring counters with the same INCR-then-EXPIRE behavior as Redis.
    #[derive(Default)]
    struct MemoryStore {
        counters: Mutex<HashMap<String, (u64, Instant)>>,
    }

    #[async_trait]
    impl RateLimitStore for MemoryStore {
        async fn hit(&self, key: &str, window_secs: u64) -> Result<WindowHit, AppError> {
            let now = Instant::now();
            let mut counters = self.counters.lock().unwrap();
            let entry = counters
                .entry(key.to_string())
                .or_insert((0, now + Duration::from_secs(window_secs)));
            if entry.1 <= now {
                *entry = (0, now + Duration::from_secs(window_secs));
            }
            entry.0 += 1;

            Ok(WindowHit {
                count: entry.0,
                reset_after_secs: (entry.1 - now).as_secs(),
            })
        }
    }

    struct FailingStore;

    #[async_trait]
    impl RateLimitStore for FailingStore {
        async fn hit(&self, _key: &str, _window_secs: u64) -> Result<WindowHit, AppError> {
            Err(AppError::cache("Redis client is not connected"))
        }
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    fn limiter(max_requests: u32) -> RateLimiter {
        RateLimiter::new(
            Arc::new(MemoryStore::default()),
            max_requests,
            Duration::from_secs(60),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn eleventh_request_in_window_is_rejected() {
        let limiter = limiter(10);

        for n in 1..=10 {
            let decision = limiter.check(ip(1)).await.unwrap();
            assert!(decision.allowed, "request {} should pass", n);
            assert_eq!(decision.remaining, 10 - n);
        }

        let decision = limiter.check(ip(1)).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.reset_after_secs, 60);
    }

    #[tokio::test(start_paused = true)]
    async fn clients_are_counted_separately() {
        let limiter = limiter(1);

        assert!(limiter.check(ip(1)).await.unwrap().allowed);
        assert!(!limiter.check(ip(1)).await.unwrap().allowed);
        assert!(limiter.check(ip(2)).await.unwrap().allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn window_resets_once_the_counter_expires() {
        let limiter = limiter(2);

        limiter.check(ip(1)).await.unwrap();
        limiter.check(ip(1)).await.unwrap();
        assert!(!limiter.check(ip(1)).await.unwrap().allowed);

        tokio::time::advance(Duration::from_secs(30)).await;
        let decision = limiter.check(ip(1)).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.reset_after_secs, 30);

        tokio::time::advance(Duration::from_secs(30)).await;
        let decision = limiter.check(ip(1)).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1);
    }

    #[tokio::test]
    async fn counters_are_keyed_by_client_ip() {
        let store = Arc::new(MemoryStore::default());
        let limiter = RateLimiter::new(store.clone(), 10, Duration::from_secs(60));

        limiter.check(ip(7)).await.unwrap();

        let keys: Vec<String> = store.counters.lock().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["rate_limit:10.0.0.7".to_string()]);
    }

    #[tokio::test]
    async fn store_failure_is_reported() {
        let limiter = RateLimiter::new(Arc::new(FailingStore), 10, Duration::from_secs(60));

        let result = limiter.check(ip(1)).await;
        assert!(matches!(result, Err(AppError::CacheError(_))));
    }

    #[test]
    fn headers_use_legacy_names_and_absolute_reset() {
        let decision = Decision {
            allowed: true,
            limit: 10,
            remaining: 4,
            reset_after_secs: 30,
        };
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();

        let mut headers = HeaderMap::new();
        decision.write_headers(&mut headers);

        assert_eq!(headers["x-ratelimit-limit"], "10");
        assert_eq!(headers["x-ratelimit-remaining"], "4");
        let reset: u64 = headers["x-ratelimit-reset"].to_str().unwrap().parse().unwrap();
        assert!(reset >= now + 30 && reset <= now + 31);
    }
}
