use common::tracing::LogFormat;
use std::env;
use std::time::Duration;

pub const DEFAULT_WEATHER_API_URL: &str =
    "https://weather.visualcrossing.com/VisualCrossingWebServices/rest/services/timeline";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub weather_api_key: Option<String>,
    pub weather_api_url: String,
    pub redis_host: String,
    pub redis_port: u16,
    pub redis_username: Option<String>,
    pub redis_password: Option<String>,
    pub cache_ttl_seconds: u64,
    pub rate_limit_window_secs: u64,
    pub rate_limit_max_requests: u32,
    pub upstream_timeout_secs: Option<u64>,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source. Empty values count as unset.
    pub fn from_vars<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            port: var("PORT").and_then(|p| p.parse().ok()).unwrap_or(3000),
            weather_api_key: var("WEATHER_API_KEY"),
            weather_api_url: var("WEATHER_API_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_WEATHER_API_URL.to_string()),
            redis_host: var("REDIS_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            redis_port: var("REDIS_PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(6379),
            redis_username: var("REDIS_USERNAME"),
            redis_password: var("REDIS_PASSWORD"),
            cache_ttl_seconds: var("CACHE_TTL_SECONDS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(43_200), // 12 hours
            rate_limit_window_secs: var("RATE_LIMIT_WINDOW_SECS")
                .and_then(|s| s.parse().ok())
                .filter(|s| *s > 0)
                .unwrap_or(60),
            rate_limit_max_requests: var("RATE_LIMIT_MAX_REQUESTS")
                .and_then(|r| r.parse().ok())
                .unwrap_or(10),
            upstream_timeout_secs: var("UPSTREAM_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .filter(|s| *s > 0),
            log_format: var("LOG_FORMAT")
                .map(|f| LogFormat::parse(&f))
                .unwrap_or_default(),
        }
    }

    /// Connection URL for the cache store, credentials percent-encoded.
    pub fn redis_url(&self) -> String {
        let auth = match (&self.redis_username, &self.redis_password) {
            (Some(user), Some(pass)) => format!(
                "{}:{}@",
                urlencoding::encode(user),
                urlencoding::encode(pass)
            ),
            (Some(user), None) => format!("{}@", urlencoding::encode(user)),
            (None, Some(pass)) => format!(":{}@", urlencoding::encode(pass)),
            (None, None) => String::new(),
        };

        format!("redis://{}{}:{}/", auth, self.redis_host, self.redis_port)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    /// Unset unless configured, leaving reqwest's own behavior in place.
    pub fn upstream_timeout(&self) -> Option<Duration> {
        self.upstream_timeout_secs.map(Duration::from_secs)
    }
}
