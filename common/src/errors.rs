use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Body returned for any failure that is not the caller's fault.
pub const GENERIC_FAILURE_MESSAGE: &str = "Failed to fetch weather data. Please try again later.";

/// Body returned when a client exceeds its request budget.
pub const RATE_LIMITED_MESSAGE: &str = "Too many requests, please try again later.";

/// Structured error types for the proxy
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Timeout error: {0}")]
    TimeoutError(String),

    #[error("HTTP error: {status} - {message}")]
    HttpError { status: u16, message: String },

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError(message.into())
    }

    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self::RateLimited { retry_after_secs }
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::CacheError(message.into())
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::TimeoutError(message.into())
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::HttpError {
            status,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        Self::CacheError(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Only client-caused errors echo their message; everything else is
        // logged here and collapsed into the generic body.
        let message = match self {
            AppError::ValidationError(message) => message,
            AppError::RateLimited { .. } => RATE_LIMITED_MESSAGE.to_string(),
            other => {
                error!(error = %other, "Request failed");
                GENERIC_FAILURE_MESSAGE.to_string()
            }
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}
