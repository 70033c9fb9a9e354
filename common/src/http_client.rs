use crate::errors::AppError;
use reqwest::{Client, Url};
use serde_json::value::RawValue;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Single-attempt HTTP client returning opaque JSON bodies
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Without a timeout the request may wait as long as reqwest lets it.
    pub fn new(timeout: Option<Duration>) -> Result<Self, AppError> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
        })
    }

    /// GET `url` and check that the body is JSON. The bytes are kept exactly as received.
    #[instrument(skip(self, url), fields(host = url.host_str().unwrap_or_default()))]
    pub async fn get_json_raw(&self, url: Url) -> Result<Box<RawValue>, AppError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::timeout("Upstream request timed out")
            } else {
                AppError::NetworkError(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "Upstream returned an error status");
            return Err(AppError::http(
                status.as_u16(),
                format!("HTTP error: {}", status),
            ));
        }

        let text = response.text().await.map_err(AppError::NetworkError)?;
        let json = RawValue::from_string(text).map_err(AppError::ParseError)?;

        info!(status = status.as_u16(), "Upstream request successful");
        Ok(json)
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self {
            client: Client::new(),
        }
    }
}
