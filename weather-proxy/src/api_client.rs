use common::errors::AppError;
use common::http_client::HttpClient;
use reqwest::Url;
use serde_json::value::RawValue;
use tracing::{info, instrument};

/// Unit system requested from the provider.
const UNIT_GROUP: &str = "metric";

/// Client for the Visual Crossing timeline API
pub struct VisualCrossingClient {
    http_client: HttpClient,
    base_url: String,
    api_key: Option<String>,
}

impl VisualCrossingClient {
    pub fn new(http_client: HttpClient, base_url: String, api_key: Option<String>) -> Self {
        Self {
            http_client,
            base_url,
            api_key,
        }
    }

    /// Fetch the timeline forecast for `city`. The body is passed through untouched.
    #[instrument(skip(self), fields(city = %city))]
    pub async fn fetch_timeline(&self, city: &str) -> Result<Box<RawValue>, AppError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AppError::config("WEATHER_API_KEY is not set"))?;

        let url = self.timeline_url(city, api_key)?;

        info!(city = %city, "Fetching fresh data from API");
        self.http_client.get_json_raw(url).await
    }

    fn timeline_url(&self, city: &str, api_key: &str) -> Result<Url, AppError> {
        let raw = format!("{}/{}", self.base_url, urlencoding::encode(city));

        Url::parse_with_params(&raw, &[("key", api_key), ("unitGroup", UNIT_GROUP)])
            .map_err(|e| AppError::config(format!("Invalid weather API URL: {}", e)))
    }
}
