use axum::{
    extract::{Query, State, rejection::QueryRejection},
    response::Json,
};
use common::errors::AppError;
use serde::Deserialize;
use serde_json::value::RawValue;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::api_client::VisualCrossingClient;
use crate::cache::CacheStore;

pub const MISSING_CITY_MESSAGE: &str = "Please provide a city, e.g. ?city=London";

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<dyn CacheStore>,
    pub client: Arc<VisualCrossingClient>,
    pub cache_ttl_seconds: u64,
}

#[derive(Debug, Deserialize)]
pub struct WeatherQuery {
    pub city: Option<String>,
}

/// `GET /weather?city=<name>`
pub async fn get_weather(
    State(state): State<AppState>,
    query: Result<Query<WeatherQuery>, QueryRejection>,
) -> Result<Json<Box<RawValue>>, AppError> {
    let city = match query {
        Ok(Query(WeatherQuery { city: Some(city) })) if !city.is_empty() => city,
        Ok(_) => return Err(AppError::validation(MISSING_CITY_MESSAGE)),
        Err(rejection) => {
            debug!(error = %rejection, "Unusable query string");
            return Err(AppError::validation(MISSING_CITY_MESSAGE));
        }
    };

    let weather = load_weather(&state, &city).await?;
    Ok(Json(weather))
}

/// Serve from cache when possible, otherwise fetch upstream and populate the cache.
/// The city is used verbatim as the cache key and payloads are never re-serialized.
#[instrument(skip(state), fields(city = %city))]
async fn load_weather(state: &AppState, city: &str) -> Result<Box<RawValue>, AppError> {
    let cached = state.cache.get(city).await?.filter(|c| !c.is_empty());
    if let Some(cached) = cached {
        info!(city = %city, "Returning cached data");
        return Ok(RawValue::from_string(cached)?);
    }

    let weather = state.client.fetch_timeline(city).await?;

    state
        .cache
        .set_ex(city, weather.get(), state.cache_ttl_seconds)
        .await?;
    debug!(city = %city, ttl = state.cache_ttl_seconds, "Cached upstream response");

    Ok(weather)
}
