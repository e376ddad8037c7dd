//! WeatherAPI.com forecast provider.
//!
//! Requests a daily forecast by city name and normalizes it into
//! `ForecastDay`s. Every day must carry min/max temperature, rainfall,
//! humidity and rain chance, otherwise the whole forecast is rejected.
//!
//! API: `https://api.weatherapi.com/v1/forecast.json`
//! Auth: `key` query parameter.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};
use tracing::{debug, info, warn};

use super::ForecastSource;
use crate::config::{RetryConfig, WeatherConfig};
use crate::types::{ForecastBundle, ForecastDay, Location, ReportError};

/// Condition label used when the provider omits one.
const UNKNOWN_CONDITION: &str = "Unknown";

// ---------------------------------------------------------------------------
// WeatherAPI response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    #[serde(default)]
    location: Option<ApiLocation>,
    #[serde(default)]
    forecast: Option<ApiForecast>,
}

#[derive(Debug, Deserialize)]
struct ApiLocation {
    #[serde(default)]
    name: String,
    #[serde(default)]
    region: String,
    #[serde(default)]
    country: String,
}

#[derive(Debug, Deserialize)]
struct ApiForecast {
    #[serde(default)]
    forecastday: Vec<ApiForecastDay>,
}

#[derive(Debug, Deserialize)]
struct ApiForecastDay {
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    day: Option<ApiDay>,
}

#[derive(Debug, Deserialize)]
struct ApiDay {
    #[serde(default, deserialize_with = "lenient_number")]
    maxtemp_c: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    mintemp_c: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    avgtemp_c: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    totalprecip_mm: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    avghumidity: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    daily_chance_of_rain: Option<f64>,
    #[serde(default)]
    condition: Option<ApiCondition>,
}

#[derive(Debug, Deserialize)]
struct ApiCondition {
    #[serde(default)]
    text: String,
}

/// Accept a JSON number or a numeric string; anything else is treated as absent.
fn lenient_number<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct WeatherApiClient {
    http: Client,
    base_url: String,
    api_key: SecretString,
    days: u32,
    retry: RetryConfig,
}

impl WeatherApiClient {
    pub fn new(config: &WeatherConfig, api_key: SecretString, retry: RetryConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .user_agent("FLOODWATCH/0.1.0")
            .build()
            .context("Failed to build weather HTTP client")?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            days: config.forecast_days,
            retry,
        })
    }

    fn forecast_url(&self, city: &str) -> String {
        format!(
            "{}/forecast.json?key={}&q={}&days={}&aqi=no&alerts=no",
            self.base_url,
            self.api_key.expose_secret(),
            urlencoding::encode(city),
            self.days,
        )
    }

    /// GET the raw forecast, retrying rate limits and server errors per policy.
    async fn fetch_raw(&self, city: &str) -> Result<ForecastResponse> {
        let url = self.forecast_url(city);
        let mut last_error = None;

        for attempt in 1..=self.retry.max_attempts {
            if attempt > 1 {
                let delay = self.retry.delay_before(attempt - 1);
                debug!(city, attempt, delay_ms = delay.as_millis() as u64, "Retrying forecast request");
                tokio::time::sleep(delay).await;
            }

            match self.http.get(&url).send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response
                            .json::<ForecastResponse>()
                            .await
                            .map_err(|e| e.without_url())
                            .context("Failed to parse weather response");
                    }

                    let error_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(city, status = %status, attempt, "Retryable weather API error");
                        last_error = Some(format!("HTTP {status}: {error_text}"));
                        continue;
                    }

                    bail!("Weather API error {status}: {error_text}");
                }
                Err(e) => {
                    // Strip the URL: it carries the API key.
                    let e = e.without_url();
                    warn!(city, attempt, error = %e, "Weather request failed");
                    last_error = Some(format!("Request error: {e}"));
                }
            }
        }

        bail!(
            "Weather API failed after {} attempt(s): {}",
            self.retry.max_attempts,
            last_error.unwrap_or_default()
        )
    }

    /// Convert a provider response into a complete bundle of exactly `days` days.
    fn normalize(city: &str, resp: ForecastResponse, days: usize) -> Result<ForecastBundle, ReportError> {
        let location = resp
            .location
            .ok_or_else(|| ReportError::forecast(city, "response has no location block"))?;

        let forecast_days = resp.forecast.map(|f| f.forecastday).unwrap_or_default();
        if forecast_days.len() < days {
            return Err(ReportError::forecast(
                city,
                format!("expected {days} forecast days, got {}", forecast_days.len()),
            ));
        }

        let mut normalized = Vec::with_capacity(days);
        for (i, entry) in forecast_days.into_iter().take(days).enumerate() {
            normalized.push(Self::normalize_day(city, i, entry)?);
        }

        Ok(ForecastBundle {
            location: Location {
                name: if location.name.is_empty() { city.to_string() } else { location.name },
                region: location.region,
                country: location.country,
            },
            days: normalized,
        })
    }

    fn normalize_day(city: &str, index: usize, entry: ApiForecastDay) -> Result<ForecastDay, ReportError> {
        let missing = |field: &str| ReportError::forecast(city, format!("day {} is missing {field}", index + 1));

        let date = entry
            .date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            .ok_or_else(|| missing("date"))?;
        let day = entry.day.ok_or_else(|| missing("day"))?;

        let max_temp = day.maxtemp_c.ok_or_else(|| missing("maxtemp_c"))?;
        let min_temp = day.mintemp_c.ok_or_else(|| missing("mintemp_c"))?;
        let total_rainfall = day.totalprecip_mm.ok_or_else(|| missing("totalprecip_mm"))?;
        let avg_humidity = day.avghumidity.ok_or_else(|| missing("avghumidity"))?;
        let rain_chance = day.daily_chance_of_rain.ok_or_else(|| missing("daily_chance_of_rain"))?;

        let condition = day
            .condition
            .map(|c| c.text.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| UNKNOWN_CONDITION.to_string());

        Ok(ForecastDay {
            date,
            min_temp,
            max_temp,
            avg_temp: day.avgtemp_c.unwrap_or((min_temp + max_temp) / 2.0),
            total_rainfall,
            avg_humidity,
            rain_chance,
            condition,
        })
    }
}

#[async_trait]
impl ForecastSource for WeatherApiClient {
    async fn fetch_forecast(&self, city: &str) -> Result<ForecastBundle, ReportError> {
        let city = city.trim();
        if city.is_empty() {
            return Err(ReportError::forecast(city, "city must not be empty"));
        }

        let raw = self
            .fetch_raw(city)
            .await
            .map_err(|e| ReportError::forecast(city, format!("{e:#}")))?;

        let bundle = Self::normalize(city, raw, self.days as usize)?;
        info!(
            city,
            location = %bundle.location.name,
            days = bundle.days.len(),
            total_rainfall_mm = format!("{:.1}", bundle.total_rainfall()),
            "Forecast fetched"
        );
        Ok(bundle)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
