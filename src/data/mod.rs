//! External forecast data.
//!
//! Defines the `ForecastSource` trait and the WeatherAPI.com implementation
//! that fetches and normalizes multi-day forecasts.

pub mod weather;

use async_trait::async_trait;

use crate::types::{ForecastBundle, ReportError};

/// Abstraction over weather forecast providers.
///
/// Implementors return a complete, chronological forecast for a city or
/// fail with `ReportError::ForecastUnavailable`. Partial bundles are never
/// returned.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ForecastSource: Send + Sync {
    /// Fetch the multi-day forecast for `city`.
    async fn fetch_forecast(&self, city: &str) -> Result<ForecastBundle, ReportError>;
}
