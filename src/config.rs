//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`.

use anyhow::{bail, Context, Result};
use chrono::{FixedOffset, Weekday};
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::time::Duration;

use crate::types::{RegionEntry, RegionRegistry};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub service: ServiceConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    pub weather: WeatherConfig,
    pub inference: InferenceConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub regions: Vec<RegionEntry>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub name: String,
    /// sqlx connection string, e.g. `sqlite://floodwatch.db`.
    pub database_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    /// First day of each reporting cycle.
    #[serde(default = "default_anchor")]
    pub anchor: Weekday,
    /// Offset from UTC used to decide when "midnight on the anchor day" is.
    #[serde(default)]
    pub utc_offset_minutes: i32,
    #[serde(default = "default_true")]
    pub startup_catch_up: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            anchor: default_anchor(),
            utc_offset_minutes: 0,
            startup_catch_up: true,
        }
    }
}

impl ScheduleConfig {
    pub fn utc_offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .with_context(|| format!("Invalid utc_offset_minutes: {}", self.utc_offset_minutes))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WeatherConfig {
    #[serde(default = "default_weather_url")]
    pub base_url: String,
    pub api_key_env: String,
    #[serde(default = "default_forecast_days")]
    pub forecast_days: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InferenceConfig {
    pub url: String,
    pub api_key_env: String,
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: u32,
    #[serde(default = "default_inference_timeout_secs")]
    pub timeout_secs: u64,
}

/// External-call retry policy shared by the weather and inference clients.
/// `max_attempts = 1` means no retry.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl RetryConfig {
    /// No retries: one attempt per call.
    pub fn none() -> Self {
        Self { max_attempts: 1, backoff_ms: 0 }
    }

    /// Delay before the given (1-based) retry: `backoff_ms * 2^(retry-1)`.
    pub fn delay_before(&self, retry: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry.saturating_sub(1));
        Duration::from_millis(self.backoff_ms.saturating_mul(factor))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { enabled: true, port: 8080 }
    }
}

fn default_anchor() -> Weekday {
    Weekday::Mon
}

fn default_true() -> bool {
    true
}

fn default_weather_url() -> String {
    "https://api.weatherapi.com/v1".to_string()
}

fn default_forecast_days() -> u32 {
    7
}

fn default_timeout_secs() -> u64 {
    15
}

fn default_inference_timeout_secs() -> u64 {
    120
}

fn default_max_new_tokens() -> u32 {
    1024
}

fn default_max_attempts() -> u32 {
    1
}

fn default_backoff_ms() -> u64 {
    1000
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.regions.is_empty() {
            bail!("At least one [[regions]] entry is required");
        }
        let mut seen = HashSet::new();
        for region in &self.regions {
            if region.name.trim().is_empty() {
                bail!("Region name must not be empty");
            }
            if region.city.trim().is_empty() {
                bail!("City for region {} must not be empty", region.name);
            }
            if !seen.insert(region.name.as_str()) {
                bail!("Duplicate region: {}", region.name);
            }
        }
        if self.weather.forecast_days == 0 {
            bail!("weather.forecast_days must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        self.schedule.utc_offset()?;
        Ok(())
    }

    /// The region registry, in configured order.
    pub fn registry(&self) -> RegionRegistry {
        RegionRegistry::new(self.regions.clone())
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Resolve a secret referenced by env-var name.
    pub fn resolve_secret(env_name: &str) -> Result<SecretString> {
        Self::resolve_env(env_name).map(SecretString::new)
    }
}
