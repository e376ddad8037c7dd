//! The real weather and inference clients against a local fake provider.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, FixedOffset, NaiveDate, Weekday};
use secrecy::SecretString;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use floodwatch::config::{InferenceConfig, RetryConfig, WeatherConfig};
use floodwatch::data::weather::WeatherApiClient;
use floodwatch::data::ForecastSource;
use floodwatch::engine::Orchestrator;
use floodwatch::llm::huggingface::HuggingFaceClient;
use floodwatch::llm::RiskAnalyzer;
use floodwatch::storage::{ReportStore, SqliteReportStore};
use floodwatch::types::{RegionEntry, RegionRegistry, ReportError};

use crate::mock_sources::VALID_ANALYSIS;

const WEATHER_KEY: &str = "weather-test-key";
const HF_KEY: &str = "hf-test-key";

#[derive(Default)]
struct FakeProvider {
    weather_calls: AtomicUsize,
    inference_calls: AtomicUsize,
    flaky_failures_left: AtomicUsize,
}

fn forecast_body(city: &str, days: usize, drop_rainfall: bool) -> Value {
    let start = NaiveDate::from_ymd_opt(2025, 8, 11).unwrap();
    let forecastday: Vec<Value> = (0..days)
        .map(|i| {
            let mut day = json!({
                "maxtemp_c": 34.0,
                "mintemp_c": 27.5,
                "avgtemp_c": 30.2,
                "totalprecip_mm": 18.4,
                "avghumidity": 80,
                "daily_chance_of_rain": "89",
                "condition": { "text": "Heavy rain" }
            });
            if drop_rainfall && i == 3 {
                day.as_object_mut().unwrap().remove("totalprecip_mm");
            }
            json!({
                "date": (start + Duration::days(i as i64)).format("%Y-%m-%d").to_string(),
                "day": day
            })
        })
        .collect();

    json!({
        "location": { "name": city, "region": "Province", "country": "Pakistan" },
        "forecast": { "forecastday": forecastday }
    })
}

async fn forecast(
    State(fake): State<Arc<FakeProvider>>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    fake.weather_calls.fetch_add(1, Ordering::SeqCst);

    if params.get("key").map(String::as_str) != Some(WEATHER_KEY) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": { "message": "API key invalid" } })));
    }

    let city = params.get("q").cloned().unwrap_or_default();
    let days: usize = params.get("days").and_then(|d| d.parse().ok()).unwrap_or(1);

    match city.as_str() {
        "Karachi" => (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "error": "overloaded" }))),
        "Quetta" => (StatusCode::OK, Json(forecast_body(&city, days, true))),
        "Flaky" if fake.flaky_failures_left.load(Ordering::SeqCst) > 0 => {
            fake.flaky_failures_left.fetch_sub(1, Ordering::SeqCst);
            (StatusCode::TOO_MANY_REQUESTS, Json(json!({ "error": "slow down" })))
        }
        _ => (StatusCode::OK, Json(forecast_body(&city, days, false))),
    }
}

async fn inference(
    State(fake): State<Arc<FakeProvider>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    fake.inference_calls.fetch_add(1, Ordering::SeqCst);

    let expected = format!("Bearer {HF_KEY}");
    let auth = headers.get("authorization").and_then(|v| v.to_str().ok());
    if auth != Some(expected.as_str()) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Invalid credentials" })));
    }

    let prompt = body["inputs"].as_str().unwrap_or_default();
    if !prompt.starts_with("Analyze the following") {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "unexpected prompt" })));
    }

    (StatusCode::OK, Json(json!([{ "generated_text": VALID_ANALYSIS }])))
}

async fn spawn_fake() -> (String, Arc<FakeProvider>) {
    let fake = Arc::new(FakeProvider::default());
    let app = Router::new()
        .route("/v1/forecast.json", get(forecast))
        .route("/models/test/flood-model", post(inference))
        .with_state(fake.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), fake)
}

fn weather_client(base: &str, key: &str, retry: RetryConfig) -> WeatherApiClient {
    let cfg = WeatherConfig {
        base_url: format!("{base}/v1"),
        api_key_env: "WEATHER_API_KEY".into(),
        forecast_days: 7,
        timeout_secs: 5,
    };
    WeatherApiClient::new(&cfg, SecretString::new(key.to_string()), retry).unwrap()
}

fn inference_client(base: &str, key: &str, retry: RetryConfig) -> HuggingFaceClient {
    let cfg = InferenceConfig {
        url: format!("{base}/models/test/flood-model"),
        api_key_env: "HF_API_KEY".into(),
        max_new_tokens: 256,
        timeout_secs: 5,
    };
    HuggingFaceClient::new(&cfg, SecretString::new(key.to_string()), retry).unwrap()
}

fn retrying() -> RetryConfig {
    RetryConfig { max_attempts: 3, backoff_ms: 5 }
}

#[tokio::test]
async fn test_weather_client_normalizes_forecast() {
    let (base, _) = spawn_fake().await;
    let client = weather_client(&base, WEATHER_KEY, RetryConfig::none());

    let bundle = client.fetch_forecast("Lahore").await.unwrap();
    assert_eq!(bundle.location.name, "Lahore");
    assert_eq!(bundle.days.len(), 7);
    assert_eq!(bundle.days[0].date, NaiveDate::from_ymd_opt(2025, 8, 11).unwrap());
    assert_eq!(bundle.days[6].date, NaiveDate::from_ymd_opt(2025, 8, 17).unwrap());
    // String-encoded rain chance is accepted.
    assert_eq!(bundle.days[2].rain_chance, 89.0);
    assert_eq!(bundle.days[4].condition, "Heavy rain");
}

#[tokio::test]
async fn test_weather_missing_field_is_unavailable() {
    let (base, _) = spawn_fake().await;
    let client = weather_client(&base, WEATHER_KEY, RetryConfig::none());

    match client.fetch_forecast("Quetta").await {
        Err(ReportError::ForecastUnavailable { city, reason }) => {
            assert_eq!(city, "Quetta");
            assert!(reason.contains("totalprecip_mm"), "{reason}");
        }
        other => panic!("expected ForecastUnavailable, got {other:?}"),
    }
}

#[tokio::test]
async fn test_weather_server_error_retried_then_reported() {
    let (base, fake) = spawn_fake().await;
    let client = weather_client(&base, WEATHER_KEY, retrying());

    let err = client.fetch_forecast("Karachi").await.unwrap_err();
    assert!(matches!(err, ReportError::ForecastUnavailable { .. }));
    assert_eq!(fake.weather_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_weather_rate_limit_recovers_within_budget() {
    let (base, fake) = spawn_fake().await;
    fake.flaky_failures_left.store(2, Ordering::SeqCst);
    let client = weather_client(&base, WEATHER_KEY, retrying());

    let bundle = client.fetch_forecast("Flaky").await.unwrap();
    assert_eq!(bundle.days.len(), 7);
    assert_eq!(fake.weather_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_weather_auth_error_not_retried_and_key_not_leaked() {
    let (base, fake) = spawn_fake().await;
    let client = weather_client(&base, "wrong-secret-key", retrying());

    let err = client.fetch_forecast("Lahore").await.unwrap_err();
    assert_eq!(fake.weather_calls.load(Ordering::SeqCst), 1);
    assert!(!err.to_string().contains("wrong-secret-key"));
}

#[tokio::test]
async fn test_inference_client_returns_generated_text() {
    let (base, fake) = spawn_fake().await;
    let weather = weather_client(&base, WEATHER_KEY, RetryConfig::none());
    let analyzer = inference_client(&base, HF_KEY, RetryConfig::none());
    assert_eq!(analyzer.model_name(), "test/flood-model");

    let bundle = weather.fetch_forecast("Peshawar").await.unwrap();
    let text = analyzer.analyze(&bundle).await.unwrap();
    assert!(text.contains("\"warningLevel\": \"High\""));
    assert_eq!(fake.inference_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_inference_bad_credentials_is_unavailable() {
    let (base, fake) = spawn_fake().await;
    let weather = weather_client(&base, WEATHER_KEY, RetryConfig::none());
    let analyzer = inference_client(&base, "nope", retrying());

    let bundle = weather.fetch_forecast("Peshawar").await.unwrap();
    let err = analyzer.analyze(&bundle).await.unwrap_err();
    assert!(matches!(err, ReportError::AnalysisUnavailable(_)));
    assert_eq!(fake.inference_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_full_pass_over_http() {
    let (base, _) = spawn_fake().await;
    let store = Arc::new(SqliteReportStore::in_memory().await.unwrap());

    let orchestrator = Orchestrator::new(
        RegionRegistry::new(vec![
            RegionEntry::new("Punjab", "Lahore"),
            RegionEntry::new("Sindh", "Karachi"),
            RegionEntry::new("Balochistan", "Quetta"),
        ]),
        Arc::new(weather_client(&base, WEATHER_KEY, RetryConfig::none())),
        Arc::new(inference_client(&base, HF_KEY, RetryConfig::none())),
        store.clone(),
        Weekday::Mon,
        FixedOffset::east_opt(5 * 3600).unwrap(),
    );

    let summary = orchestrator
        .run_pass_for(NaiveDate::from_ymd_opt(2025, 8, 13).unwrap())
        .await
        .unwrap();
    assert_eq!((summary.succeeded, summary.failed, summary.skipped), (1, 2, 0));

    let reports = store
        .find_by_period(NaiveDate::from_ymd_opt(2025, 8, 11).unwrap())
        .await
        .unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].region, "Punjab");
    assert_eq!(reports[0].risk_score, 78);
}
