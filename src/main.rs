//! FLOODWATCH: Weekly per-region flood-risk report generator
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the report store, runs the startup catch-up pass, then fires a
//! pass every week on the anchor day until Ctrl+C.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info};

use floodwatch::api::{self, routes::ApiState};
use floodwatch::config::AppConfig;
use floodwatch::data::weather::WeatherApiClient;
use floodwatch::engine::{Orchestrator, Scheduler};
use floodwatch::llm::huggingface::HuggingFaceClient;
use floodwatch::llm::RiskAnalyzer;
use floodwatch::storage::SqliteReportStore;

const BANNER: &str = r#"
 _____ _     ___   ___  ______        ___  _____ ____ _   _
|  ___| |   / _ \ / _ \|  _ \ \      / / \|_   _/ ___| | | |
| |_  | |  | | | | | | | | | \ \ /\ / / _ \ | || |   | |_| |
|  _| | |__| |_| | |_| | |_| |\ V  V / ___ \| || |___|  _  |
|_|   |_____\___/ \___/|____/  \_/\_/_/   \_\_| \____|_| |_|

  Weekly regional flood-risk reports
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::var("FLOODWATCH_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = AppConfig::load(&config_path)?;

    init_logging();

    println!("{BANNER}");
    info!(
        service = %cfg.service.name,
        regions = cfg.regions.len(),
        anchor = %cfg.schedule.anchor,
        utc_offset_minutes = cfg.schedule.utc_offset_minutes,
        "FLOODWATCH starting up"
    );

    // -- Storage ---------------------------------------------------------------

    let store = Arc::new(
        SqliteReportStore::connect(&cfg.service.database_url)
            .await
            .with_context(|| format!("Failed to open report store at {}", cfg.service.database_url))?,
    );

    // -- External clients --------------------------------------------------------

    let weather_key = AppConfig::resolve_secret(&cfg.weather.api_key_env)?;
    let weather = WeatherApiClient::new(&cfg.weather, weather_key, cfg.retry)?;

    let inference_key = AppConfig::resolve_secret(&cfg.inference.api_key_env)?;
    let analyzer = HuggingFaceClient::new(&cfg.inference, inference_key, cfg.retry)?;
    info!(model = analyzer.model_name(), "Risk analyzer configured");

    // -- Engine ------------------------------------------------------------------

    let orchestrator = Arc::new(Orchestrator::new(
        cfg.registry(),
        Arc::new(weather),
        Arc::new(analyzer),
        store,
        cfg.schedule.anchor,
        cfg.schedule.utc_offset()?,
    ));

    if cfg.api.enabled {
        api::spawn_api(Arc::new(ApiState::new(orchestrator.clone())), cfg.api.port).await?;
    }

    let scheduler = Scheduler::new(orchestrator);

    if cfg.schedule.startup_catch_up {
        match scheduler.startup_catch_up().await {
            Ok(summary) => info!(summary = %summary, "Startup catch-up finished"),
            Err(e) => error!(error = %e, "Startup catch-up failed"),
        }
    }

    info!("Entering schedule loop. Press Ctrl+C to stop.");

    tokio::select! {
        _ = scheduler.run() => {}
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            info!("Shutdown signal received");
        }
    }

    info!("FLOODWATCH stopped");
    Ok(())
}

/// Initialise tracing. Set `FLOODWATCH_LOG_JSON` for JSON output;
/// `RUST_LOG` overrides the default filter.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("floodwatch=info"));

    let json_logging = std::env::var("FLOODWATCH_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
