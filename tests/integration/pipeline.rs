//! End-to-end report passes over the in-memory store.

use chrono::{Datelike, FixedOffset, NaiveDate, Weekday};
use std::sync::Arc;

use floodwatch::config::AppConfig;
use floodwatch::engine::Orchestrator;
use floodwatch::storage::{ReportStore, SqliteReportStore};
use floodwatch::types::{RegionEntry, RegionOutcome, RegionRegistry, WarningLevel};

use crate::mock_sources::{MockAnalyzer, MockForecasts};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn five_regions() -> RegionRegistry {
    RegionRegistry::new(vec![
        RegionEntry::new("Punjab", "Lahore"),
        RegionEntry::new("Sindh", "Karachi"),
        RegionEntry::new("KPK", "Peshawar"),
        RegionEntry::new("Balochistan", "Quetta"),
        RegionEntry::new("Gilgit-Baltistan", "Gilgit"),
    ])
}

struct Harness {
    orchestrator: Orchestrator,
    store: Arc<SqliteReportStore>,
    forecasts: Arc<MockForecasts>,
    analyzer: Arc<MockAnalyzer>,
}

async fn harness(registry: RegionRegistry, forecasts: MockForecasts, analyzer: MockAnalyzer) -> Harness {
    let store = Arc::new(SqliteReportStore::in_memory().await.unwrap());
    let forecasts = Arc::new(forecasts);
    let analyzer = Arc::new(analyzer);
    let orchestrator = Orchestrator::new(
        registry,
        forecasts.clone(),
        analyzer.clone(),
        store.clone(),
        Weekday::Mon,
        FixedOffset::east_opt(5 * 3600).unwrap(),
    );
    Harness { orchestrator, store, forecasts, analyzer }
}

#[tokio::test]
async fn test_sindh_forecast_failure_leaves_punjab_stored() {
    let registry = RegionRegistry::new(vec![
        RegionEntry::new("Punjab", "Lahore"),
        RegionEntry::new("Sindh", "Karachi"),
    ]);
    let h = harness(registry, MockForecasts::failing_for(&["Karachi"]), MockAnalyzer::new()).await;

    // Thursday; period is Mon 2025-08-11 to Sun 2025-08-17.
    let summary = h.orchestrator.run_pass_for(date(2025, 8, 14)).await.unwrap();
    assert_eq!((summary.succeeded, summary.failed, summary.skipped), (1, 1, 0));

    let punjab = h
        .store
        .find_by_region_and_period("Punjab", date(2025, 8, 11))
        .await
        .unwrap()
        .expect("Punjab report stored");
    assert_eq!(punjab.city, "Lahore");
    assert_eq!(punjab.period_start, date(2025, 8, 11));
    assert_eq!(punjab.period_end, date(2025, 8, 17));
    assert_eq!(punjab.warning_level, WarningLevel::High);
    assert_eq!(punjab.risk_score, 78);
    assert_eq!(punjab.confidence, 65);
    assert_eq!(punjab.key_factors.len(), 2);
    assert_eq!(punjab.daily_risks.len(), 2);
    assert_eq!(punjab.peak_risk_days, vec![date(2025, 8, 13)]);

    assert!(h
        .store
        .find_by_region_and_period("Sindh", date(2025, 8, 11))
        .await
        .unwrap()
        .is_none());
    // Karachi never reached the analyzer.
    assert_eq!(h.analyzer.calls(), 1);
}

#[tokio::test]
async fn test_pass_twice_in_same_period_is_idempotent() {
    let h = harness(five_regions(), MockForecasts::new(), MockAnalyzer::new()).await;

    let first = h.orchestrator.run_pass_for(date(2025, 8, 11)).await.unwrap();
    assert_eq!((first.succeeded, first.failed, first.skipped), (5, 0, 0));

    let second = h.orchestrator.run_pass_for(date(2025, 8, 16)).await.unwrap();
    assert_eq!((second.succeeded, second.failed, second.skipped), (0, 0, 5));
    assert!(second
        .regions
        .iter()
        .all(|r| r.outcome == RegionOutcome::Skipped));

    assert_eq!(h.store.count().await.unwrap(), 5);
    assert_eq!(h.forecasts.calls(), 5);
    assert_eq!(h.analyzer.calls(), 5);
}

#[tokio::test]
async fn test_next_period_generates_again() {
    let h = harness(five_regions(), MockForecasts::new(), MockAnalyzer::new()).await;

    h.orchestrator.run_pass_for(date(2025, 8, 17)).await.unwrap();
    let next = h.orchestrator.run_pass_for(date(2025, 8, 18)).await.unwrap();
    assert_eq!(next.succeeded, 5);
    assert_eq!(next.period.start, date(2025, 8, 18));
    assert_eq!(next.period.start.weekday(), Weekday::Mon);

    let history = h.store.find_history("KPK").await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].period_start, date(2025, 8, 18));
    assert_eq!(history[1].period_start, date(2025, 8, 11));
}

#[tokio::test]
async fn test_analysis_unavailable_for_one_region() {
    let analyzer = MockAnalyzer::new().unavailable_for(&["Quetta"]);
    let h = harness(five_regions(), MockForecasts::new(), analyzer).await;

    let summary = h.orchestrator.run_pass_for(date(2025, 8, 12)).await.unwrap();
    assert_eq!((summary.succeeded, summary.failed, summary.skipped), (4, 1, 0));

    let stored: Vec<String> = h
        .store
        .find_by_period(date(2025, 8, 11))
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.region)
        .collect();
    assert_eq!(stored, vec!["Gilgit-Baltistan", "KPK", "Punjab", "Sindh"]);

    // A later pass in the same period retries only the failed region.
    let retry = h.orchestrator.run_pass_for(date(2025, 8, 13)).await.unwrap();
    assert_eq!((retry.skipped, retry.failed), (4, 1));
}

#[tokio::test]
async fn test_malformed_analysis_fails_every_region() {
    let analyzer = MockAnalyzer::responding("Risk looks moderate, stay alert.");
    let h = harness(five_regions(), MockForecasts::new(), analyzer).await;

    let summary = h.orchestrator.run_pass_for(date(2025, 8, 12)).await.unwrap();
    assert_eq!(summary.failed, 5);
    assert_eq!(h.store.count().await.unwrap(), 0);
    let names: Vec<&str> = summary.regions.iter().map(|r| r.region.as_str()).collect();
    assert_eq!(names, vec!["Punjab", "Sindh", "KPK", "Balochistan", "Gilgit-Baltistan"]);
}

#[tokio::test]
async fn test_out_of_range_scores_are_clamped_on_store() {
    let response = crate::mock_sources::VALID_ANALYSIS
        .replace("\"riskScore\": 78", "\"riskScore\": 140")
        .replace("\"confidence\": 65", "\"confidence\": -3");
    let registry = RegionRegistry::new(vec![RegionEntry::new("Sindh", "Karachi")]);
    let h = harness(registry, MockForecasts::new(), MockAnalyzer::responding(&response)).await;

    h.orchestrator.run_pass_for(date(2025, 8, 12)).await.unwrap();
    let report = h
        .store
        .find_by_region_and_period("Sindh", date(2025, 8, 11))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.risk_score, 100);
    assert_eq!(report.confidence, 0);
}

#[tokio::test]
async fn test_registry_from_config_file() {
    let cfg = AppConfig::load(concat!(env!("CARGO_MANIFEST_DIR"), "/config.toml")).unwrap();
    let registry = cfg.registry();
    assert_eq!(registry.len(), 5);
    assert_eq!(registry.city_for("Gilgit-Baltistan"), Some("Gilgit"));

    let h = harness(registry, MockForecasts::new(), MockAnalyzer::new()).await;
    let summary = h.orchestrator.run_pass_for(date(2025, 8, 12)).await.unwrap();
    assert_eq!(summary.succeeded, 5);
}
