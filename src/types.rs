//! Shared types for the FLOODWATCH service.
//!
//! These types form the data model used across all modules: the region
//! registry, transient forecast data, the validated analysis, persisted
//! reports, and the per-pass run summary.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Warning level
// ---------------------------------------------------------------------------

/// Flood warning severity, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WarningLevel {
    Low,
    Moderate,
    High,
    Critical,
}

impl WarningLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningLevel::Low => "Low",
            WarningLevel::Moderate => "Moderate",
            WarningLevel::High => "High",
            WarningLevel::Critical => "Critical",
        }
    }
}

impl fmt::Display for WarningLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case-insensitive parse of a warning level label.
impl std::str::FromStr for WarningLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(WarningLevel::Low),
            "moderate" => Ok(WarningLevel::Moderate),
            "high" => Ok(WarningLevel::High),
            "critical" => Ok(WarningLevel::Critical),
            other => Err(format!("unknown warning level: {other:?}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Region registry
// ---------------------------------------------------------------------------

/// A region and the representative city used for its weather lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionEntry {
    pub name: String,
    pub city: String,
}

impl RegionEntry {
    pub fn new(name: impl Into<String>, city: impl Into<String>) -> Self {
        Self { name: name.into(), city: city.into() }
    }
}

/// Ordered, read-only region → city table. Iteration order is the order
/// regions are visited during a pass.
#[derive(Debug, Clone, Default)]
pub struct RegionRegistry {
    entries: Vec<RegionEntry>,
}

impl RegionRegistry {
    pub fn new(entries: Vec<RegionEntry>) -> Self {
        Self { entries }
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegionEntry> {
        self.entries.iter()
    }

    /// City registered for `region`, if any.
    pub fn city_for(&self, region: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.name == region)
            .map(|e| e.city.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Reporting period
// ---------------------------------------------------------------------------

/// Number of days in one reporting cycle.
pub const PERIOD_DAYS: i64 = 7;

/// A 7-day reporting period. `start` always falls on the cycle anchor day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Period {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Period {
    /// The period containing `date`: starts on the most recent `anchor`
    /// weekday on or before `date`.
    pub fn containing(date: NaiveDate, anchor: Weekday) -> Self {
        let back = (date.weekday().num_days_from_monday() + 7
            - anchor.num_days_from_monday())
            % 7;
        let start = date - Duration::days(i64::from(back));
        Self {
            start,
            end: start + Duration::days(PERIOD_DAYS - 1),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

// ---------------------------------------------------------------------------
// Forecast
// ---------------------------------------------------------------------------

/// Location block reported by the weather provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    pub region: String,
    pub country: String,
}

/// One normalized forecast day. Temperatures in °C, rainfall in mm,
/// humidity and rain chance in percent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastDay {
    pub date: NaiveDate,
    pub min_temp: f64,
    pub max_temp: f64,
    pub avg_temp: f64,
    pub total_rainfall: f64,
    pub avg_humidity: f64,
    pub rain_chance: f64,
    pub condition: String,
}

/// A complete multi-day forecast for one city, chronological.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastBundle {
    pub location: Location,
    pub days: Vec<ForecastDay>,
}

impl ForecastBundle {
    /// Total rainfall over all forecast days (mm).
    pub fn total_rainfall(&self) -> f64 {
        self.days.iter().map(|d| d.total_rainfall).sum()
    }
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

/// Per-day risk entry from the analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyRisk {
    pub date: NaiveDate,
    pub risk_level: WarningLevel,
    pub reason: String,
}

/// Validated output of the risk analyzer, prior to assembly into a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analysis {
    pub warning_level: WarningLevel,
    /// 0–100.
    pub risk_score: u8,
    /// 0–100.
    pub confidence: u8,
    pub summary: String,
    pub key_factors: Vec<String>,
    pub recommendations: Vec<String>,
    pub daily_risks: Vec<DailyRisk>,
    pub peak_risk_days: Vec<NaiveDate>,
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// An assembled report that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewReport {
    pub region: String,
    pub city: String,
    pub period: Period,
    pub analysis: Analysis,
    pub generated_at: DateTime<Utc>,
}

impl NewReport {
    pub fn assemble(region: &RegionEntry, period: Period, analysis: Analysis, generated_at: DateTime<Utc>) -> Self {
        Self {
            region: region.name.clone(),
            city: region.city.clone(),
            period,
            analysis,
            generated_at,
        }
    }
}

/// A finalized, persisted flood-risk assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: i64,
    pub region: String,
    pub city: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub warning_level: WarningLevel,
    pub risk_score: u8,
    pub confidence: u8,
    pub summary: String,
    pub key_factors: Vec<String>,
    pub recommendations: Vec<String>,
    pub daily_risks: Vec<DailyRisk>,
    pub peak_risk_days: Vec<NaiveDate>,
    pub generated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({}): {} risk={} confidence={}%",
            self.period_start,
            self.region,
            self.city,
            self.warning_level,
            self.risk_score,
            self.confidence,
        )
    }
}

// ---------------------------------------------------------------------------
// Pass summary
// ---------------------------------------------------------------------------

/// Pipeline step a region was in when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    CheckExists,
    Fetch,
    Analyze,
    Parse,
    Persist,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::CheckExists => "check_exists",
            Stage::Fetch => "fetch",
            Stage::Analyze => "analyze",
            Stage::Parse => "parse",
            Stage::Persist => "persist",
        };
        f.write_str(name)
    }
}

/// Terminal state of one region within a pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RegionOutcome {
    Generated { report_id: i64 },
    Skipped,
    Failed { stage: Stage, error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionResult {
    pub region: String,
    #[serde(flatten)]
    pub outcome: RegionOutcome,
}

/// Aggregate result of one pass over every registered region.
#[derive(Debug, Clone, Serialize)]
pub struct PassSummary {
    pub run_id: String,
    pub period: Period,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub regions: Vec<RegionResult>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl PassSummary {
    pub fn new(run_id: String, period: Period, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            period,
            succeeded: 0,
            skipped: 0,
            failed: 0,
            regions: Vec::new(),
            started_at,
            finished_at: started_at,
        }
    }

    /// Record a region's outcome and bump the matching counter.
    pub fn record(&mut self, region: &str, outcome: RegionOutcome) {
        match outcome {
            RegionOutcome::Generated { .. } => self.succeeded += 1,
            RegionOutcome::Skipped => self.skipped += 1,
            RegionOutcome::Failed { .. } => self.failed += 1,
        }
        self.regions.push(RegionResult {
            region: region.to_string(),
            outcome,
        });
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.skipped + self.failed
    }
}

impl fmt::Display for PassSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pass {} ({}): success={} skip={} failure={}",
            self.run_id, self.period, self.succeeded, self.skipped, self.failed,
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Failure taxonomy of the generation pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("Forecast unavailable for {city}: {reason}")]
    ForecastUnavailable { city: String, reason: String },

    #[error("Analysis unavailable: {0}")]
    AnalysisUnavailable(String),

    #[error("Malformed analysis: {0}")]
    MalformedAnalysis(String),

    /// Not a failure: the region is skipped for this period.
    #[error("Report already exists for {region} (period starting {period_start})")]
    AlreadyExists { region: String, period_start: NaiveDate },

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Region registry is empty")]
    EmptyRegistry,
}

impl ReportError {
    pub fn forecast(city: &str, reason: impl Into<String>) -> Self {
        ReportError::ForecastUnavailable {
            city: city.to_string(),
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
