//! Persistence layer.
//!
//! Stores finalized reports in SQLite via `sqlx`. List fields are kept as
//! structured data in the domain types and serialized to JSON text only
//! here, at the storage boundary. A unique index on `(region, period_start)`
//! backs up the pipeline's existence check: a racing second insert is
//! reported as `ReportError::AlreadyExists` instead of creating a duplicate.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info};

use crate::types::{NewReport, Report, ReportError, WarningLevel};

/// Report persistence keyed by `(region, period_start)`. Append-only.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Whether a report exists for the region and period.
    async fn exists(&self, region: &str, period_start: NaiveDate) -> Result<bool, ReportError>;

    /// Persist a new report, assigning its id and `created_at`.
    async fn save(&self, report: NewReport) -> Result<Report, ReportError>;

    /// All reports for a period, ordered by region.
    async fn find_by_period(&self, period_start: NaiveDate) -> Result<Vec<Report>, ReportError>;

    /// The most recent report of every region, ordered by region.
    async fn find_latest_per_region(&self) -> Result<Vec<Report>, ReportError>;

    /// All reports of a region, newest period first.
    async fn find_history(&self, region: &str) -> Result<Vec<Report>, ReportError>;

    async fn find_by_region_and_period(
        &self,
        region: &str,
        period_start: NaiveDate,
    ) -> Result<Option<Report>, ReportError>;
}

const CREATE_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS reports (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        region          TEXT    NOT NULL,
        city            TEXT    NOT NULL,
        period_start    TEXT    NOT NULL,
        period_end      TEXT    NOT NULL,
        warning_level   TEXT    NOT NULL,
        risk_score      INTEGER NOT NULL,
        confidence      INTEGER NOT NULL,
        summary         TEXT    NOT NULL,
        key_factors     TEXT    NOT NULL,
        recommendations TEXT    NOT NULL,
        daily_risks     TEXT    NOT NULL,
        peak_risk_days  TEXT    NOT NULL,
        generated_at    TEXT    NOT NULL,
        created_at      TEXT    NOT NULL
    )";

const CREATE_UNIQUE_INDEX: &str = "
    CREATE UNIQUE INDEX IF NOT EXISTS idx_reports_region_period
        ON reports (region, period_start)";

const SELECT_COLUMNS: &str = "
    SELECT id, region, city, period_start, period_end, warning_level, risk_score,
           confidence, summary, key_factors, recommendations, daily_risks,
           peak_risk_days, generated_at, created_at
    FROM reports";

const DATE_FORMAT: &str = "%Y-%m-%d";

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

#[derive(Debug, sqlx::FromRow)]
struct ReportRow {
    id: i64,
    region: String,
    city: String,
    period_start: String,
    period_end: String,
    warning_level: String,
    risk_score: i64,
    confidence: i64,
    summary: String,
    key_factors: String,
    recommendations: String,
    daily_risks: String,
    peak_risk_days: String,
    generated_at: String,
    created_at: String,
}

fn decode_err(msg: String) -> ReportError {
    ReportError::Storage(sqlx::Error::Decode(msg.into()))
}

fn parse_date(column: &str, raw: &str) -> Result<NaiveDate, ReportError> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|e| decode_err(format!("{column}: invalid date {raw:?}: {e}")))
}

fn parse_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, ReportError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| decode_err(format!("{column}: invalid timestamp {raw:?}: {e}")))
}

fn parse_json<T: DeserializeOwned>(column: &str, raw: &str) -> Result<T, ReportError> {
    serde_json::from_str(raw).map_err(|e| decode_err(format!("{column}: invalid JSON: {e}")))
}

fn parse_score(column: &str, raw: i64) -> Result<u8, ReportError> {
    u8::try_from(raw)
        .ok()
        .filter(|v| *v <= 100)
        .ok_or_else(|| decode_err(format!("{column}: out of range: {raw}")))
}

fn to_json<T: Serialize>(column: &str, value: &T) -> Result<String, ReportError> {
    serde_json::to_string(value)
        .map_err(|e| ReportError::Storage(sqlx::Error::Encode(format!("{column}: {e}").into())))
}

impl TryFrom<ReportRow> for Report {
    type Error = ReportError;

    fn try_from(row: ReportRow) -> Result<Self, Self::Error> {
        Ok(Report {
            id: row.id,
            period_start: parse_date("period_start", &row.period_start)?,
            period_end: parse_date("period_end", &row.period_end)?,
            warning_level: row
                .warning_level
                .parse::<WarningLevel>()
                .map_err(|e: String| decode_err(format!("warning_level: {e}")))?,
            risk_score: parse_score("risk_score", row.risk_score)?,
            confidence: parse_score("confidence", row.confidence)?,
            key_factors: parse_json("key_factors", &row.key_factors)?,
            recommendations: parse_json("recommendations", &row.recommendations)?,
            daily_risks: parse_json("daily_risks", &row.daily_risks)?,
            peak_risk_days: parse_json("peak_risk_days", &row.peak_risk_days)?,
            generated_at: parse_timestamp("generated_at", &row.generated_at)?,
            created_at: parse_timestamp("created_at", &row.created_at)?,
            region: row.region,
            city: row.city,
            summary: row.summary,
        })
    }
}

fn rows_to_reports(rows: Vec<ReportRow>) -> Result<Vec<Report>, ReportError> {
    rows.into_iter().map(Report::try_from).collect()
}

// ---------------------------------------------------------------------------
// SQLite store
// ---------------------------------------------------------------------------

pub struct SqliteReportStore {
    pool: SqlitePool,
}

impl SqliteReportStore {
    /// Open (creating if needed) the database at `url` and ensure the schema.
    pub async fn connect(url: &str) -> Result<Self, ReportError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        // Every connection to `:memory:` is a separate database.
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        info!(url, "Report store ready");
        Ok(store)
    }

    /// A fresh in-memory store (tests and dry runs).
    pub async fn in_memory() -> Result<Self, ReportError> {
        Self::connect("sqlite::memory:").await
    }

    async fn init_schema(&self) -> Result<(), ReportError> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        sqlx::query(CREATE_UNIQUE_INDEX).execute(&self.pool).await?;
        Ok(())
    }

    /// Number of stored reports.
    pub async fn count(&self) -> Result<i64, ReportError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reports")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl ReportStore for SqliteReportStore {
    async fn exists(&self, region: &str, period_start: NaiveDate) -> Result<bool, ReportError> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT id FROM reports WHERE region = ? AND period_start = ? LIMIT 1")
                .bind(region)
                .bind(period_start.format(DATE_FORMAT).to_string())
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }

    async fn save(&self, report: NewReport) -> Result<Report, ReportError> {
        let created_at = Utc::now();
        let a = &report.analysis;

        let result = sqlx::query(
            "INSERT INTO reports (
                region, city, period_start, period_end, warning_level, risk_score,
                confidence, summary, key_factors, recommendations, daily_risks,
                peak_risk_days, generated_at, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&report.region)
        .bind(&report.city)
        .bind(report.period.start.format(DATE_FORMAT).to_string())
        .bind(report.period.end.format(DATE_FORMAT).to_string())
        .bind(a.warning_level.as_str())
        .bind(i64::from(a.risk_score))
        .bind(i64::from(a.confidence))
        .bind(&a.summary)
        .bind(to_json("key_factors", &a.key_factors)?)
        .bind(to_json("recommendations", &a.recommendations)?)
        .bind(to_json("daily_risks", &a.daily_risks)?)
        .bind(to_json("peak_risk_days", &a.peak_risk_days)?)
        .bind(report.generated_at.to_rfc3339())
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        let id = match result {
            Ok(done) => done.last_insert_rowid(),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                return Err(ReportError::AlreadyExists {
                    region: report.region,
                    period_start: report.period.start,
                });
            }
            Err(e) => return Err(e.into()),
        };

        debug!(id, region = %report.region, period_start = %report.period.start, "Report saved");

        Ok(Report {
            id,
            region: report.region,
            city: report.city,
            period_start: report.period.start,
            period_end: report.period.end,
            warning_level: report.analysis.warning_level,
            risk_score: report.analysis.risk_score,
            confidence: report.analysis.confidence,
            summary: report.analysis.summary,
            key_factors: report.analysis.key_factors,
            recommendations: report.analysis.recommendations,
            daily_risks: report.analysis.daily_risks,
            peak_risk_days: report.analysis.peak_risk_days,
            generated_at: report.generated_at,
            created_at,
        })
    }

    async fn find_by_period(&self, period_start: NaiveDate) -> Result<Vec<Report>, ReportError> {
        let sql = format!("{SELECT_COLUMNS} WHERE period_start = ? ORDER BY region ASC");
        let rows = sqlx::query_as::<_, ReportRow>(&sql)
            .bind(period_start.format(DATE_FORMAT).to_string())
            .fetch_all(&self.pool)
            .await?;
        rows_to_reports(rows)
    }

    async fn find_latest_per_region(&self) -> Result<Vec<Report>, ReportError> {
        let sql = format!(
            "{SELECT_COLUMNS} r WHERE r.id = (
                SELECT r2.id FROM reports r2
                WHERE r2.region = r.region
                ORDER BY r2.period_start DESC, r2.id DESC
                LIMIT 1
            ) ORDER BY r.region ASC"
        );
        let rows = sqlx::query_as::<_, ReportRow>(&sql).fetch_all(&self.pool).await?;
        rows_to_reports(rows)
    }

    async fn find_history(&self, region: &str) -> Result<Vec<Report>, ReportError> {
        let sql = format!("{SELECT_COLUMNS} WHERE region = ? ORDER BY period_start DESC, id DESC");
        let rows = sqlx::query_as::<_, ReportRow>(&sql)
            .bind(region)
            .fetch_all(&self.pool)
            .await?;
        rows_to_reports(rows)
    }

    async fn find_by_region_and_period(
        &self,
        region: &str,
        period_start: NaiveDate,
    ) -> Result<Option<Report>, ReportError> {
        let sql = format!("{SELECT_COLUMNS} WHERE region = ? AND period_start = ? LIMIT 1");
        let row = sqlx::query_as::<_, ReportRow>(&sql)
            .bind(region)
            .bind(period_start.format(DATE_FORMAT).to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Report::try_from).transpose()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
