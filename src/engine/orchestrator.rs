//! Report pass orchestrator.
//!
//! One pass visits every region in registry order and takes each through
//! check-exists → fetch → analyze → parse → persist. A region that fails
//! at any step is logged and counted; it never aborts the rest of the pass.
//! A report already stored for the region and period is a skip, including
//! the case where another writer wins the race between the existence check
//! and the insert.

use std::sync::Arc;

use chrono::{FixedOffset, NaiveDate, Utc, Weekday};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::data::ForecastSource;
use crate::llm::parser::parse_analysis;
use crate::llm::RiskAnalyzer;
use crate::storage::ReportStore;
use crate::types::{
    NewReport, PassSummary, Period, RegionEntry, RegionOutcome, RegionRegistry, Report, ReportError, Stage,
};

/// A region's pipeline failure, tagged with the step it happened in.
#[derive(Debug)]
struct StepFailure {
    stage: Stage,
    error: ReportError,
}

trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, StepFailure>;
}

impl<T> AtStage<T> for Result<T, ReportError> {
    fn at(self, stage: Stage) -> Result<T, StepFailure> {
        self.map_err(|error| StepFailure { stage, error })
    }
}

pub struct Orchestrator {
    registry: RegionRegistry,
    forecasts: Arc<dyn ForecastSource>,
    analyzer: Arc<dyn RiskAnalyzer>,
    store: Arc<dyn ReportStore>,
    anchor: Weekday,
    offset: FixedOffset,
}

impl Orchestrator {
    pub fn new(
        registry: RegionRegistry,
        forecasts: Arc<dyn ForecastSource>,
        analyzer: Arc<dyn RiskAnalyzer>,
        store: Arc<dyn ReportStore>,
        anchor: Weekday,
        offset: FixedOffset,
    ) -> Self {
        Self {
            registry,
            forecasts,
            analyzer,
            store,
            anchor,
            offset,
        }
    }

    pub fn registry(&self) -> &RegionRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn ReportStore> {
        &self.store
    }

    pub fn anchor(&self) -> Weekday {
        self.anchor
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Today's date in the configured time zone.
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.offset).date_naive()
    }

    /// The period containing today.
    pub fn current_period(&self) -> Period {
        Period::containing(self.today(), self.anchor)
    }

    /// Run a pass for the period containing today.
    pub async fn run_pass(&self) -> Result<PassSummary, ReportError> {
        self.run_pass_for(self.today()).await
    }

    /// Run a pass for the period containing `trigger_date`.
    ///
    /// Only an empty registry fails the pass as a whole; per-region errors
    /// end up in the summary.
    pub async fn run_pass_for(&self, trigger_date: NaiveDate) -> Result<PassSummary, ReportError> {
        if self.registry.is_empty() {
            return Err(ReportError::EmptyRegistry);
        }

        let period = Period::containing(trigger_date, self.anchor);
        let run_id = Uuid::new_v4().to_string();

        info!(
            run_id = %run_id,
            period_start = %period.start,
            period_end = %period.end,
            regions = self.registry.len(),
            "Starting report pass"
        );

        let mut summary = PassSummary::new(run_id, period, Utc::now());

        for region in self.registry.iter() {
            let outcome = match self.process_region(region, period).await {
                Ok(Some(report)) => {
                    info!(
                        region = %region.name,
                        city = %region.city,
                        report_id = report.id,
                        warning_level = %report.warning_level,
                        risk_score = report.risk_score,
                        "Report generated"
                    );
                    RegionOutcome::Generated { report_id: report.id }
                }
                Ok(None) => RegionOutcome::Skipped,
                Err(failure) => {
                    error!(
                        region = %region.name,
                        city = %region.city,
                        stage = %failure.stage,
                        error = %failure.error,
                        "Report generation failed"
                    );
                    RegionOutcome::Failed {
                        stage: failure.stage,
                        error: failure.error.to_string(),
                    }
                }
            };
            summary.record(&region.name, outcome);
        }

        summary.finished_at = Utc::now();

        info!(
            run_id = %summary.run_id,
            regions = summary.total(),
            succeeded = summary.succeeded,
            skipped = summary.skipped,
            failed = summary.failed,
            elapsed_ms = (summary.finished_at - summary.started_at).num_milliseconds(),
            "Report pass complete"
        );

        Ok(summary)
    }

    /// `Ok(None)` when the region already has a report for `period`.
    async fn process_region(&self, region: &RegionEntry, period: Period) -> Result<Option<Report>, StepFailure> {
        let exists = self
            .store
            .exists(&region.name, period.start)
            .await
            .at(Stage::CheckExists)?;
        if exists {
            info!(region = %region.name, period_start = %period.start, "Report already exists, skipping");
            return Ok(None);
        }

        let bundle = self
            .forecasts
            .fetch_forecast(&region.city)
            .await
            .at(Stage::Fetch)?;

        let raw = self.analyzer.analyze(&bundle).await.at(Stage::Analyze)?;
        let analysis = parse_analysis(&raw).at(Stage::Parse)?;

        let report = NewReport::assemble(region, period, analysis, Utc::now());
        match self.store.save(report).await {
            Ok(saved) => Ok(Some(saved)),
            Err(ReportError::AlreadyExists { .. }) => {
                warn!(
                    region = %region.name,
                    period_start = %period.start,
                    "Report was stored concurrently, skipping"
                );
                Ok(None)
            }
            Err(error) => Err(StepFailure { stage: Stage::Persist, error }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
