//! Weekly trigger.
//!
//! Fires a pass at 00:00 local time on the anchor weekday, in the configured
//! fixed UTC offset. On startup a catch-up pass runs first so a missed week
//! is filled without waiting for the next anchor day.

use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc, Weekday};
use tracing::{error, info, warn};

use super::Orchestrator;
use crate::types::{PassSummary, Period, ReportError, PERIOD_DAYS};

/// The first anchor-day midnight strictly after `now`.
pub fn next_run_after(now: DateTime<Utc>, anchor: Weekday, offset: FixedOffset) -> DateTime<Utc> {
    let local_today = now.with_timezone(&offset).date_naive();
    let current = Period::containing(local_today, anchor);
    // The current period's start midnight is never after `now`.
    let next_local = (current.start + Duration::days(PERIOD_DAYS)).and_time(chrono::NaiveTime::MIN);
    let next_utc = next_local - Duration::seconds(i64::from(offset.local_minus_utc()));
    Utc.from_utc_datetime(&next_utc)
}

pub struct Scheduler {
    orchestrator: Arc<Orchestrator>,
}

impl Scheduler {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Run one pass for the current period at startup.
    ///
    /// Regions that already have a report are skipped by the pass itself,
    /// so this always runs and fills in whatever is missing. The count of
    /// existing reports is informational only.
    pub async fn startup_catch_up(&self) -> Result<PassSummary, ReportError> {
        let period = self.orchestrator.current_period();

        match self.orchestrator.store().find_by_period(period.start).await {
            Ok(existing) => info!(
                period_start = %period.start,
                existing = existing.len(),
                regions = self.orchestrator.registry().len(),
                "Running startup catch-up"
            ),
            Err(e) => warn!(
                period_start = %period.start,
                error = %e,
                "Could not count existing reports, running startup catch-up anyway"
            ),
        }

        self.orchestrator.run_pass().await
    }

    /// Sleep until each anchor-day midnight and run a pass. Never returns;
    /// callers stop it by dropping the future.
    pub async fn run(&self) {
        let anchor = self.orchestrator.anchor();
        let offset = self.orchestrator.offset();

        loop {
            let now = Utc::now();
            let next = next_run_after(now, anchor, offset);
            let wait = (next - now).to_std().unwrap_or_default();

            info!(
                next_run = %next.with_timezone(&offset),
                wait_secs = wait.as_secs(),
                "Next scheduled pass"
            );

            tokio::time::sleep(wait).await;

            match self.orchestrator.run_pass().await {
                Ok(summary) => info!(summary = %summary, "Scheduled pass finished"),
                Err(e) => error!(error = %e, "Scheduled pass failed"),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
