//! The ETL pipeline: raw batch → validated → canonical → stored, then expiry, daily
//! metrics, retention and the run log.

pub mod extract;
pub mod load;
pub mod metrics;
pub mod normalize;
pub mod tech;
pub mod transform;

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::batch::RawJob;
use crate::config::EtlSettings;
use crate::db::{self, ScrapeRunRow};
use crate::error::LoadError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    Success,
    Partial,
    Failure,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Failure => "failure",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// None when the run log itself could not be written.
    pub run_id: Option<i64>,
    pub snapshot_date: NaiveDate,
    pub jobs_found: usize,
    pub jobs_new: usize,
    pub jobs_updated: usize,
    pub jobs_unchanged: usize,
    pub jobs_expired: usize,
    pub jobs_malformed: usize,
    pub jobs_duplicate: usize,
    pub jobs_failed: usize,
    pub technologies_new: usize,
    pub snapshots_pruned: usize,
    pub status: RunStatus,
    pub error_message: Option<String>,
    pub duration: Duration,
}

fn run_status(fatal: bool, loaded: usize, malformed: usize, duplicate: usize, failed: usize) -> RunStatus {
    if fatal || (loaded == 0 && failed > 0) {
        RunStatus::Failure
    } else if malformed > 0 || duplicate > 0 || failed > 0 {
        RunStatus::Partial
    } else {
        RunStatus::Success
    }
}

/// Process one batch for `snapshot_date` to completion and record the run.
pub fn run(
    conn: &Connection,
    raw: &[RawJob],
    snapshot_date: NaiveDate,
    settings: &EtlSettings,
) -> Result<RunSummary> {
    let started = Instant::now();
    info!(records = raw.len(), %snapshot_date, "Starting ETL run");

    let extraction = extract::extract_batch(raw);
    let (canonical, rejected) = transform::transform_batch(&extraction.jobs, snapshot_date);
    for (job_id, e) in &rejected {
        warn!(%job_id, error = %e, "Dropping record that failed to normalize");
    }

    let mut summary = RunSummary {
        run_id: None,
        snapshot_date,
        jobs_found: raw.len(),
        jobs_new: 0,
        jobs_updated: 0,
        jobs_unchanged: 0,
        jobs_expired: 0,
        jobs_malformed: extraction.malformed + rejected.len(),
        jobs_duplicate: extraction.duplicates,
        jobs_failed: 0,
        technologies_new: 0,
        snapshots_pruned: 0,
        status: RunStatus::Success,
        error_message: None,
        duration: Duration::ZERO,
    };

    let outcome = (|| -> Result<(), LoadError> {
        let load::LoadOutcome { stats, fatal } = load::load_batch(conn, &canonical);
        summary.jobs_new = stats.jobs_new;
        summary.jobs_updated = stats.jobs_updated;
        summary.jobs_unchanged = stats.jobs_unchanged;
        summary.jobs_failed = stats.jobs_failed;
        summary.technologies_new = stats.technologies_new;
        if let Some(e) = fatal {
            return Err(e);
        }

        summary.jobs_expired = load::deactivate_missing(
            conn,
            &extraction.seen_ids,
            snapshot_date,
            settings.grace_period_days,
        )?;
        metrics::recompute_daily_metric(conn, snapshot_date)?;
        summary.snapshots_pruned =
            load::prune_snapshots(conn, snapshot_date, settings.snapshot_retention_days)?;
        Ok(())
    })();

    let fatal = match outcome {
        Ok(()) => false,
        Err(e) => {
            error!(error = %e, "ETL run failed");
            summary.error_message = Some(e.to_string());
            true
        }
    };

    let loaded = summary.jobs_new + summary.jobs_updated + summary.jobs_unchanged;
    summary.status = run_status(
        fatal,
        loaded,
        summary.jobs_malformed,
        summary.jobs_duplicate,
        summary.jobs_failed,
    );
    if summary.status == RunStatus::Failure && summary.error_message.is_none() {
        summary.error_message = Some(format!("All {} records failed to load", summary.jobs_failed));
    }
    summary.duration = started.elapsed();

    let row = ScrapeRunRow {
        snapshot_date,
        jobs_found: summary.jobs_found,
        jobs_new: summary.jobs_new,
        jobs_updated: summary.jobs_updated,
        jobs_expired: summary.jobs_expired,
        jobs_malformed: summary.jobs_malformed,
        jobs_duplicate: summary.jobs_duplicate,
        jobs_failed: summary.jobs_failed,
        status: summary.status.as_str(),
        error_message: summary.error_message.clone(),
        duration_seconds: summary.duration.as_secs_f64(),
    };
    match db::insert_scrape_run(conn, &row) {
        Ok(id) => summary.run_id = Some(id),
        // A dead store cannot log its own failure; the summary still reports it.
        Err(e) if fatal => error!(error = %e, "Could not record failed run"),
        Err(e) => return Err(e).context("Failed to record scrape run"),
    }

    info!(
        status = summary.status.as_str(),
        new = summary.jobs_new,
        updated = summary.jobs_updated,
        expired = summary.jobs_expired,
        malformed = summary.jobs_malformed,
        duplicate = summary.jobs_duplicate,
        failed = summary.jobs_failed,
        "ETL run finished in {:.1}s",
        summary.duration.as_secs_f64()
    );
    Ok(summary)
}
