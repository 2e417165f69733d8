//! Writes canonical records into the store. Each record is its own transaction, so a
//! failure rolls back that record alone.

use std::collections::HashSet;

use chrono::{Days, NaiveDate};
use rusqlite::Connection;
use tracing::{debug, error, info, warn};

use crate::db::{self, SalaryRow, SnapshotRow};
use crate::error::LoadError;
use crate::etl::transform::CanonicalJob;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostingChange {
    New,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobLoad {
    pub posting: PostingChange,
    pub technologies_new: usize,
    pub links_written: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadStats {
    pub jobs_new: usize,
    pub jobs_updated: usize,
    /// Records whose snapshot for the date was already stored.
    pub jobs_unchanged: usize,
    pub jobs_failed: usize,
    pub technologies_new: usize,
    pub links_written: usize,
}

/// Counts for the records handled so far, plus the error that stopped the batch, if any.
#[derive(Debug)]
pub struct LoadOutcome {
    pub stats: LoadStats,
    pub fatal: Option<LoadError>,
}

pub fn load_job(conn: &Connection, job: &CanonicalJob) -> Result<JobLoad, LoadError> {
    let tx = conn.unchecked_transaction()?;
    let date = job.snapshot_date;

    let posting = if db::posting_exists(&tx, &job.job_id)? {
        db::touch_posting(&tx, &job.job_id, date)?;
        PostingChange::Updated
    } else {
        db::insert_posting(&tx, &job.job_id, &job.title, &job.company_name, &job.url, date)?;
        PostingChange::New
    };

    let snapshot = SnapshotRow {
        job_id: &job.job_id,
        snapshot_date: date,
        description: job.description.as_deref(),
        requirements: job.requirements.as_deref(),
        location_type: job.location.location_type.map(|t| t.as_str()),
        city: job.location.city.as_deref(),
        region: job.location.region.as_deref(),
        country: job.location.country,
        seniority_level: job.seniority.as_str(),
        employment_type: job.employment_type.as_deref(),
    };
    if let Err(e) = db::insert_snapshot(&tx, &snapshot) {
        // Dropping the transaction rolls back the posting touch as well.
        return Err(if db::is_unique_violation(&e) {
            LoadError::DuplicateSnapshot {
                job_id: job.job_id.clone(),
                date,
            }
        } else {
            e.into()
        });
    }

    if let Some(salary) = &job.salary {
        db::insert_salary(
            &tx,
            &SalaryRow {
                job_id: &job.job_id,
                snapshot_date: date,
                currency: salary.currency.as_str(),
                salary_min: salary.min,
                salary_max: salary.max,
                salary_avg: salary.avg,
                period: salary.period.as_str(),
                is_b2b: salary.is_b2b,
            },
        )?;
    }

    let mut technologies_new = 0;
    let mut links_written = 0;
    for tech in &job.technologies {
        let (tech_id, created) = db::upsert_technology(&tx, &tech.name, tech.category.as_str())?;
        if created {
            technologies_new += 1;
        }
        links_written += db::link_technology(&tx, &job.job_id, tech_id, date)?;
    }

    tx.commit()?;
    Ok(JobLoad {
        posting,
        technologies_new,
        links_written,
    })
}

/// Load every record. Per-record failures are logged and counted. A storage failure
/// that makes the store unusable stops the batch; the failing record and every record
/// after it are counted as failed, and records committed before it keep their counts.
pub fn load_batch(conn: &Connection, jobs: &[CanonicalJob]) -> LoadOutcome {
    let mut stats = LoadStats::default();

    for (i, job) in jobs.iter().enumerate() {
        match load_job(conn, job) {
            Ok(load) => {
                match load.posting {
                    PostingChange::New => stats.jobs_new += 1,
                    PostingChange::Updated => stats.jobs_updated += 1,
                }
                stats.technologies_new += load.technologies_new;
                stats.links_written += load.links_written;
            }
            Err(LoadError::DuplicateSnapshot { job_id, date }) => {
                debug!(%job_id, %date, "Snapshot already loaded, skipping");
                stats.jobs_unchanged += 1;
            }
            Err(e) if e.is_fatal() => {
                let not_loaded = jobs.len() - i;
                error!(
                    job_id = %job.job_id,
                    error = %e,
                    not_loaded,
                    "Store unavailable, aborting load"
                );
                stats.jobs_failed += not_loaded;
                return LoadOutcome {
                    stats,
                    fatal: Some(e),
                };
            }
            Err(e) => {
                warn!(job_id = %job.job_id, error = %e, "Failed to load record");
                stats.jobs_failed += 1;
            }
        }
    }

    info!(
        new = stats.jobs_new,
        updated = stats.jobs_updated,
        unchanged = stats.jobs_unchanged,
        failed = stats.jobs_failed,
        technologies_new = stats.technologies_new,
        links = stats.links_written,
        "Loaded batch"
    );
    LoadOutcome { stats, fatal: None }
}

/// Deactivate active postings missing from this run and unseen for longer than the
/// grace period. A run that saw nothing deactivates nothing.
pub fn deactivate_missing(
    conn: &Connection,
    seen: &HashSet<String>,
    snapshot_date: NaiveDate,
    grace_period_days: u32,
) -> Result<usize, LoadError> {
    if seen.is_empty() {
        warn!("Run saw no postings, skipping deactivation");
        return Ok(0);
    }
    let Some(cutoff) = snapshot_date.checked_sub_days(Days::new(grace_period_days.into())) else {
        return Ok(0);
    };

    let tx = conn.unchecked_transaction()?;
    let mut expired = 0;
    for job_id in db::active_last_seen_before(&tx, cutoff)? {
        if !seen.contains(&job_id) {
            expired += db::deactivate_posting(&tx, &job_id)?;
        }
    }
    tx.commit()?;

    if expired > 0 {
        info!(expired, %cutoff, "Marked postings inactive");
    }
    Ok(expired)
}

/// Drop snapshot-level rows older than `retention_days`. Zero keeps everything.
pub fn prune_snapshots(
    conn: &Connection,
    today: NaiveDate,
    retention_days: u32,
) -> Result<usize, LoadError> {
    if retention_days == 0 {
        return Ok(0);
    }
    let Some(cutoff) = today.checked_sub_days(Days::new(retention_days.into())) else {
        return Ok(0);
    };
    let pruned = db::delete_snapshots_before(conn, cutoff)?;
    if pruned > 0 {
        info!(pruned, %cutoff, "Pruned old snapshot rows");
    }
    Ok(pruned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::RawJob;
    use crate::etl::extract::extract_job;
    use crate::etl::transform::transform;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn canonical(id: &str, date: NaiveDate) -> CanonicalJob {
        let raw = RawJob {
            job_id: id.to_string(),
            title: "Python Developer".to_string(),
            company_name: "Acme".to_string(),
            url: format!("https://nofluffjobs.com/pl/job/{}", id),
            salary: Some("10 000 - 14 000 PLN".to_string()),
            location: Some("Kraków".to_string()),
            technologies: vec!["Python".into(), "Docker".into()],
            ..Default::default()
        };
        transform(&extract_job(&raw).unwrap(), date).unwrap()
    }

    fn count(conn: &Connection, table: &str) -> usize {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
            .unwrap()
    }

    fn counts(conn: &Connection) -> Vec<usize> {
        ["job_postings", "job_snapshots", "salaries", "technologies", "job_technologies"]
            .iter()
            .map(|t| count(conn, t))
            .collect()
    }

    #[test]
    fn loads_all_tables() {
        let conn = db::test_connection();
        let load = load_job(&conn, &canonical("a", day(1))).unwrap();
        assert_eq!(load.posting, PostingChange::New);
        assert_eq!(load.technologies_new, 2);
        assert_eq!(load.links_written, 2);
        assert_eq!(counts(&conn), vec![1, 1, 1, 2, 2]);
    }

    #[test]
    fn loading_twice_for_one_date_is_idempotent() {
        let conn = db::test_connection();
        let job = canonical("a", day(1));
        assert!(load_batch(&conn, &[job.clone()]).fatal.is_none());
        let before = counts(&conn);

        let stats = load_batch(&conn, &[job.clone()]).stats;
        assert_eq!(stats.jobs_unchanged, 1);
        assert_eq!(stats.jobs_new + stats.jobs_updated + stats.jobs_failed, 0);
        assert_eq!(counts(&conn), before);

        assert!(matches!(
            load_job(&conn, &job),
            Err(LoadError::DuplicateSnapshot { .. })
        ));
    }

    #[test]
    fn next_day_updates_posting_and_adds_snapshot() {
        let conn = db::test_connection();
        load_job(&conn, &canonical("a", day(1))).unwrap();
        let load = load_job(&conn, &canonical("a", day(2))).unwrap();
        assert_eq!(load.posting, PostingChange::Updated);
        assert_eq!(load.technologies_new, 0);
        assert_eq!(counts(&conn), vec![1, 2, 2, 2, 4]);

        let p = db::fetch_posting(&conn, "a").unwrap().unwrap();
        assert_eq!(p.first_seen_date, day(1));
        assert_eq!(p.last_seen_date, day(2));
    }

    #[test]
    fn posting_without_salary_has_no_salary_row() {
        let conn = db::test_connection();
        let mut job = canonical("a", day(1));
        job.salary = None;
        load_job(&conn, &job).unwrap();
        assert_eq!(count(&conn, "salaries"), 0);
    }

    #[test]
    fn per_record_failure_is_counted_not_fatal() {
        let conn = db::test_connection();
        conn.execute_batch(
            "CREATE TRIGGER reject_b BEFORE INSERT ON job_snapshots
             WHEN NEW.job_id = 'b' BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
        )
        .unwrap();

        let outcome = load_batch(&conn, &[canonical("a", day(1)), canonical("b", day(1))]);
        assert!(outcome.fatal.is_none());
        let stats = outcome.stats;
        assert_eq!(stats.jobs_new, 1);
        assert_eq!(stats.jobs_failed, 1);
        // The failed record's posting insert was rolled back with it.
        assert!(!db::posting_exists(&conn, "b").unwrap());
    }

    /// Caps the store at its current size, so the next record needing a new page fails
    /// with SQLITE_FULL.
    fn fill_store(conn: &Connection) {
        let pages: i64 = conn.query_row("PRAGMA page_count", [], |r| r.get(0)).unwrap();
        let _: i64 = conn
            .pragma_update_and_check(None, "max_page_count", pages, |r| r.get(0))
            .unwrap();
    }

    #[test]
    fn full_store_stops_batch_but_keeps_committed_counts() {
        let conn = db::test_connection();
        fill_store(&conn);

        let mut big = canonical("b", day(1));
        big.description = Some("x".repeat(20_000));
        let batch = [canonical("a", day(1)), big, canonical("c", day(1))];

        let outcome = load_batch(&conn, &batch);
        assert!(matches!(outcome.fatal, Some(LoadError::StorageUnavailable(_))));
        assert_eq!(outcome.stats.jobs_new, 1);
        assert_eq!(outcome.stats.jobs_failed, 2);
        assert!(db::posting_exists(&conn, "a").unwrap());
        assert!(!db::posting_exists(&conn, "b").unwrap());
    }

    #[test]
    fn absent_posting_expires_once_after_grace_period() {
        let conn = db::test_connection();
        load_job(&conn, &canonical("a", day(1))).unwrap();
        let seen: HashSet<String> = ["b".to_string()].into();

        assert_eq!(deactivate_missing(&conn, &seen, day(4), 3).unwrap(), 0);
        assert_eq!(deactivate_missing(&conn, &seen, day(5), 3).unwrap(), 1);
        assert_eq!(deactivate_missing(&conn, &seen, day(6), 3).unwrap(), 0);
        assert!(!db::fetch_posting(&conn, "a").unwrap().unwrap().is_active);

        // Only a new sighting brings it back.
        load_job(&conn, &canonical("a", day(7))).unwrap();
        assert!(db::fetch_posting(&conn, "a").unwrap().unwrap().is_active);
    }

    #[test]
    fn seen_postings_and_empty_runs_are_never_expired() {
        let conn = db::test_connection();
        load_job(&conn, &canonical("a", day(1))).unwrap();

        let seen: HashSet<String> = ["a".to_string()].into();
        assert_eq!(deactivate_missing(&conn, &seen, day(20), 3).unwrap(), 0);
        assert_eq!(deactivate_missing(&conn, &HashSet::new(), day(20), 3).unwrap(), 0);
        assert!(db::fetch_posting(&conn, "a").unwrap().unwrap().is_active);
    }

    #[test]
    fn retention_prunes_old_snapshots_only() {
        let conn = db::test_connection();
        load_job(&conn, &canonical("a", day(1))).unwrap();
        load_job(&conn, &canonical("a", day(10))).unwrap();

        assert_eq!(prune_snapshots(&conn, day(12), 0).unwrap(), 0);
        // One snapshot, its salary and its two technology links.
        assert_eq!(prune_snapshots(&conn, day(12), 5).unwrap(), 4);
        assert_eq!(counts(&conn), vec![1, 1, 1, 2, 2]);
    }
}
