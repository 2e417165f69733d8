use chrono::NaiveDate;
use itertools::Itertools;
use rusqlite::{params, Connection};
use serde::Serialize;
use tracing::info;

/// Currency the salary aggregates are computed in; other currencies are left out.
pub const METRIC_CURRENCY: &str = "PLN";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyMetric {
    pub metric_date: NaiveDate,
    pub total_jobs: usize,
    pub remote_jobs: usize,
    pub office_jobs: usize,
    pub hybrid_jobs: usize,
    pub jobs_with_salary: usize,
    pub new_jobs: usize,
    pub avg_salary: Option<f64>,
    pub median_salary: Option<f64>,
}

pub fn median(values: &[f64]) -> Option<f64> {
    let sorted = values.iter().copied().sorted_by(f64::total_cmp).collect_vec();
    let n = sorted.len();
    match n {
        0 => None,
        _ if n % 2 == 1 => Some(sorted[n / 2]),
        _ => Some((sorted[n / 2 - 1] + sorted[n / 2]) / 2.0),
    }
}

/// Aggregate the snapshot, salary and posting rows of one date.
pub fn compute_daily_metric(conn: &Connection, date: NaiveDate) -> rusqlite::Result<DailyMetric> {
    let (total_jobs, remote_jobs, office_jobs, hybrid_jobs): (usize, usize, usize, usize) =
        conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(location_type = 'remote'), 0),
                    COALESCE(SUM(location_type = 'office'), 0),
                    COALESCE(SUM(location_type = 'hybrid'), 0)
             FROM job_snapshots WHERE snapshot_date = ?1",
            params![date],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )?;

    let jobs_with_salary: usize = conn.query_row(
        "SELECT COUNT(*) FROM salaries WHERE snapshot_date = ?1",
        params![date],
        |r| r.get(0),
    )?;

    let new_jobs: usize = conn.query_row(
        "SELECT COUNT(*) FROM job_postings WHERE first_seen_date = ?1",
        params![date],
        |r| r.get(0),
    )?;

    let mut stmt = conn.prepare(
        "SELECT salary_avg FROM salaries
         WHERE snapshot_date = ?1 AND currency = ?2 AND salary_avg IS NOT NULL",
    )?;
    let salaries: Vec<f64> = stmt
        .query_map(params![date, METRIC_CURRENCY], |r| r.get(0))?
        .collect::<Result<_, _>>()?;

    let avg_salary = if salaries.is_empty() {
        None
    } else {
        Some(salaries.iter().sum::<f64>() / salaries.len() as f64)
    };

    Ok(DailyMetric {
        metric_date: date,
        total_jobs,
        remote_jobs,
        office_jobs,
        hybrid_jobs,
        jobs_with_salary,
        new_jobs,
        avg_salary,
        median_salary: median(&salaries),
    })
}

/// Replace the stored metric for `date` with a fresh aggregate.
pub fn recompute_daily_metric(conn: &Connection, date: NaiveDate) -> rusqlite::Result<DailyMetric> {
    let tx = conn.unchecked_transaction()?;
    let m = compute_daily_metric(&tx, date)?;
    tx.execute("DELETE FROM daily_metrics WHERE metric_date = ?1", params![date])?;
    tx.execute(
        "INSERT INTO daily_metrics
         (metric_date, total_jobs, remote_jobs, office_jobs, hybrid_jobs,
          jobs_with_salary, new_jobs, avg_salary, median_salary)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            m.metric_date, m.total_jobs, m.remote_jobs, m.office_jobs, m.hybrid_jobs,
            m.jobs_with_salary, m.new_jobs, m.avg_salary, m.median_salary,
        ],
    )?;
    tx.commit()?;

    info!(date = %date, total = m.total_jobs, "Recomputed daily metrics");
    Ok(m)
}

#[cfg(test)]
pub fn fetch_daily_metric(conn: &Connection, date: NaiveDate) -> rusqlite::Result<DailyMetric> {
    conn.query_row(
        "SELECT metric_date, total_jobs, remote_jobs, office_jobs, hybrid_jobs,
                jobs_with_salary, new_jobs, avg_salary, median_salary
         FROM daily_metrics WHERE metric_date = ?1",
        params![date],
        row_to_metric,
    )
}

pub fn row_to_metric(r: &rusqlite::Row) -> rusqlite::Result<DailyMetric> {
    Ok(DailyMetric {
        metric_date: r.get(0)?,
        total_jobs: r.get(1)?,
        remote_jobs: r.get(2)?,
        office_jobs: r.get(3)?,
        hybrid_jobs: r.get(4)?,
        jobs_with_salary: r.get(5)?,
        new_jobs: r.get(6)?,
        avg_salary: r.get(7)?,
        median_salary: r.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::etl::load::load_job;
    use crate::etl::normalize::{Currency, Location, LocationType, Salary, SalaryPeriod, Seniority};
    use crate::etl::transform::CanonicalJob;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, d).unwrap()
    }

    fn job(id: &str, date: NaiveDate, kind: LocationType, pay: Option<(f64, Currency)>) -> CanonicalJob {
        CanonicalJob {
            job_id: id.to_string(),
            title: "Dev".to_string(),
            company_name: "Acme".to_string(),
            url: format!("https://nofluffjobs.com/pl/job/{}", id),
            snapshot_date: date,
            description: None,
            requirements: None,
            location: Location {
                location_type: Some(kind),
                ..Location::unknown()
            },
            seniority: Seniority::Mid,
            employment_type: None,
            salary: pay.map(|(avg, currency)| Salary {
                min: avg,
                max: avg,
                avg,
                currency,
                period: SalaryPeriod::Monthly,
                is_b2b: false,
            }),
            technologies: vec![],
        }
    }

    #[test]
    fn median_of_odd_even_and_empty() {
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
    }

    #[test]
    fn metric_matches_the_days_rows() {
        let conn = db::test_connection();
        load_job(&conn, &job("old", day(1), LocationType::Office, None)).unwrap();
        for j in [
            job("old", day(2), LocationType::Office, Some((10_000.0, Currency::Pln))),
            job("a", day(2), LocationType::Remote, Some((20_000.0, Currency::Pln))),
            job("b", day(2), LocationType::Remote, Some((30_000.0, Currency::Pln))),
            job("c", day(2), LocationType::Hybrid, Some((5_000.0, Currency::Eur))),
            job("d", day(2), LocationType::Hybrid, None),
        ] {
            load_job(&conn, &j).unwrap();
        }

        let m = recompute_daily_metric(&conn, day(2)).unwrap();
        assert_eq!(m.total_jobs, 5);
        assert_eq!((m.remote_jobs, m.office_jobs, m.hybrid_jobs), (2, 1, 2));
        assert_eq!(m.jobs_with_salary, 4);
        assert_eq!(m.new_jobs, 4);
        assert_eq!(m.avg_salary, Some(20_000.0));
        assert_eq!(m.median_salary, Some(20_000.0));
        assert_eq!(fetch_daily_metric(&conn, day(2)).unwrap(), m);
    }

    #[test]
    fn recompute_is_idempotent() {
        let conn = db::test_connection();
        load_job(&conn, &job("a", day(3), LocationType::Remote, Some((9_000.0, Currency::Pln)))).unwrap();

        let first = recompute_daily_metric(&conn, day(3)).unwrap();
        let second = recompute_daily_metric(&conn, day(3)).unwrap();
        assert_eq!(first, second);
        let rows: usize = conn
            .query_row("SELECT COUNT(*) FROM daily_metrics", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn empty_day_has_zero_counts() {
        let conn = db::test_connection();
        let m = recompute_daily_metric(&conn, day(9)).unwrap();
        assert_eq!(m.total_jobs, 0);
        assert_eq!(m.avg_salary, None);
    }
}
