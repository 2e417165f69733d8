//! Read-only queries behind the dashboard. Salary figures are PLN only and every
//! count is restricted to active postings.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use itertools::Itertools;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::Serialize;

use crate::etl::metrics::{median, row_to_metric, DailyMetric, METRIC_CURRENCY};

/// Technologies need at least this many postings to appear in salary rankings.
pub const MIN_JOBS_FOR_SALARY: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Kpis {
    pub active_jobs: usize,
    pub avg_salary: Option<f64>,
    /// Percentage of the latest snapshot's active postings that are remote.
    pub remote_share: Option<f64>,
    pub top_technology: Option<String>,
    pub latest_snapshot: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TechDemand {
    pub name: String,
    pub category: String,
    pub job_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TechSalary {
    pub name: String,
    pub category: String,
    pub job_count: usize,
    pub avg_salary: f64,
    pub min_salary: f64,
    pub max_salary: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationCount {
    pub location_type: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub job_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    pub name: String,
    pub date: NaiveDate,
    pub job_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SenioritySalary {
    pub seniority: String,
    pub job_count: usize,
    pub avg_salary: f64,
    pub median_salary: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LastRun {
    pub run_date: String,
    pub snapshot_date: NaiveDate,
    pub jobs_found: usize,
    pub jobs_new: usize,
    pub jobs_expired: usize,
    pub status: String,
    pub duration_seconds: f64,
}

pub fn latest_snapshot_date(conn: &Connection) -> rusqlite::Result<Option<NaiveDate>> {
    conn.query_row("SELECT MAX(snapshot_date) FROM job_snapshots", [], |r| r.get(0))
}

pub fn kpis(conn: &Connection) -> rusqlite::Result<Kpis> {
    let active_jobs = conn.query_row(
        "SELECT COUNT(*) FROM job_postings WHERE is_active = 1",
        [],
        |r| r.get(0),
    )?;
    let latest_snapshot = latest_snapshot_date(conn)?;

    let avg_salary = conn.query_row(
        "SELECT AVG(s.salary_avg)
         FROM salaries s JOIN job_postings jp ON s.job_id = jp.job_id
         WHERE jp.is_active = 1 AND s.currency = ?1
           AND s.snapshot_date = (SELECT MAX(snapshot_date) FROM salaries)",
        params![METRIC_CURRENCY],
        |r| r.get(0),
    )?;

    let remote_share = conn.query_row(
        "SELECT SUM(js.location_type = 'remote') * 100.0 / COUNT(*)
         FROM job_snapshots js JOIN job_postings jp ON js.job_id = jp.job_id
         WHERE jp.is_active = 1 AND js.snapshot_date = ?1",
        params![latest_snapshot],
        |r| r.get(0),
    )?;

    let top_technology = conn
        .query_row(
            "SELECT t.name
             FROM technologies t
             JOIN job_technologies jt ON t.id = jt.technology_id
             JOIN job_postings jp ON jt.job_id = jp.job_id
             WHERE jp.is_active = 1 AND jt.snapshot_date = ?1
             GROUP BY t.id
             ORDER BY COUNT(*) DESC, t.name
             LIMIT 1",
            params![latest_snapshot],
            |r| r.get(0),
        )
        .optional()?;

    Ok(Kpis {
        active_jobs,
        avg_salary,
        remote_share,
        top_technology,
        latest_snapshot,
    })
}

pub fn daily_metrics(conn: &Connection, since: NaiveDate) -> rusqlite::Result<Vec<DailyMetric>> {
    let mut stmt = conn.prepare(
        "SELECT metric_date, total_jobs, remote_jobs, office_jobs, hybrid_jobs,
                jobs_with_salary, new_jobs, avg_salary, median_salary
         FROM daily_metrics WHERE metric_date >= ?1
         ORDER BY metric_date",
    )?;
    let rows = stmt
        .query_map(params![since], row_to_metric)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Active postings per technology, counted over snapshots since `since`.
pub fn technology_demand(
    conn: &Connection,
    since: NaiveDate,
    top: usize,
) -> rusqlite::Result<Vec<TechDemand>> {
    let mut stmt = conn.prepare(
        "SELECT t.name, t.category, COUNT(DISTINCT jt.job_id) AS job_count
         FROM technologies t
         JOIN job_technologies jt ON t.id = jt.technology_id
         JOIN job_postings jp ON jt.job_id = jp.job_id
         WHERE jp.is_active = 1 AND jt.snapshot_date >= ?1
         GROUP BY t.id
         ORDER BY job_count DESC, t.name
         LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![since, top], |r| {
            Ok(TechDemand {
                name: r.get(0)?,
                category: r.get(1)?,
                job_count: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn salary_by_technology(conn: &Connection, top: usize) -> rusqlite::Result<Vec<TechSalary>> {
    let mut stmt = conn.prepare(
        "SELECT t.name, t.category, COUNT(DISTINCT jt.job_id) AS job_count,
                AVG(s.salary_avg), MIN(s.salary_min), MAX(s.salary_max)
         FROM technologies t
         JOIN job_technologies jt ON t.id = jt.technology_id
         JOIN salaries s ON jt.job_id = s.job_id AND jt.snapshot_date = s.snapshot_date
         JOIN job_postings jp ON jt.job_id = jp.job_id
         WHERE jp.is_active = 1 AND s.currency = ?1
         GROUP BY t.id
         HAVING job_count >= ?2
         ORDER BY job_count DESC, t.name
         LIMIT ?3",
    )?;
    let rows = stmt
        .query_map(params![METRIC_CURRENCY, MIN_JOBS_FOR_SALARY, top], |r| {
            Ok(TechSalary {
                name: r.get(0)?,
                category: r.get(1)?,
                job_count: r.get(2)?,
                avg_salary: r.get(3)?,
                min_salary: r.get(4)?,
                max_salary: r.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Active postings by place on one snapshot date.
pub fn location_distribution(
    conn: &Connection,
    date: NaiveDate,
) -> rusqlite::Result<Vec<LocationCount>> {
    let mut stmt = conn.prepare(
        "SELECT js.location_type, js.city, js.region, COUNT(DISTINCT js.job_id) AS job_count
         FROM job_snapshots js JOIN job_postings jp ON js.job_id = jp.job_id
         WHERE jp.is_active = 1 AND js.snapshot_date = ?1
         GROUP BY js.location_type, js.city, js.region
         ORDER BY job_count DESC, js.city",
    )?;
    let rows = stmt
        .query_map(params![date], |r| {
            Ok(LocationCount {
                location_type: r.get(0)?,
                city: r.get(1)?,
                region: r.get(2)?,
                job_count: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Daily active-posting counts for the named technologies since `since`.
pub fn technology_trends(
    conn: &Connection,
    names: &[String],
    since: NaiveDate,
) -> rusqlite::Result<Vec<TrendPoint>> {
    if names.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = std::iter::repeat_n("?", names.len()).join(",");
    let sql = format!(
        "SELECT t.name, jt.snapshot_date, COUNT(DISTINCT jt.job_id)
         FROM technologies t
         JOIN job_technologies jt ON t.id = jt.technology_id
         JOIN job_postings jp ON jt.job_id = jp.job_id
         WHERE jp.is_active = 1 AND t.name IN ({}) AND jt.snapshot_date >= ?
         GROUP BY t.id, jt.snapshot_date
         ORDER BY jt.snapshot_date, t.name",
        placeholders
    );

    let mut values: Vec<Value> = names.iter().map(|n| Value::Text(n.clone())).collect();
    values.push(Value::Text(since.format("%Y-%m-%d").to_string()));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(values), |r| {
            Ok(TrendPoint {
                name: r.get(0)?,
                date: r.get(1)?,
                job_count: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Mean and median PLN salary per seniority level, over snapshots since `since`.
pub fn salary_by_seniority(
    conn: &Connection,
    since: NaiveDate,
) -> rusqlite::Result<Vec<SenioritySalary>> {
    let mut stmt = conn.prepare(
        "SELECT js.seniority_level, s.salary_avg
         FROM salaries s
         JOIN job_snapshots js ON s.job_id = js.job_id AND s.snapshot_date = js.snapshot_date
         JOIN job_postings jp ON s.job_id = jp.job_id
         WHERE jp.is_active = 1 AND s.currency = ?1 AND s.snapshot_date >= ?2
           AND js.seniority_level IS NOT NULL AND s.salary_avg IS NOT NULL",
    )?;
    let mut groups: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    let rows = stmt.query_map(params![METRIC_CURRENCY, since], |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?))
    })?;
    for row in rows {
        let (level, salary) = row?;
        groups.entry(level).or_default().push(salary);
    }

    Ok(groups
        .into_iter()
        .filter_map(|(seniority, salaries)| {
            let median_salary = median(&salaries)?;
            Some(SenioritySalary {
                job_count: salaries.len(),
                avg_salary: salaries.iter().sum::<f64>() / salaries.len() as f64,
                median_salary,
                seniority,
            })
        })
        .collect())
}

pub fn last_scrape_run(conn: &Connection) -> rusqlite::Result<Option<LastRun>> {
    conn.query_row(
        "SELECT run_date, snapshot_date, jobs_found, jobs_new, jobs_expired, status,
                duration_seconds
         FROM scrape_runs ORDER BY id DESC LIMIT 1",
        [],
        |r| {
            Ok(LastRun {
                run_date: r.get(0)?,
                snapshot_date: r.get(1)?,
                jobs_found: r.get(2)?,
                jobs_new: r.get(3)?,
                jobs_expired: r.get(4)?,
                status: r.get(5)?,
                duration_seconds: r.get(6)?,
            })
        },
    )
    .optional()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::RawJob;
    use crate::config::EtlSettings;
    use crate::db;
    use crate::etl;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    fn raw(id: &str, salary: &str, location: &str, techs: &[&str]) -> RawJob {
        RawJob {
            job_id: id.to_string(),
            title: format!("Developer {}", id),
            company_name: "Acme".to_string(),
            url: format!("https://nofluffjobs.com/pl/job/{}", id),
            salary: Some(salary.to_string()),
            location: Some(location.to_string()),
            technologies: techs.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Two daily runs: "c" disappears after day 1, "d" is new on day 2.
    fn seeded() -> Connection {
        let conn = db::test_connection();
        let settings = EtlSettings::default();
        let day1 = vec![
            raw("a", "10 000 - 14 000 PLN", "Warszawa", &["Python", "Docker"]),
            raw("b", "20 000 PLN", "Zdalnie", &["Python", "AWS"]),
            raw("c", "5 000 EUR", "Kraków", &["Java"]),
        ];
        let day2 = vec![
            raw("a", "10 000 - 14 000 PLN", "Warszawa", &["Python", "Docker"]),
            raw("b", "20 000 PLN", "Zdalnie", &["Python", "AWS"]),
            raw("d", "16 000 PLN", "Warszawa / Zdalnie", &["Python", "Docker"]),
        ];
        etl::run(&conn, &day1, day(1), &settings).unwrap();
        etl::run(&conn, &day2, day(2), &settings).unwrap();
        conn
    }

    #[test]
    fn kpis_use_latest_snapshot() {
        let conn = seeded();
        let k = kpis(&conn).unwrap();
        assert_eq!(k.active_jobs, 4);
        assert_eq!(k.latest_snapshot, Some(day(2)));
        assert_eq!(k.avg_salary, Some(16_000.0));
        assert!((k.remote_share.unwrap() - 100.0 / 3.0).abs() < 1e-9);
        assert_eq!(k.top_technology.as_deref(), Some("Python"));
    }

    #[test]
    fn kpis_on_empty_store() {
        let conn = db::test_connection();
        let k = kpis(&conn).unwrap();
        assert_eq!(k.active_jobs, 0);
        assert_eq!(k.avg_salary, None);
        assert_eq!(k.remote_share, None);
        assert_eq!(k.top_technology, None);
        assert_eq!(last_scrape_run(&conn).unwrap(), None);
    }

    #[test]
    fn demand_counts_distinct_postings() {
        let conn = seeded();
        let demand = technology_demand(&conn, day(1), 3).unwrap();
        let summary: Vec<(&str, usize)> =
            demand.iter().map(|d| (d.name.as_str(), d.job_count)).collect();
        assert_eq!(summary, vec![("Python", 3), ("Docker", 2), ("AWS", 1)]);
        assert_eq!(demand[0].category, "language");
    }

    #[test]
    fn salary_ranking_needs_two_postings() {
        let conn = seeded();
        let ranking = salary_by_technology(&conn, 10).unwrap();
        let names: Vec<&str> = ranking.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Python", "Docker"]);
        assert_eq!(ranking[1].min_salary, 10_000.0);
        assert_eq!(ranking[1].max_salary, 16_000.0);
    }

    #[test]
    fn locations_on_a_date() {
        let conn = seeded();
        let locations = location_distribution(&conn, day(2)).unwrap();
        let total: usize = locations.iter().map(|l| l.job_count).sum();
        assert_eq!(total, 3);
        let warsaw_office = locations
            .iter()
            .find(|l| l.city.as_deref() == Some("Warszawa") && l.location_type.as_deref() == Some("office"))
            .unwrap();
        assert_eq!(warsaw_office.job_count, 1);
    }

    #[test]
    fn trends_per_day() {
        let conn = seeded();
        let trend = technology_trends(&conn, &["Python".to_string(), "Java".to_string()], day(1)).unwrap();
        let points: Vec<(&str, NaiveDate, usize)> =
            trend.iter().map(|p| (p.name.as_str(), p.date, p.job_count)).collect();
        assert_eq!(
            points,
            vec![("Java", day(1), 1), ("Python", day(1), 2), ("Python", day(2), 3)]
        );
        assert!(technology_trends(&conn, &[], day(1)).unwrap().is_empty());
    }

    #[test]
    fn seniority_salaries_and_metrics_window() {
        let conn = seeded();
        let by_level = salary_by_seniority(&conn, day(2)).unwrap();
        assert_eq!(by_level.len(), 1);
        assert_eq!(by_level[0].seniority, "mid");
        assert_eq!(by_level[0].job_count, 3);
        assert_eq!(by_level[0].median_salary, 16_000.0);

        assert_eq!(daily_metrics(&conn, day(1)).unwrap().len(), 2);
        assert_eq!(daily_metrics(&conn, day(2)).unwrap().len(), 1);

        let run = last_scrape_run(&conn).unwrap().unwrap();
        assert_eq!(run.snapshot_date, day(2));
        assert_eq!(run.jobs_new, 1);
        assert_eq!(run.status, "success");
    }
}
