pub mod cache;
pub mod queries;

use std::time::Duration;

use chrono::{Days, NaiveDate};
use rusqlite::Connection;
use serde::Serialize;

use crate::etl::metrics::DailyMetric;
use cache::{query_key, QueryCache};
use queries::{Kpis, LastRun, LocationCount, SenioritySalary, TechDemand, TechSalary, TrendPoint};

/// Everything the dashboard shows, for one reference date.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardReport {
    pub as_of: Option<NaiveDate>,
    pub kpis: Kpis,
    pub last_run: Option<LastRun>,
    pub daily_metrics: Vec<DailyMetric>,
    pub technology_demand: Vec<TechDemand>,
    pub salary_by_technology: Vec<TechSalary>,
    pub locations: Vec<LocationCount>,
    pub technology_trends: Vec<TrendPoint>,
    pub salary_by_seniority: Vec<SenioritySalary>,
}

/// Cached view over the store. Each query result lives for the configured TTL.
pub struct Dashboard<'a> {
    conn: &'a Connection,
    kpis: QueryCache<Kpis>,
    last_run: QueryCache<Option<LastRun>>,
    metrics: QueryCache<Vec<DailyMetric>>,
    demand: QueryCache<Vec<TechDemand>>,
    tech_salaries: QueryCache<Vec<TechSalary>>,
    locations: QueryCache<Vec<LocationCount>>,
    trends: QueryCache<Vec<TrendPoint>>,
    seniority: QueryCache<Vec<SenioritySalary>>,
}

fn days_before(date: NaiveDate, days: u32) -> NaiveDate {
    date.checked_sub_days(Days::new(days.into()))
        .unwrap_or(NaiveDate::MIN)
}

impl<'a> Dashboard<'a> {
    pub fn new(conn: &'a Connection, ttl: Duration) -> Self {
        Self {
            conn,
            kpis: QueryCache::new(ttl),
            last_run: QueryCache::new(ttl),
            metrics: QueryCache::new(ttl),
            demand: QueryCache::new(ttl),
            tech_salaries: QueryCache::new(ttl),
            locations: QueryCache::new(ttl),
            trends: QueryCache::new(ttl),
            seniority: QueryCache::new(ttl),
        }
    }

    pub fn kpis(&mut self) -> rusqlite::Result<Kpis> {
        let conn = self.conn;
        self.kpis
            .get_or_try_insert_with(&query_key("kpis", &[]), || queries::kpis(conn))
    }

    pub fn last_run(&mut self) -> rusqlite::Result<Option<LastRun>> {
        let conn = self.conn;
        self.last_run
            .get_or_try_insert_with(&query_key("last_run", &[]), || queries::last_scrape_run(conn))
    }

    pub fn daily_metrics(&mut self, since: NaiveDate) -> rusqlite::Result<Vec<DailyMetric>> {
        let conn = self.conn;
        self.metrics.get_or_try_insert_with(&query_key("daily_metrics", &[&since]), || {
            queries::daily_metrics(conn, since)
        })
    }

    pub fn technology_demand(&mut self, since: NaiveDate, top: usize) -> rusqlite::Result<Vec<TechDemand>> {
        let conn = self.conn;
        self.demand
            .get_or_try_insert_with(&query_key("technology_demand", &[&since, &top]), || {
                queries::technology_demand(conn, since, top)
            })
    }

    pub fn salary_by_technology(&mut self, top: usize) -> rusqlite::Result<Vec<TechSalary>> {
        let conn = self.conn;
        self.tech_salaries
            .get_or_try_insert_with(&query_key("salary_by_technology", &[&top]), || {
                queries::salary_by_technology(conn, top)
            })
    }

    pub fn locations(&mut self, date: NaiveDate) -> rusqlite::Result<Vec<LocationCount>> {
        let conn = self.conn;
        self.locations
            .get_or_try_insert_with(&query_key("locations", &[&date]), || {
                queries::location_distribution(conn, date)
            })
    }

    pub fn technology_trends(
        &mut self,
        names: &[String],
        since: NaiveDate,
    ) -> rusqlite::Result<Vec<TrendPoint>> {
        let conn = self.conn;
        let joined = names.join("|");
        self.trends
            .get_or_try_insert_with(&query_key("technology_trends", &[&joined, &since]), || {
                queries::technology_trends(conn, names, since)
            })
    }

    pub fn salary_by_seniority(&mut self, since: NaiveDate) -> rusqlite::Result<Vec<SenioritySalary>> {
        let conn = self.conn;
        self.seniority
            .get_or_try_insert_with(&query_key("salary_by_seniority", &[&since]), || {
                queries::salary_by_seniority(conn, since)
            })
    }

    /// Drop every cached result so the next call reads the store.
    pub fn refresh(&mut self) {
        self.kpis.clear();
        self.last_run.clear();
        self.metrics.clear();
        self.demand.clear();
        self.tech_salaries.clear();
        self.locations.clear();
        self.trends.clear();
        self.seniority.clear();
    }

    /// Assemble the full report. Windows are counted back from the latest snapshot, so
    /// an old database still shows its last data.
    pub fn report(&mut self, days: u32, top: usize, trend_count: usize) -> rusqlite::Result<DashboardReport> {
        let kpis = self.kpis()?;
        let as_of = kpis.latest_snapshot;
        let since = as_of.map(|d| days_before(d, days)).unwrap_or(NaiveDate::MIN);

        let technology_demand = self.technology_demand(since, top)?;
        let trend_names: Vec<String> = technology_demand
            .iter()
            .take(trend_count)
            .map(|t| t.name.clone())
            .collect();

        Ok(DashboardReport {
            as_of,
            last_run: self.last_run()?,
            daily_metrics: self.daily_metrics(since)?,
            salary_by_technology: self.salary_by_technology(top)?,
            locations: match as_of {
                Some(date) => self.locations(date)?,
                None => Vec::new(),
            },
            technology_trends: self.technology_trends(&trend_names, since)?,
            salary_by_seniority: self.salary_by_seniority(since)?,
            technology_demand,
            kpis,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::RawJob;
    use crate::config::EtlSettings;
    use crate::{db, etl};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, d).unwrap()
    }

    fn raw(id: &str) -> RawJob {
        RawJob {
            job_id: id.to_string(),
            title: "Rust Developer".to_string(),
            company_name: "Acme".to_string(),
            url: format!("https://nofluffjobs.com/pl/job/{}", id),
            salary: Some("20 000 - 30 000 PLN".to_string()),
            location: Some("Zdalnie".to_string()),
            technologies: vec!["Rust".into(), "Linux".into()],
            ..Default::default()
        }
    }

    #[test]
    fn cached_results_survive_until_refresh() {
        let conn = db::test_connection();
        etl::run(&conn, &[raw("a")], day(1), &EtlSettings::default()).unwrap();

        let mut dash = Dashboard::new(&conn, Duration::from_secs(3600));
        assert_eq!(dash.kpis().unwrap().active_jobs, 1);

        etl::run(&conn, &[raw("a"), raw("b")], day(2), &EtlSettings::default()).unwrap();
        assert_eq!(dash.kpis().unwrap().active_jobs, 1);

        dash.refresh();
        assert_eq!(dash.kpis().unwrap().active_jobs, 2);
    }

    #[test]
    fn zero_ttl_always_reads_the_store() {
        let conn = db::test_connection();
        let mut dash = Dashboard::new(&conn, Duration::ZERO);
        assert_eq!(dash.kpis().unwrap().active_jobs, 0);
        etl::run(&conn, &[raw("a")], day(1), &EtlSettings::default()).unwrap();
        assert_eq!(dash.kpis().unwrap().active_jobs, 1);
    }

    #[test]
    fn report_covers_every_section() {
        let conn = db::test_connection();
        etl::run(&conn, &[raw("a"), raw("b")], day(1), &EtlSettings::default()).unwrap();

        let mut dash = Dashboard::new(&conn, Duration::from_secs(3600));
        let report = dash.report(90, 10, 5).unwrap();
        assert_eq!(report.as_of, Some(day(1)));
        assert_eq!(report.kpis.top_technology.as_deref(), Some("Linux"));
        assert_eq!(report.daily_metrics.len(), 1);
        assert_eq!(report.technology_demand.len(), 2);
        assert_eq!(report.salary_by_technology.len(), 2);
        assert_eq!(report.locations.len(), 1);
        assert_eq!(report.technology_trends.len(), 2);
        assert_eq!(report.salary_by_seniority[0].avg_salary, 25_000.0);
        assert_eq!(report.last_run.unwrap().status, "success");
    }

    #[test]
    fn report_on_empty_store() {
        let conn = db::test_connection();
        let mut dash = Dashboard::new(&conn, Duration::from_secs(3600));
        let report = dash.report(90, 10, 5).unwrap();
        assert_eq!(report.as_of, None);
        assert!(report.technology_demand.is_empty());
        assert!(report.locations.is_empty());
    }
}
