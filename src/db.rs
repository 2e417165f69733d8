use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create database directory {:?}", dir))?;
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS job_postings (
            id              INTEGER PRIMARY KEY,
            job_id          TEXT UNIQUE NOT NULL,
            title           TEXT NOT NULL,
            company_name    TEXT NOT NULL,
            url             TEXT NOT NULL,
            first_seen_date TEXT NOT NULL,
            last_seen_date  TEXT NOT NULL,
            is_active       BOOLEAN NOT NULL DEFAULT 1,
            created_at      TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_job_postings_active ON job_postings(is_active);

        CREATE TABLE IF NOT EXISTS job_snapshots (
            id              INTEGER PRIMARY KEY,
            job_id          TEXT NOT NULL REFERENCES job_postings(job_id),
            snapshot_date   TEXT NOT NULL,
            description     TEXT,
            requirements    TEXT,
            location_type   TEXT CHECK(location_type IN ('remote','office','hybrid')),
            city            TEXT,
            region          TEXT,
            country         TEXT NOT NULL DEFAULT 'Poland',
            seniority_level TEXT,
            employment_type TEXT,
            created_at      TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(job_id, snapshot_date)
        );
        CREATE INDEX IF NOT EXISTS idx_job_snapshots_date ON job_snapshots(snapshot_date);

        CREATE TABLE IF NOT EXISTS salaries (
            id            INTEGER PRIMARY KEY,
            job_id        TEXT NOT NULL REFERENCES job_postings(job_id),
            snapshot_date TEXT NOT NULL,
            currency      TEXT NOT NULL DEFAULT 'PLN',
            salary_min    REAL,
            salary_max    REAL,
            salary_avg    REAL,
            period        TEXT NOT NULL DEFAULT 'monthly',
            is_b2b        BOOLEAN NOT NULL DEFAULT 0,
            created_at    TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(job_id, snapshot_date)
        );
        CREATE INDEX IF NOT EXISTS idx_salaries_date ON salaries(snapshot_date);

        CREATE TABLE IF NOT EXISTS technologies (
            id         INTEGER PRIMARY KEY,
            name       TEXT NOT NULL UNIQUE COLLATE NOCASE,
            category   TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS job_technologies (
            id            INTEGER PRIMARY KEY,
            job_id        TEXT NOT NULL REFERENCES job_postings(job_id),
            technology_id INTEGER NOT NULL REFERENCES technologies(id),
            snapshot_date TEXT NOT NULL,
            UNIQUE(job_id, technology_id, snapshot_date)
        );
        CREATE INDEX IF NOT EXISTS idx_job_technologies_date ON job_technologies(snapshot_date);
        CREATE INDEX IF NOT EXISTS idx_job_technologies_job ON job_technologies(job_id);

        -- Derived; safe to delete and recompute
        CREATE TABLE IF NOT EXISTS daily_metrics (
            metric_date      TEXT PRIMARY KEY,
            total_jobs       INTEGER NOT NULL,
            remote_jobs      INTEGER NOT NULL,
            office_jobs      INTEGER NOT NULL,
            hybrid_jobs      INTEGER NOT NULL,
            jobs_with_salary INTEGER NOT NULL,
            new_jobs         INTEGER NOT NULL,
            avg_salary       REAL,
            median_salary    REAL,
            computed_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS scrape_runs (
            id               INTEGER PRIMARY KEY,
            run_date         TEXT NOT NULL DEFAULT (datetime('now')),
            snapshot_date    TEXT NOT NULL,
            jobs_found       INTEGER NOT NULL,
            jobs_new         INTEGER NOT NULL,
            jobs_updated     INTEGER NOT NULL,
            jobs_expired     INTEGER NOT NULL,
            jobs_malformed   INTEGER NOT NULL,
            jobs_duplicate   INTEGER NOT NULL,
            jobs_failed      INTEGER NOT NULL,
            status           TEXT NOT NULL CHECK(status IN ('success','partial','failure')),
            error_message    TEXT,
            duration_seconds REAL NOT NULL
        );
        ",
    )?;
    Ok(())
}

/// True for UNIQUE / PRIMARY KEY violations.
pub fn is_unique_violation(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(err, _) => {
            err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        }
        _ => false,
    }
}

// ── Postings ──

pub fn posting_exists(conn: &Connection, job_id: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM job_postings WHERE job_id = ?1",
        params![job_id],
        |_| Ok(()),
    )
    .optional()
    .map(|r| r.is_some())
}

pub fn insert_posting(
    conn: &Connection,
    job_id: &str,
    title: &str,
    company_name: &str,
    url: &str,
    seen: NaiveDate,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO job_postings
         (job_id, title, company_name, url, first_seen_date, last_seen_date, is_active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5, 1)",
        params![job_id, title, company_name, url, seen],
    )?;
    Ok(())
}

/// Mark a posting as seen on `seen`. Dates only ever widen the seen window.
pub fn touch_posting(conn: &Connection, job_id: &str, seen: NaiveDate) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE job_postings
         SET last_seen_date  = MAX(last_seen_date, ?2),
             first_seen_date = MIN(first_seen_date, ?2),
             is_active       = 1,
             updated_at      = datetime('now')
         WHERE job_id = ?1",
        params![job_id, seen],
    )?;
    Ok(())
}

/// Active postings whose last sighting is strictly before `cutoff`.
pub fn active_last_seen_before(
    conn: &Connection,
    cutoff: NaiveDate,
) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT job_id FROM job_postings
         WHERE is_active = 1 AND last_seen_date < ?1
         ORDER BY job_id",
    )?;
    let rows = stmt
        .query_map(params![cutoff], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn deactivate_posting(conn: &Connection, job_id: &str) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE job_postings SET is_active = 0, updated_at = datetime('now')
         WHERE job_id = ?1 AND is_active = 1",
        params![job_id],
    )
}

// ── Snapshots ──

pub struct SnapshotRow<'a> {
    pub job_id: &'a str,
    pub snapshot_date: NaiveDate,
    pub description: Option<&'a str>,
    pub requirements: Option<&'a str>,
    pub location_type: Option<&'static str>,
    pub city: Option<&'a str>,
    pub region: Option<&'a str>,
    pub country: &'a str,
    pub seniority_level: &'static str,
    pub employment_type: Option<&'a str>,
}

pub fn insert_snapshot(conn: &Connection, s: &SnapshotRow) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO job_snapshots
         (job_id, snapshot_date, description, requirements, location_type,
          city, region, country, seniority_level, employment_type)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            s.job_id, s.snapshot_date, s.description, s.requirements, s.location_type,
            s.city, s.region, s.country, s.seniority_level, s.employment_type,
        ],
    )?;
    Ok(())
}

pub struct SalaryRow<'a> {
    pub job_id: &'a str,
    pub snapshot_date: NaiveDate,
    pub currency: &'static str,
    pub salary_min: f64,
    pub salary_max: f64,
    pub salary_avg: f64,
    pub period: &'static str,
    pub is_b2b: bool,
}

pub fn insert_salary(conn: &Connection, s: &SalaryRow) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO salaries
         (job_id, snapshot_date, currency, salary_min, salary_max, salary_avg, period, is_b2b)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            s.job_id, s.snapshot_date, s.currency, s.salary_min, s.salary_max,
            s.salary_avg, s.period, s.is_b2b,
        ],
    )?;
    Ok(())
}

// ── Technologies ──

/// Insert the technology if its name is new (case-insensitive). Returns (id, created).
pub fn upsert_technology(
    conn: &Connection,
    name: &str,
    category: &str,
) -> rusqlite::Result<(i64, bool)> {
    let created = conn.execute(
        "INSERT INTO technologies (name, category) VALUES (?1, ?2)
         ON CONFLICT(name) DO NOTHING",
        params![name, category],
    )? > 0;
    let id = conn.query_row(
        "SELECT id FROM technologies WHERE name = ?1",
        params![name],
        |row| row.get(0),
    )?;
    Ok((id, created))
}

pub fn link_technology(
    conn: &Connection,
    job_id: &str,
    technology_id: i64,
    snapshot_date: NaiveDate,
) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT OR IGNORE INTO job_technologies (job_id, technology_id, snapshot_date)
         VALUES (?1, ?2, ?3)",
        params![job_id, technology_id, snapshot_date],
    )
}

// ── Retention ──

/// Delete snapshot-level rows older than `cutoff`. Postings and daily metrics are kept.
pub fn delete_snapshots_before(conn: &Connection, cutoff: NaiveDate) -> rusqlite::Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut deleted = 0;
    for table in ["job_technologies", "salaries", "job_snapshots"] {
        deleted += tx.execute(
            &format!("DELETE FROM {} WHERE snapshot_date < ?1", table),
            params![cutoff],
        )?;
    }
    tx.commit()?;
    Ok(deleted)
}

// ── Run log ──

pub struct ScrapeRunRow {
    pub snapshot_date: NaiveDate,
    pub jobs_found: usize,
    pub jobs_new: usize,
    pub jobs_updated: usize,
    pub jobs_expired: usize,
    pub jobs_malformed: usize,
    pub jobs_duplicate: usize,
    pub jobs_failed: usize,
    pub status: &'static str,
    pub error_message: Option<String>,
    pub duration_seconds: f64,
}

pub fn insert_scrape_run(conn: &Connection, r: &ScrapeRunRow) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO scrape_runs
         (snapshot_date, jobs_found, jobs_new, jobs_updated, jobs_expired, jobs_malformed,
          jobs_duplicate, jobs_failed, status, error_message, duration_seconds)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            r.snapshot_date, r.jobs_found, r.jobs_new, r.jobs_updated, r.jobs_expired,
            r.jobs_malformed, r.jobs_duplicate, r.jobs_failed, r.status, r.error_message,
            r.duration_seconds,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

// ── Stats ──

pub struct Stats {
    pub postings: usize,
    pub active: usize,
    pub snapshots: usize,
    pub salaries: usize,
    pub technologies: usize,
    pub links: usize,
    pub metric_days: usize,
    pub runs: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let count = |sql: &str| -> Result<usize> { Ok(conn.query_row(sql, [], |r| r.get(0))?) };
    Ok(Stats {
        postings: count("SELECT COUNT(*) FROM job_postings")?,
        active: count("SELECT COUNT(*) FROM job_postings WHERE is_active = 1")?,
        snapshots: count("SELECT COUNT(*) FROM job_snapshots")?,
        salaries: count("SELECT COUNT(*) FROM salaries")?,
        technologies: count("SELECT COUNT(*) FROM technologies")?,
        links: count("SELECT COUNT(*) FROM job_technologies")?,
        metric_days: count("SELECT COUNT(*) FROM daily_metrics")?,
        runs: count("SELECT COUNT(*) FROM scrape_runs")?,
    })
}

#[cfg(test)]
pub struct PostingRow {
    pub first_seen_date: NaiveDate,
    pub last_seen_date: NaiveDate,
    pub is_active: bool,
}

#[cfg(test)]
pub fn fetch_posting(conn: &Connection, job_id: &str) -> rusqlite::Result<Option<PostingRow>> {
    conn.query_row(
        "SELECT first_seen_date, last_seen_date, is_active FROM job_postings WHERE job_id = ?1",
        params![job_id],
        |row| {
            Ok(PostingRow {
                first_seen_date: row.get(0)?,
                last_seen_date: row.get(1)?,
                is_active: row.get(2)?,
            })
        },
    )
    .optional()
}

#[cfg(test)]
pub fn test_connection() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
    init_schema(&conn).unwrap();
    conn
}
