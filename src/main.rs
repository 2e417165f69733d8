mod batch;
mod config;
mod crawler;
mod dashboard;
mod db;
mod error;
mod etl;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use tracing::info;

use crate::config::Settings;
use crate::dashboard::{Dashboard, DashboardReport};
use crate::etl::{RunStatus, RunSummary};

#[derive(Parser)]
#[command(name = "job_market", about = "Polish IT job market tracker: scrape, load, report")]
struct Cli {
    /// Config file (default: ./job_market.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database, overrides database.path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Init,
    /// Crawl the job board and write a raw batch file
    Scrape {
        /// Max listing pages
        #[arg(long)]
        max_pages: Option<u32>,
        /// Max postings to fetch
        #[arg(short = 'n', long)]
        max_jobs: Option<usize>,
        /// Print robots.txt before crawling
        #[arg(long)]
        robots: bool,
    },
    /// Load a raw batch file into the database
    Etl {
        /// Batch file (default: newest in scraper.batch_dir)
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Snapshot date, YYYY-MM-DD (default: today)
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
    /// Scrape, then load the fresh batch
    Run {
        #[arg(short = 'n', long)]
        max_jobs: Option<usize>,
    },
    /// Row counts per table
    Stats,
    /// Market report from the stored data
    Dashboard {
        /// Days of history to include
        #[arg(long)]
        days: Option<u32>,
        /// Rows per ranking
        #[arg(long, default_value = "15")]
        top: usize,
        /// Print JSON instead of tables
        #[arg(long)]
        json: bool,
        /// Reprint every N seconds; cached results are dropped when a new run lands
        #[arg(long, value_name = "SECS")]
        watch: Option<u64>,
    },
    /// Delete snapshot rows older than the retention window
    Prune {
        /// Retention in days (default: etl.snapshot_retention_days)
        #[arg(long)]
        days: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut settings = config::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        settings.database.path = db;
    }

    let result = match cli.command {
        Commands::Init => {
            let conn = db::connect(&settings.database.path)?;
            db::init_schema(&conn)?;
            println!("Schema ready at {}", settings.database.path.display());
            Ok(())
        }
        Commands::Scrape { max_pages, max_jobs, robots } => {
            if let Some(n) = max_pages {
                settings.scraping.max_pages = n;
            }
            if let Some(n) = max_jobs {
                settings.scraping.max_jobs_per_run = n;
            }
            let path = scrape(&settings, robots).await?;
            println!("Batch written to {}", path.display());
            Ok(())
        }
        Commands::Etl { file, date } => {
            let path = match file {
                Some(p) => p,
                None => batch::latest_batch(&settings.scraper.batch_dir)?.with_context(|| {
                    format!("No batch files in {}", settings.scraper.batch_dir.display())
                })?,
            };
            let date = date.unwrap_or_else(|| Local::now().date_naive());
            load_batch_file(&settings, &path, date)
        }
        Commands::Run { max_jobs } => {
            if let Some(n) = max_jobs {
                settings.scraping.max_jobs_per_run = n;
            }
            let path = scrape(&settings, false).await?;
            load_batch_file(&settings, &path, Local::now().date_naive())
        }
        Commands::Stats => {
            let conn = db::connect(&settings.database.path)?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Postings:     {} ({} active)", s.postings, s.active);
            println!("Snapshots:    {}", s.snapshots);
            println!("Salaries:     {}", s.salaries);
            println!("Technologies: {} ({} links)", s.technologies, s.links);
            println!("Metric days:  {}", s.metric_days);
            println!("Runs:         {}", s.runs);
            Ok(())
        }
        Commands::Dashboard { days, top, json, watch } => {
            let conn = db::connect(&settings.database.path)?;
            db::init_schema(&conn)?;
            let days = days.unwrap_or(settings.dashboard.metrics_days);
            let mut dash = Dashboard::new(&conn, Duration::from_secs(settings.dashboard.cache_ttl_secs));
            let mut seen_run = None;
            loop {
                let latest_run = dashboard::queries::last_scrape_run(&conn)?.map(|r| r.run_date);
                if latest_run != seen_run {
                    dash.refresh();
                    seen_run = latest_run;
                }
                let report = dash.report(days, top, 5)?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                } else {
                    print_report(&report);
                }
                let Some(secs) = watch else { break };
                tokio::time::sleep(Duration::from_secs(secs)).await;
            }
            Ok(())
        }
        Commands::Prune { days } => {
            let conn = db::connect(&settings.database.path)?;
            db::init_schema(&conn)?;
            let days = days.unwrap_or(settings.etl.snapshot_retention_days);
            let pruned = etl::load::prune_snapshots(&conn, Local::now().date_naive(), days)?;
            println!("Deleted {} snapshot rows older than {} days", pruned, days);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn scrape(settings: &Settings, robots: bool) -> Result<PathBuf> {
    let mut scraper = crawler::NoFluffScraper::new(settings)?;
    if robots {
        scraper.check_robots_txt().await;
    }
    let jobs = scraper.scrape_all().await?;
    let path = batch::write_batch(&settings.scraper.batch_dir, &jobs)?;
    let s = &scraper.stats;
    println!(
        "Scraped {} postings from {} pages ({} missing, {} errors)",
        s.jobs_scraped, s.pages_scraped, s.jobs_missing, s.errors
    );
    Ok(path)
}

fn load_batch_file(settings: &Settings, path: &std::path::Path, date: NaiveDate) -> Result<()> {
    let raw = batch::read_batch(path)?;
    info!(file = %path.display(), records = raw.len(), "Loading batch");

    let conn = db::connect(&settings.database.path)?;
    db::init_schema(&conn)?;
    let summary = etl::run(&conn, &raw, date, &settings.etl)?;
    print_summary(&summary);

    if summary.status == RunStatus::Failure {
        bail!(
            "ETL run failed: {}",
            summary.error_message.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn print_summary(s: &RunSummary) {
    println!("Snapshot {} [{}]", s.snapshot_date, s.status.as_str());
    println!(
        "  found {} | new {} | updated {} | unchanged {} | expired {}",
        s.jobs_found, s.jobs_new, s.jobs_updated, s.jobs_unchanged, s.jobs_expired
    );
    println!(
        "  malformed {} | duplicate {} | failed {} | new technologies {} | pruned {}",
        s.jobs_malformed, s.jobs_duplicate, s.jobs_failed, s.technologies_new, s.snapshots_pruned
    );
}

fn print_report(r: &DashboardReport) {
    let Some(as_of) = r.as_of else {
        println!("No snapshots yet. Run `job_market run` first.");
        return;
    };

    let k = &r.kpis;
    println!("=== Job market as of {} ===", as_of);
    println!(
        "Active jobs: {} | Avg salary: {} PLN | Remote: {} | Top technology: {}",
        k.active_jobs,
        money(k.avg_salary),
        k.remote_share.map(|p| format!("{:.1}%", p)).unwrap_or_else(|| "-".into()),
        k.top_technology.as_deref().unwrap_or("-"),
    );
    if let Some(run) = &r.last_run {
        println!(
            "Last run: {} ({}), {} found, {} new, {} expired, {:.1}s",
            run.run_date, run.status, run.jobs_found, run.jobs_new, run.jobs_expired, run.duration_seconds
        );
    }

    println!("\n--- Daily metrics ---");
    println!(
        "{:<10} | {:>5} | {:>6} | {:>6} | {:>6} | {:>4} | {:>9} | {:>9}",
        "Date", "Jobs", "Remote", "Office", "Hybrid", "New", "Avg", "Median"
    );
    println!("{}", "-".repeat(76));
    for m in r.daily_metrics.iter().rev().take(14) {
        println!(
            "{:<10} | {:>5} | {:>6} | {:>6} | {:>6} | {:>4} | {:>9} | {:>9}",
            m.metric_date, m.total_jobs, m.remote_jobs, m.office_jobs, m.hybrid_jobs,
            m.new_jobs, money(m.avg_salary), money(m.median_salary)
        );
    }

    println!("\n--- Technology demand ---");
    for (i, t) in r.technology_demand.iter().enumerate() {
        println!("{:>3}. {:<24} {:<10} {:>5}", i + 1, fit(&t.name, 24), t.category, t.job_count);
    }

    println!("\n--- Salary by technology (PLN) ---");
    println!("{:<24} | {:>4} | {:>9} | {:>9} | {:>9}", "Technology", "Jobs", "Avg", "Min", "Max");
    println!("{}", "-".repeat(66));
    for t in &r.salary_by_technology {
        println!(
            "{:<24} | {:>4} | {:>9} | {:>9} | {:>9}",
            fit(&t.name, 24),
            t.job_count,
            money(Some(t.avg_salary)),
            money(Some(t.min_salary)),
            money(Some(t.max_salary))
        );
    }

    println!("\n--- Salary by seniority (PLN) ---");
    for s in &r.salary_by_seniority {
        println!(
            "{:<8} {:>4} jobs | avg {:>9} | median {:>9}",
            s.seniority,
            s.job_count,
            money(Some(s.avg_salary)),
            money(Some(s.median_salary))
        );
    }

    println!("\n--- Locations on {} ---", as_of);
    for l in &r.locations {
        println!(
            "{:<20} {:<22} {:<7} {:>5}",
            fit(l.city.as_deref().unwrap_or("-"), 20),
            fit(l.region.as_deref().unwrap_or("-"), 22),
            l.location_type.as_deref().unwrap_or("-"),
            l.job_count
        );
    }

    if !r.technology_trends.is_empty() {
        println!("\n--- Trends ---");
        for p in &r.technology_trends {
            println!("{} {:<20} {:>5}", p.date, fit(&p.name, 20), p.job_count);
        }
    }
}

/// Whole units with space-grouped thousands, as the board prints them.
fn money(v: Option<f64>) -> String {
    let Some(v) = v else {
        return "-".to_string();
    };
    let digits = format!("{:.0}", v.abs());
    let mut out = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(' ');
        }
        out.push(c);
    }
    if v < 0.0 {
        out.insert(0, '-');
    }
    out
}

fn fit(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        let kept: String = s.chars().take(width.saturating_sub(1)).collect();
        format!("{}…", kept)
    }
}

fn format_duration(d: Duration) -> String {
    match d.as_secs() {
        s if s < 60 => format!("{:.1}s", d.as_secs_f64()),
        s if s < 3600 => format!("{}m {}s", s / 60, s % 60),
        s => format!("{}h {}m", s / 3600, (s % 3600) / 60),
    }
}
