use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

const DEFAULT_CONFIG_NAME: &str = "job_market";
const ENV_PREFIX: &str = "JOB_MARKET";

/// All runtime options. Every field has a default, so an empty config is valid.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub scraper: ScraperSettings,
    pub rate_limit: RateLimitSettings,
    pub scraping: ScrapingSettings,
    pub etl: EtlSettings,
    pub dashboard: DashboardSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: PathBuf,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/job_market.sqlite"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScraperSettings {
    pub base_url: String,
    pub search_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    /// Where scraped batches are written and where `etl` looks for the latest one.
    pub batch_dir: PathBuf,
}

impl Default for ScraperSettings {
    fn default() -> Self {
        Self {
            base_url: "https://nofluffjobs.com".to_string(),
            search_url: "https://nofluffjobs.com/pl/praca-it".to_string(),
            user_agent: "Mozilla/5.0 (compatible; job-market-dashboard/0.1)".to_string(),
            timeout_secs: 30,
            batch_dir: PathBuf::from("data/raw"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Lower bound of the random delay between requests.
    pub min_delay_secs: f64,
    /// Upper bound of the random delay between requests.
    pub max_delay_secs: f64,
    pub requests_per_minute: usize,
    pub retry_attempts: u32,
    /// Retry n waits `retry_backoff ^ n` seconds (minutes for HTTP 429).
    pub retry_backoff: u32,
    /// Consecutive failures before the circuit breaker opens.
    pub failure_threshold: u32,
    pub circuit_timeout_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            min_delay_secs: 2.0,
            max_delay_secs: 5.0,
            requests_per_minute: 20,
            retry_attempts: 3,
            retry_backoff: 2,
            failure_threshold: 5,
            circuit_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScrapingSettings {
    pub max_pages: u32,
    pub max_jobs_per_run: usize,
}

impl Default for ScrapingSettings {
    fn default() -> Self {
        Self {
            max_pages: 10,
            max_jobs_per_run: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EtlSettings {
    /// Days a posting may go unseen before it is marked inactive.
    pub grace_period_days: u32,
    /// Snapshot rows older than this are pruned after each run. 0 keeps everything.
    pub snapshot_retention_days: u32,
}

impl Default for EtlSettings {
    fn default() -> Self {
        Self {
            grace_period_days: 3,
            snapshot_retention_days: 365,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DashboardSettings {
    pub cache_ttl_secs: u64,
    pub metrics_days: u32,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 3600,
            metrics_days: 90,
        }
    }
}

/// Defaults, then `job_market.toml` (or `path` when given), then
/// `JOB_MARKET__<SECTION>__<KEY>` environment variables.
pub fn load(path: Option<&Path>) -> Result<Settings> {
    let file = match path {
        Some(p) => File::from(p).required(true),
        None => File::with_name(DEFAULT_CONFIG_NAME).required(false),
    };

    let settings = Config::builder()
        .add_source(file)
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to read configuration")?;

    settings
        .try_deserialize()
        .context("Invalid configuration")
}
