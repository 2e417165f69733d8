//! Polite crawler for the job board: paginated listings, then one request per posting.

pub mod parser;
pub mod rate_limiter;

use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::{Client, Url};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::batch::RawJob;
use crate::config::Settings;
use crate::error::FetchError;
use parser::JobParser;
use rate_limiter::{CircuitBreaker, RateLimiter};

const ROBOTS_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScrapeStats {
    pub pages_scraped: usize,
    pub jobs_found: usize,
    pub jobs_scraped: usize,
    /// Postings that answered 404, usually expired between listing and detail fetch.
    pub jobs_missing: usize,
    pub errors: usize,
}

/// What to do with an HTTP status on a given attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusAction {
    Body,
    Missing,
    RetryRateLimited,
    RetryServerError,
    GiveUp,
    Unexpected,
}

pub fn status_action(status: u16, attempt: u32, max_retries: u32) -> StatusAction {
    let retryable = attempt < max_retries;
    match status {
        200 => StatusAction::Body,
        404 => StatusAction::Missing,
        429 if retryable => StatusAction::RetryRateLimited,
        500 | 502 | 503 | 504 if retryable => StatusAction::RetryServerError,
        429 | 500 | 502 | 503 | 504 => StatusAction::GiveUp,
        _ => StatusAction::Unexpected,
    }
}

/// Listing page N. Page 1 is the search URL itself.
pub fn page_url(search_url: &str, page: u32) -> String {
    if page <= 1 {
        search_url.to_string()
    } else if search_url.contains('?') {
        format!("{}&page={}", search_url, page)
    } else {
        format!("{}?page={}", search_url, page)
    }
}

pub struct NoFluffScraper {
    client: Client,
    base_url: String,
    search_url: String,
    max_pages: u32,
    max_jobs: usize,
    limiter: RateLimiter,
    breaker: CircuitBreaker,
    parser: JobParser,
    pub stats: ScrapeStats,
}

impl NoFluffScraper {
    pub fn new(settings: &Settings) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("pl-PL,pl;q=0.9,en-US;q=0.8,en;q=0.7"),
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.scraper.timeout_secs))
            .user_agent(&settings.scraper.user_agent)
            .default_headers(headers)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: settings.scraper.base_url.clone(),
            search_url: settings.scraper.search_url.clone(),
            max_pages: settings.scraping.max_pages,
            max_jobs: settings.scraping.max_jobs_per_run,
            limiter: RateLimiter::new(&settings.rate_limit),
            breaker: CircuitBreaker::from_settings(&settings.rate_limit),
            parser: JobParser::new(&settings.scraper.base_url)?,
            stats: ScrapeStats::default(),
        })
    }

    /// Crawl listings, then every posting, up to the configured limits.
    pub async fn scrape_all(&mut self) -> Result<Vec<RawJob>> {
        info!(max_pages = self.max_pages, max_jobs = self.max_jobs, "Starting scraper");

        let mut urls = self.scrape_job_urls().await;
        if urls.is_empty() {
            warn!("No job URLs found, the listing markup may have changed");
            return Ok(Vec::new());
        }
        if urls.len() > self.max_jobs {
            info!("Limiting to {} of {} postings", self.max_jobs, urls.len());
            urls.truncate(self.max_jobs);
        }

        let pb = ProgressBar::new(urls.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
                .progress_chars("=> "),
        );

        let mut jobs = Vec::with_capacity(urls.len());
        for url in &urls {
            if !self.breaker.can_proceed() {
                error!("Circuit breaker open, stopping scrape");
                break;
            }
            match self.fetch_page(url).await {
                Ok(Some(html)) => {
                    let job = self.parser.parse_job_detail(&html, url);
                    debug!(job_id = %job.job_id, title = %job.title, "Scraped posting");
                    jobs.push(job);
                    self.stats.jobs_scraped += 1;
                    self.breaker.record_success();
                }
                Ok(None) => self.stats.jobs_missing += 1,
                Err(e) => {
                    warn!(url = %url, error = %e, "Failed to fetch posting");
                    self.stats.errors += 1;
                    self.breaker.record_failure();
                }
            }
            pb.inc(1);
        }
        pb.finish_and_clear();

        info!(
            pages = self.stats.pages_scraped,
            found = self.stats.jobs_found,
            scraped = self.stats.jobs_scraped,
            missing = self.stats.jobs_missing,
            errors = self.stats.errors,
            "Scrape finished"
        );
        Ok(jobs)
    }

    /// Posting URLs from the listing pages, de-duplicated in first-seen order.
    pub async fn scrape_job_urls(&mut self) -> Vec<String> {
        let mut all = Vec::new();

        for page in 1..=self.max_pages {
            let url = page_url(&self.search_url, page);
            let html = match self.fetch_page(&url).await {
                Ok(Some(html)) => html,
                Ok(None) => {
                    warn!(page, "Empty response for listing page");
                    break;
                }
                Err(e) => {
                    error!(page, error = %e, "Failed to fetch listing page");
                    break;
                }
            };

            let page_urls = self.parser.extract_job_urls(&html);
            if page_urls.is_empty() {
                info!(page, "No more postings");
                break;
            }
            self.stats.pages_scraped += 1;
            self.stats.jobs_found += page_urls.len();
            info!(page, found = page_urls.len(), total = all.len() + page_urls.len(), "Listing page scraped");
            all.extend(page_urls);

            if !self.parser.has_next_page(&html) {
                break;
            }
        }

        let total = all.len();
        let unique: Vec<String> = all.into_iter().unique().collect();
        if unique.len() < total {
            info!("Removed {} duplicate URLs", total - unique.len());
        }
        unique
    }

    /// GET with pacing and retries. `Ok(None)` means the page does not exist.
    pub async fn fetch_page(&mut self, url: &str) -> Result<Option<String>, FetchError> {
        let max_retries = self.limiter.retry_attempts();
        let mut attempt = 0;

        loop {
            self.limiter.wait().await;
            let delay = match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    match status_action(status, attempt, max_retries) {
                        StatusAction::Body => return Ok(Some(resp.text().await?)),
                        StatusAction::Missing => {
                            info!(url, "Not found (404)");
                            return Ok(None);
                        }
                        StatusAction::RetryRateLimited => {
                            let d = self.limiter.rate_limited_delay(attempt);
                            warn!(
                                "Rate limited (429), retry {}/{} in {:.1} min",
                                attempt + 1,
                                max_retries,
                                d.as_secs_f64() / 60.0
                            );
                            d
                        }
                        StatusAction::RetryServerError => {
                            let d = self.limiter.retry_delay(attempt);
                            warn!(status, "Server error, retry {}/{} in {}s", attempt + 1, max_retries, d.as_secs());
                            d
                        }
                        StatusAction::GiveUp => {
                            return Err(FetchError::RetriesExhausted {
                                url: url.to_string(),
                                attempts: attempt + 1,
                            })
                        }
                        StatusAction::Unexpected => {
                            return Err(FetchError::UnexpectedStatus {
                                status,
                                url: url.to_string(),
                            })
                        }
                    }
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    if attempt >= max_retries {
                        return Err(FetchError::RetriesExhausted {
                            url: url.to_string(),
                            attempts: attempt + 1,
                        });
                    }
                    let mut d = self.limiter.retry_delay(attempt);
                    if e.is_connect() {
                        d *= 2;
                    }
                    warn!(error = %e, "Request failed, retry {}/{}", attempt + 1, max_retries);
                    d
                }
                Err(e) => return Err(e.into()),
            };
            sleep(delay).await;
            attempt += 1;
        }
    }

    /// Fetch robots.txt for the operator to review. Failures are logged, not raised.
    pub async fn check_robots_txt(&self) -> Option<String> {
        let robots = Url::parse(&self.base_url).and_then(|u| u.join("/robots.txt")).ok()?;
        let resp = match self.client.get(robots).timeout(ROBOTS_TIMEOUT).send().await {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                warn!(status = resp.status().as_u16(), "No robots.txt");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Could not fetch robots.txt");
                return None;
            }
        };
        let body = resp.text().await.ok()?;
        info!("robots.txt:\n{}", body.chars().take(500).collect::<String>());
        Some(body)
    }
}
