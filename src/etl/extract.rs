use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::batch::RawJob;
use crate::error::NormalizeError;
use crate::etl::normalize::{clean_text, parse_salary};

const MIN_TITLE_CHARS: usize = 3;
const MIN_COMPANY_CHARS: usize = 2;

static JOB_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/job/([^/?#]+)").expect("Invalid job id regex"));

/// A raw record that passed validation, with its text fields cleaned.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedJob {
    pub job_id: String,
    pub title: String,
    pub company_name: String,
    pub url: String,
    pub salary_text: Option<String>,
    pub location_text: Option<String>,
    pub technologies: Vec<String>,
    pub description: Option<String>,
    pub requirements: Option<String>,
    pub seniority: Option<String>,
    pub employment_type: Option<String>,
}

#[derive(Debug, Default)]
pub struct Extraction {
    pub jobs: Vec<ExtractedJob>,
    /// Every identifier observed in the batch, including dropped records.
    pub seen_ids: HashSet<String>,
    pub malformed: usize,
    pub duplicates: usize,
}

/// Slug after `/job/` in a posting URL.
pub fn job_id_from_url(url: &str) -> Option<String> {
    JOB_ID_RE.captures(url).map(|caps| caps[1].to_string())
}

fn require_len(field: &'static str, value: &str, min: usize) -> Result<(), NormalizeError> {
    if value.chars().count() < min {
        return Err(NormalizeError::TooShort { field, min });
    }
    Ok(())
}

pub fn extract_job(raw: &RawJob) -> Result<ExtractedJob, NormalizeError> {
    let url = clean_text(&raw.url).ok_or(NormalizeError::MissingField("url"))?;
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(NormalizeError::InvalidUrl(url));
    }
    let job_id = clean_text(&raw.job_id)
        .or_else(|| job_id_from_url(&url))
        .ok_or(NormalizeError::MissingField("job_id"))?;
    let title = clean_text(&raw.title).ok_or(NormalizeError::MissingField("title"))?;
    let company_name =
        clean_text(&raw.company_name).ok_or(NormalizeError::MissingField("company_name"))?;
    require_len("title", &title, MIN_TITLE_CHARS)?;
    require_len("company_name", &company_name, MIN_COMPANY_CHARS)?;

    let salary_text = raw.salary.as_deref().and_then(clean_text);
    if let Some(text) = &salary_text {
        parse_salary(text)?;
    }

    Ok(ExtractedJob {
        job_id,
        title,
        company_name,
        url,
        salary_text,
        location_text: raw.location.as_deref().and_then(clean_text),
        technologies: raw.technologies.clone(),
        description: raw.description.clone(),
        requirements: raw.requirements.as_deref().and_then(clean_text),
        seniority: raw.seniority.as_deref().and_then(clean_text),
        employment_type: raw.employment_type.as_deref().and_then(clean_text),
    })
}

/// Validate a batch. Bad records are counted and skipped; the first record wins for
/// repeated identifiers.
pub fn extract_batch(raw: &[RawJob]) -> Extraction {
    let mut out = Extraction::default();
    let mut kept = HashSet::new();

    for record in raw {
        if let Some(id) = clean_text(&record.job_id).or_else(|| job_id_from_url(&record.url)) {
            out.seen_ids.insert(id);
        }

        let job = match extract_job(record) {
            Ok(job) => job,
            Err(e) => {
                warn!(url = %record.url, error = %e, "Dropping malformed record");
                out.malformed += 1;
                continue;
            }
        };

        if !kept.insert(job.job_id.clone()) {
            debug!(job_id = %job.job_id, "Skipping duplicate identifier in batch");
            out.duplicates += 1;
            continue;
        }
        out.jobs.push(job);
    }

    info!(
        total = raw.len(),
        valid = out.jobs.len(),
        malformed = out.malformed,
        duplicates = out.duplicates,
        "Extracted batch"
    );
    out
}
