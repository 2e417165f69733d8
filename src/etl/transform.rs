use chrono::NaiveDate;
use rayon::prelude::*;
use serde::Serialize;

use crate::error::NormalizeError;
use crate::etl::extract::ExtractedJob;
use crate::etl::normalize::{
    clean_description, normalize_seniority, parse_location, parse_salary, Location, Salary,
    Seniority, DESCRIPTION_MAX_CHARS,
};
use crate::etl::tech::{categorize_all, Technology};

/// A posting in canonical form, ready for the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalJob {
    pub job_id: String,
    pub title: String,
    pub company_name: String,
    pub url: String,
    pub snapshot_date: NaiveDate,
    pub description: Option<String>,
    pub requirements: Option<String>,
    pub location: Location,
    pub seniority: Seniority,
    pub employment_type: Option<String>,
    pub salary: Option<Salary>,
    pub technologies: Vec<Technology>,
}

pub fn transform(job: &ExtractedJob, snapshot_date: NaiveDate) -> Result<CanonicalJob, NormalizeError> {
    let salary = job.salary_text.as_deref().map(parse_salary).transpose()?;
    let location = job
        .location_text
        .as_deref()
        .map(parse_location)
        .unwrap_or_else(Location::unknown);

    Ok(CanonicalJob {
        job_id: job.job_id.clone(),
        title: job.title.clone(),
        company_name: job.company_name.clone(),
        url: job.url.clone(),
        snapshot_date,
        description: job
            .description
            .as_deref()
            .and_then(|d| clean_description(d, DESCRIPTION_MAX_CHARS)),
        requirements: job.requirements.clone(),
        location,
        seniority: normalize_seniority(job.seniority.as_deref(), &job.title),
        employment_type: job.employment_type.as_ref().map(|e| e.to_lowercase()),
        salary,
        technologies: categorize_all(&job.technologies),
    })
}

/// Transform in parallel. Output keeps input order; failures carry the job id.
pub fn transform_batch(
    jobs: &[ExtractedJob],
    snapshot_date: NaiveDate,
) -> (Vec<CanonicalJob>, Vec<(String, NormalizeError)>) {
    let results: Vec<_> = jobs
        .par_iter()
        .map(|job| transform(job, snapshot_date).map_err(|e| (job.job_id.clone(), e)))
        .collect();

    let mut ok = Vec::with_capacity(results.len());
    let mut failed = Vec::new();
    for result in results {
        match result {
            Ok(job) => ok.push(job),
            Err(failure) => failed.push(failure),
        }
    }
    (ok, failed)
}
