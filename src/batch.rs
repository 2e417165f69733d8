//! Intermediate batch files: the scraper's raw output, as a JSON array on disk.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};

/// One scraped posting before any validation. Missing keys deserialize as empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawJob {
    pub job_id: String,
    pub title: String,
    pub company_name: String,
    pub url: String,
    pub salary: Option<String>,
    pub location: Option<String>,
    pub technologies: Vec<String>,
    pub description: Option<String>,
    pub requirements: Option<String>,
    pub seniority: Option<String>,
    pub employment_type: Option<String>,
}

pub fn write_batch(dir: &Path, jobs: &[RawJob]) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
    let path = dir.join(format!("jobs_{}.json", Local::now().format("%Y%m%d_%H%M%S")));
    write_batch_to(&path, jobs)?;
    Ok(path)
}

pub fn write_batch_to(path: &Path, jobs: &[RawJob]) -> Result<()> {
    let json = serde_json::to_string_pretty(jobs)?;
    fs::write(path, json).with_context(|| format!("Failed to write batch {:?}", path))?;
    Ok(())
}

pub fn read_batch(path: &Path) -> Result<Vec<RawJob>> {
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid batch file {:?}", path))
}

/// Most recent `jobs_*.json` in `dir`, by file name (names embed the timestamp).
pub fn latest_batch(dir: &Path) -> Result<Option<PathBuf>> {
    if !dir.exists() {
        return Ok(None);
    }
    let mut batches: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Failed to list {:?}", dir))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("jobs_") && n.ends_with(".json"))
        })
        .collect();
    batches.sort();
    Ok(batches.pop())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_default_to_empty() {
        let jobs: Vec<RawJob> =
            serde_json::from_str(r#"[{"job_id": "a", "title": "Dev", "technologies": ["Go"]}]"#)
                .unwrap();
        assert_eq!(jobs[0].job_id, "a");
        assert_eq!(jobs[0].url, "");
        assert_eq!(jobs[0].salary, None);
        assert_eq!(jobs[0].technologies, vec!["Go".to_string()]);
    }

    #[test]
    fn latest_batch_picks_newest_name() {
        let dir = tempfile::tempdir().unwrap();
        let job = RawJob {
            job_id: "a".into(),
            ..Default::default()
        };
        write_batch_to(&dir.path().join("jobs_20240101_120000.json"), &[]).unwrap();
        write_batch_to(&dir.path().join("jobs_20240102_080000.json"), &[job.clone()]).unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let latest = latest_batch(dir.path()).unwrap().unwrap();
        assert!(latest.ends_with("jobs_20240102_080000.json"));
        assert_eq!(read_batch(&latest).unwrap(), vec![job]);
    }

    #[test]
    fn no_batches_in_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(latest_batch(&dir.path().join("raw")).unwrap(), None);
    }
}
