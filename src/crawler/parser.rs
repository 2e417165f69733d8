//! HTML parsing for listing and posting pages.
//!
//! Every field is looked up through a list of selectors, most specific first, since the
//! board's markup shifts between redesigns. Missing fields come back empty and are
//! judged later by the extractor.

use std::collections::HashSet;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use itertools::Itertools;
use regex::Regex;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::batch::RawJob;
use crate::etl::extract::job_id_from_url;

const MAX_TECHNOLOGIES: usize = 50;

fn selectors(list: &[&str]) -> Vec<Selector> {
    list.iter()
        .map(|s| Selector::parse(s).expect("Invalid selector"))
        .collect()
}

static JOB_LINKS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    selectors(&[
        r#"a[href*="/job/"]"#,
        "a.posting-list-item",
        r#"a[class*="posting"]"#,
    ])
});
static TITLE: LazyLock<Vec<Selector>> =
    LazyLock::new(|| selectors(&["h1", r#"[class*="title"]"#]));
static COMPANY: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    selectors(&[r#"[class*="company"]"#, r#"a[href*="/company/"]"#])
});
static DESCRIPTION: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    selectors(&[r#"[class*="description"]"#, r#"[class*="about"]"#])
});
static REQUIREMENTS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    selectors(&[r#"[class*="requirement"]"#, r#"[class*="must-have"]"#])
});
static SALARY: LazyLock<Vec<Selector>> =
    LazyLock::new(|| selectors(&[r#"[class*="salary"]"#, r#"[class*="money"]"#]));
static LOCATION: LazyLock<Vec<Selector>> =
    LazyLock::new(|| selectors(&[r#"[class*="location"]"#, r#"[class*="city"]"#]));
static TECH_TAGS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    selectors(&[
        r#"[class*="technology"]"#,
        r#"[class*="skill"]"#,
        r#"[class*="tech-"]"#,
        "span.tag",
        "div.tags span",
    ])
});
static NEXT_PAGE: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    selectors(&[
        r#"a[rel="next"]"#,
        "a.next",
        r#"a[aria-label*="next"]"#,
        "button.next",
    ])
});

static SALARY_IN_TEXT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\d[\d\s]*\s*[-–]\s*\d[\d\s]*\s*(?:PLN|zł|EUR|USD)")
        .expect("Invalid salary text regex")
});

/// Keywords scanned for in the page text when a posting has no tag elements.
const TECH_KEYWORDS: &[&str] = &[
    "Python", "Java", "JavaScript", "TypeScript", "C#", "C++", "Go", "Rust", "Ruby", "PHP",
    "Swift", "Kotlin", "Scala", "React", "Angular", "Vue", "Django", "Flask", "FastAPI",
    "Spring", "Node.js", "Express", ".NET", "ASP.NET", "PostgreSQL", "MySQL", "MongoDB",
    "Redis", "Elasticsearch", "Oracle", "AWS", "Azure", "GCP", "Docker", "Kubernetes",
    "Terraform", "Git", "Jenkins", "GitLab", "CI/CD", "Ansible", "Linux",
];

static TECH_KEYWORD_RES: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    TECH_KEYWORDS
        .iter()
        .map(|kw| {
            // \b does not work around "#", "+" or a leading ".".
            let pattern = format!(r"(?i)(?:^|[^\w.]){}(?:$|[^\w#+])", regex::escape(kw));
            (*kw, Regex::new(&pattern).expect("Invalid keyword regex"))
        })
        .collect()
});

/// Whitespace-joined text of an element.
fn element_text(el: ElementRef) -> String {
    el.text().map(str::trim).filter(|t| !t.is_empty()).join(" ")
}

fn first_text(doc: &Html, list: &[Selector], accept: impl Fn(&str) -> bool) -> Option<String> {
    list.iter()
        .flat_map(|sel| doc.select(sel))
        .map(element_text)
        .find(|text| !text.is_empty() && accept(text))
}

/// Stable id for URLs without a `/job/` slug.
pub fn url_hash_id(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    hex::encode(digest)[..16].to_string()
}

pub struct JobParser {
    base_url: Url,
}

impl JobParser {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url).with_context(|| format!("Invalid base URL {}", base_url))?;
        Ok(Self { base_url })
    }

    /// Absolute posting URLs on a listing page, without query strings, first
    /// occurrence order.
    pub fn extract_job_urls(&self, html: &str) -> Vec<String> {
        let doc = Html::parse_document(html);
        let mut seen = HashSet::new();
        let mut urls = Vec::new();

        for el in JOB_LINKS.iter().flat_map(|sel| doc.select(sel)) {
            let Some(href) = el.value().attr("href").filter(|h| h.contains("/job/")) else {
                continue;
            };
            let mut url = match self.base_url.join(href) {
                Ok(u) => u,
                Err(e) => {
                    warn!(href, error = %e, "Skipping unparseable job link");
                    continue;
                }
            };
            url.set_query(None);
            url.set_fragment(None);
            let url = url.to_string();
            if seen.insert(url.clone()) {
                urls.push(url);
            }
        }

        debug!(count = urls.len(), "Extracted job URLs from listing");
        urls
    }

    pub fn has_next_page(&self, html: &str) -> bool {
        let doc = Html::parse_document(html);
        NEXT_PAGE
            .iter()
            .flat_map(|sel| doc.select(sel))
            .any(|el| el.value().attr("disabled").is_none())
    }

    pub fn parse_job_detail(&self, html: &str, url: &str) -> RawJob {
        let doc = Html::parse_document(html);
        let body_text = element_text(doc.root_element());

        let title = first_text(&doc, &TITLE, |_| true).unwrap_or_default();
        if title.is_empty() {
            warn!(url, "Could not extract job title");
        }
        let company_name = first_text(&doc, &COMPANY, |_| true).unwrap_or_default();
        if company_name.is_empty() {
            warn!(url, "Could not extract company name");
        }

        let salary = first_text(&doc, &SALARY, |t| t.chars().any(|c| c.is_ascii_digit()))
            .or_else(|| SALARY_IN_TEXT_RE.find(&body_text).map(|m| m.as_str().to_string()));

        let mut technologies = tag_technologies(&doc);
        if technologies.is_empty() {
            technologies = scan_technologies(&body_text);
        }

        RawJob {
            job_id: job_id_from_url(url).unwrap_or_else(|| url_hash_id(url)),
            seniority: Some(detect_seniority(&title, &body_text).to_string()),
            employment_type: detect_employment_type(&body_text).map(str::to_string),
            title,
            company_name,
            url: url.to_string(),
            salary,
            location: first_text(&doc, &LOCATION, |_| true),
            technologies,
            description: first_text(&doc, &DESCRIPTION, |_| true),
            requirements: first_text(&doc, &REQUIREMENTS, |_| true),
        }
    }
}

fn tag_technologies(doc: &Html) -> Vec<String> {
    TECH_TAGS
        .iter()
        .flat_map(|sel| doc.select(sel))
        .map(element_text)
        .filter(|t| t.chars().count() > 1)
        .unique()
        .take(MAX_TECHNOLOGIES)
        .collect()
}

pub fn scan_technologies(text: &str) -> Vec<String> {
    TECH_KEYWORD_RES
        .iter()
        .filter(|(_, re)| re.is_match(text))
        .map(|(kw, _)| kw.to_string())
        .collect()
}

fn detect_seniority(title: &str, body: &str) -> &'static str {
    let title = title.to_lowercase();
    if ["senior", "starszy", "lead", "principal", "architect"]
        .iter()
        .any(|w| title.contains(w))
    {
        return "senior";
    }
    if ["junior", "młodszy", "trainee", "graduate"]
        .iter()
        .any(|w| title.contains(w))
    {
        return "junior";
    }
    if ["mid", "regular"].iter().any(|w| title.contains(w)) {
        return "mid";
    }

    let body = body.to_lowercase();
    if body.contains("senior") || body.contains("starszy") {
        "senior"
    } else if body.contains("junior") || body.contains("młodszy") {
        "junior"
    } else {
        "mid"
    }
}

fn detect_employment_type(body: &str) -> Option<&'static str> {
    let body = body.to_lowercase();
    if body.contains("b2b") {
        Some("b2b")
    } else if body.contains("full-time") || body.contains("pełny etat") {
        Some("full-time")
    } else if body.contains("part-time") || body.contains("część etatu") {
        Some("part-time")
    } else if ["contract", "kontrakt", "umowa"].iter().any(|w| body.contains(w)) {
        Some("contract")
    } else {
        None
    }
}
