//! Technology categorization.
//!
//! Skill tokens are mapped to a canonical name and category through a fixed table built
//! once at startup. Tokens outside the table are kept, named as written and filed under
//! `tool`: recall over category precision.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TechCategory {
    Language,
    Framework,
    Database,
    Cloud,
    Tool,
}

impl TechCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TechCategory::Language => "language",
            TechCategory::Framework => "framework",
            TechCategory::Database => "database",
            TechCategory::Cloud => "cloud",
            TechCategory::Tool => "tool",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Technology {
    pub name: String,
    pub category: TechCategory,
    /// False when the token fell through to the `tool` default.
    pub known: bool,
}

use TechCategory::*;

/// (canonical name, category, extra lower-case aliases)
const ENTRIES: &[(&str, TechCategory, &[&str])] = &[
    ("Python", Language, &["python3"]),
    ("Java", Language, &[]),
    ("JavaScript", Language, &["js", "ecmascript"]),
    ("TypeScript", Language, &["ts"]),
    ("C#", Language, &["csharp"]),
    ("C++", Language, &["cpp"]),
    ("C", Language, &[]),
    ("Go", Language, &["golang"]),
    ("Rust", Language, &[]),
    ("Ruby", Language, &[]),
    ("PHP", Language, &[]),
    ("Swift", Language, &[]),
    ("Kotlin", Language, &[]),
    ("Scala", Language, &[]),
    ("R", Language, &[]),
    ("Julia", Language, &[]),
    ("React", Framework, &["react.js", "reactjs"]),
    ("Angular", Framework, &["angularjs"]),
    ("Vue", Framework, &["vue.js", "vuejs"]),
    ("Django", Framework, &[]),
    ("Flask", Framework, &[]),
    ("FastAPI", Framework, &[]),
    ("Spring", Framework, &["spring boot"]),
    ("Node.js", Framework, &["node", "nodejs"]),
    ("Express", Framework, &["express.js"]),
    (".NET", Framework, &["dotnet", ".net core"]),
    ("ASP.NET", Framework, &[]),
    ("Laravel", Framework, &[]),
    ("Rails", Framework, &["ruby on rails"]),
    ("Symfony", Framework, &[]),
    ("Next.js", Framework, &["nextjs"]),
    ("Nuxt.js", Framework, &["nuxt"]),
    ("Svelte", Framework, &[]),
    ("SQL", Database, &[]),
    ("PostgreSQL", Database, &["postgres"]),
    ("MySQL", Database, &[]),
    ("MongoDB", Database, &["mongo"]),
    ("Redis", Database, &[]),
    ("Elasticsearch", Database, &["elastic"]),
    ("Oracle", Database, &[]),
    ("SQL Server", Database, &["mssql", "ms sql"]),
    ("Cassandra", Database, &[]),
    ("DynamoDB", Database, &[]),
    ("MariaDB", Database, &[]),
    ("SQLite", Database, &[]),
    ("Neo4j", Database, &[]),
    ("CouchDB", Database, &[]),
    ("AWS", Cloud, &["amazon web services"]),
    ("Azure", Cloud, &["microsoft azure"]),
    ("GCP", Cloud, &["google cloud", "google cloud platform"]),
    ("Heroku", Cloud, &[]),
    ("DigitalOcean", Cloud, &[]),
    ("Linode", Cloud, &[]),
    ("Cloudflare", Cloud, &[]),
    ("Docker", Tool, &[]),
    ("Kubernetes", Tool, &["k8s"]),
    ("Git", Tool, &[]),
    ("Jenkins", Tool, &[]),
    ("GitLab", Tool, &[]),
    ("GitHub", Tool, &[]),
    ("Terraform", Tool, &[]),
    ("Ansible", Tool, &[]),
    ("Vagrant", Tool, &[]),
    ("CI/CD", Tool, &["cicd"]),
    ("Jira", Tool, &[]),
    ("Confluence", Tool, &[]),
    ("Linux", Tool, &[]),
];

static TECH_TABLE: LazyLock<HashMap<String, (&'static str, TechCategory)>> = LazyLock::new(|| {
    let mut map = HashMap::new();
    for (name, category, aliases) in ENTRIES {
        map.insert(name.to_lowercase(), (*name, *category));
        for alias in *aliases {
            map.insert(alias.to_string(), (*name, *category));
        }
    }
    map
});

const LEADING_PUNCT: &[char] = &[
    ',', ';', ':', '!', '?', '(', ')', '[', ']', '{', '}', '"', '\'', '*', '-', '•', '·',
];

/// Strip whitespace and surrounding punctuation. A leading `.` (".NET") and trailing
/// `#`/`+` ("C#", "C++") are part of names and survive.
pub fn clean_token(raw: &str) -> &str {
    raw.trim()
        .trim_start_matches(|c: char| c.is_whitespace() || LEADING_PUNCT.contains(&c))
        .trim_end_matches(|c: char| c.is_whitespace() || c == '.' || LEADING_PUNCT.contains(&c))
}

/// Categorize one skill token. Returns None only for tokens that are empty once cleaned.
pub fn categorize(token: &str) -> Option<Technology> {
    let cleaned = clean_token(token);
    if cleaned.is_empty() {
        return None;
    }

    match TECH_TABLE.get(&cleaned.to_lowercase()) {
        Some((name, category)) => Some(Technology {
            name: name.to_string(),
            category: *category,
            known: true,
        }),
        None => {
            debug!(token = cleaned, "Unknown technology, defaulting to tool");
            Some(Technology {
                name: cleaned.to_string(),
                category: TechCategory::Tool,
                known: false,
            })
        }
    }
}

/// Categorize a record's tokens, dropping empties and case-insensitive repeats.
pub fn categorize_all(tokens: &[String]) -> Vec<Technology> {
    let mut seen = HashSet::new();
    tokens
        .iter()
        .filter_map(|t| categorize(t))
        .filter(|t| seen.insert(t.name.to_lowercase()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_covers_every_category() {
        assert!(ENTRIES.len() >= 30);
        for category in [Language, Framework, Database, Cloud, Tool] {
            assert!(ENTRIES.iter().any(|(_, c, _)| *c == category));
        }
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let t = categorize("pYtHoN").unwrap();
        assert_eq!(t.name, "Python");
        assert_eq!(t.category, Language);
        assert!(t.known);
    }

    #[test]
    fn punctuation_is_trimmed_but_names_survive() {
        assert_eq!(categorize(" (Docker), ").unwrap().name, "Docker");
        assert_eq!(categorize("C#").unwrap().name, "C#");
        assert_eq!(categorize("c++;").unwrap().name, "C++");
        assert_eq!(categorize(".net").unwrap().name, ".NET");
        assert_eq!(categorize("Node.js.").unwrap().name, "Node.js");
    }

    #[test]
    fn aliases_resolve() {
        assert_eq!(categorize("k8s").unwrap().name, "Kubernetes");
        assert_eq!(categorize("golang").unwrap().name, "Go");
        assert_eq!(categorize("Postgres").unwrap().category, Database);
        assert_eq!(categorize("google cloud").unwrap().name, "GCP");
    }

    #[test]
    fn unknown_tokens_default_to_tool() {
        let t = categorize("  Kafka ").unwrap();
        assert_eq!(t.name, "Kafka");
        assert_eq!(t.category, Tool);
        assert!(!t.known);
    }

    #[test]
    fn empty_tokens_are_skipped() {
        assert_eq!(categorize(""), None);
        assert_eq!(categorize(" ,; "), None);
    }

    #[test]
    fn repeats_collapse_within_a_record() {
        let tokens: Vec<String> = ["React", "reactjs", "kafka", "Kafka", "", "AWS"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let names: Vec<String> = categorize_all(&tokens).into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["React", "kafka", "AWS"]);
    }
}
