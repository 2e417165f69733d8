//! Field normalization: salary ranges, location strings, seniority and free text.
//!
//! Input is what the job board shows, in Polish formatting: "10 000 - 15 000 PLN (B2B)",
//! "Warszawa / Zdalnie", "Senior". Everything here is pure.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::NormalizeError;

pub const COUNTRY: &str = "Poland";
pub const OTHER_REGION: &str = "other";
pub const DESCRIPTION_MAX_CHARS: usize = 5000;

/// One number: space-grouped thousands ("10 000"), optional decimals, optional "k".
static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d{1,3}(?:[ \u{a0}\u{202f},.]\d{3})+|\d+)(?:[.,](\d{1,2}))?(?:\s*(k)\b)?")
        .expect("Invalid salary number regex")
});

/// "B2B" carries a digit, so it is removed before numbers are read.
static B2B_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bb2b\b").expect("Invalid b2b regex"));

static CONTRACT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(b2b|netto|net)\b").expect("Invalid contract regex")
});

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("Invalid whitespace regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Currency {
    Pln,
    Eur,
    Usd,
    Gbp,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Pln => "PLN",
            Currency::Eur => "EUR",
            Currency::Usd => "USD",
            Currency::Gbp => "GBP",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SalaryPeriod {
    Monthly,
    Hourly,
    Annual,
}

impl SalaryPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SalaryPeriod::Monthly => "monthly",
            SalaryPeriod::Hourly => "hourly",
            SalaryPeriod::Annual => "annual",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Salary {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub currency: Currency,
    pub period: SalaryPeriod,
    pub is_b2b: bool,
}

/// Parse a salary range. Fails only when no number can be found.
pub fn parse_salary(text: &str) -> Result<Salary, NormalizeError> {
    let numeric_part = B2B_RE.replace_all(text, " ");
    let values: Vec<f64> = NUMBER_RE
        .captures_iter(&numeric_part)
        .filter_map(|caps| {
            let digits: String = caps[1].chars().filter(|c| c.is_ascii_digit()).collect();
            let mut value: f64 = digits.parse().ok()?;
            if let Some(frac) = caps.get(2) {
                value += format!("0.{}", frac.as_str()).parse::<f64>().ok()?;
            }
            if caps.get(3).is_some() {
                value *= 1000.0;
            }
            Some(value)
        })
        .take(2)
        .collect();

    let (mut min, mut max) = match values.as_slice() {
        [] => return Err(NormalizeError::MalformedSalary(text.to_string())),
        [single] => (*single, *single),
        [a, b, ..] => (*a, *b),
    };
    if min > max {
        std::mem::swap(&mut min, &mut max);
    }

    Ok(Salary {
        min,
        max,
        avg: (min + max) / 2.0,
        currency: detect_currency(text),
        period: detect_period(text),
        is_b2b: CONTRACT_RE.is_match(text),
    })
}

fn detect_currency(text: &str) -> Currency {
    let upper = text.to_uppercase();
    if upper.contains("EUR") || upper.contains('€') {
        Currency::Eur
    } else if upper.contains("USD") || upper.contains('$') {
        Currency::Usd
    } else if upper.contains("GBP") || upper.contains('£') {
        Currency::Gbp
    } else {
        Currency::Pln
    }
}

fn detect_period(text: &str) -> SalaryPeriod {
    let lower = text.to_lowercase().replace(' ', "");
    if lower.contains("/h") || lower.contains("godz") || lower.contains("hour") {
        SalaryPeriod::Hourly
    } else if ["/rok", "rocznie", "annual", "year"]
        .iter()
        .any(|k| lower.contains(k))
    {
        SalaryPeriod::Annual
    } else {
        SalaryPeriod::Monthly
    }
}

// ── Location ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LocationType {
    Remote,
    Office,
    Hybrid,
}

impl LocationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationType::Remote => "remote",
            LocationType::Office => "office",
            LocationType::Hybrid => "hybrid",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Location {
    pub location_type: Option<LocationType>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: &'static str,
}

const REMOTE_KEYWORDS: &[&str] = &["zdalnie", "zdalna", "zdalny", "remote"];
const HYBRID_KEYWORDS: &[&str] = &["hybryd", "hybrid"];
const LOCATION_SEPARATORS: &[char] = &['/', ',', '|', ';', '+', '(', ')'];

/// (canonical name, voivodeship, aliases). Aliases are lower-case.
const CITIES: &[(&str, &str, &[&str])] = &[
    ("Warszawa", "Mazowieckie", &["warsaw", "warszawa"]),
    ("Kraków", "Małopolskie", &["krakow", "cracow"]),
    ("Wrocław", "Dolnośląskie", &["wroclaw"]),
    ("Poznań", "Wielkopolskie", &["poznan"]),
    ("Gdańsk", "Pomorskie", &["gdansk"]),
    ("Gdynia", "Pomorskie", &[]),
    ("Sopot", "Pomorskie", &[]),
    ("Szczecin", "Zachodniopomorskie", &[]),
    ("Łódź", "Łódzkie", &["lodz"]),
    ("Katowice", "Śląskie", &[]),
    ("Gliwice", "Śląskie", &[]),
    ("Bydgoszcz", "Kujawsko-pomorskie", &[]),
    ("Lublin", "Lubelskie", &[]),
    ("Białystok", "Podlaskie", &["bialystok"]),
    ("Rzeszów", "Podkarpackie", &["rzeszow"]),
    ("Toruń", "Kujawsko-pomorskie", &["torun"]),
];

static CITY_LOOKUP: LazyLock<HashMap<String, (&'static str, &'static str)>> =
    LazyLock::new(|| {
        let mut map = HashMap::new();
        for (name, region, aliases) in CITIES {
            map.insert(name.to_lowercase(), (*name, *region));
            for alias in *aliases {
                map.insert(alias.to_string(), (*name, *region));
            }
        }
        map
    });

impl Location {
    pub fn unknown() -> Self {
        Location {
            location_type: None,
            city: None,
            region: None,
            country: COUNTRY,
        }
    }
}

/// A known city named anywhere in `lower`, matched word by word.
fn known_city_in(lower: &str) -> Option<(&'static str, &'static str)> {
    lower
        .split(|c: char| !c.is_alphanumeric())
        .find_map(|word| CITY_LOOKUP.get(word).copied())
}

pub fn parse_location(text: &str) -> Location {
    let mut remote = false;
    let mut hybrid = false;
    let mut city_text: Option<&str> = None;
    let mut keyword_city = None;

    // A spaced dash separates places; "Bielsko-Biała" stays one name.
    let text = text.replace(" - ", "/").replace(" – ", "/");
    for segment in text
        .split(LOCATION_SEPARATORS)
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        let lower = segment.to_lowercase();
        let is_remote = REMOTE_KEYWORDS.iter().any(|k| lower.contains(k));
        let is_hybrid = HYBRID_KEYWORDS.iter().any(|k| lower.contains(k));
        if is_remote || is_hybrid {
            if is_remote {
                remote = true;
            } else {
                hybrid = true;
            }
            // "Zdalnie Warszawa" still names a city.
            keyword_city = keyword_city.or_else(|| known_city_in(&lower));
        } else if city_text.is_none() && segment.chars().any(char::is_alphabetic) {
            city_text = Some(segment);
        }
    }

    let (city, region) = match (city_text, keyword_city) {
        (Some(raw), _) => match CITY_LOOKUP.get(&raw.to_lowercase()) {
            Some((name, region)) => (Some(name.to_string()), Some(region.to_string())),
            None => (Some(title_case(raw)), Some(OTHER_REGION.to_string())),
        },
        (None, Some((name, region))) => (Some(name.to_string()), Some(region.to_string())),
        (None, None) => (None, None),
    };

    let location_type = match (city.is_some(), remote, hybrid) {
        (_, _, true) | (true, true, _) => Some(LocationType::Hybrid),
        (false, true, _) => Some(LocationType::Remote),
        (true, false, _) => Some(LocationType::Office),
        (false, false, false) => None,
    };

    Location {
        location_type,
        city,
        region,
        country: COUNTRY,
    }
}

/// Upper-case the first letter of each word, leaving the rest as written.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if at_word_start {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        at_word_start = c.is_whitespace() || c == '-';
    }
    out
}

// ── Seniority ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Seniority {
    Junior,
    Mid,
    Senior,
}

impl Seniority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Seniority::Junior => "junior",
            Seniority::Mid => "mid",
            Seniority::Senior => "senior",
        }
    }
}

const SENIOR_KEYWORDS: &[&str] = &["senior", "starszy", "lead", "principal", "architect"];
const JUNIOR_KEYWORDS: &[&str] = &["junior", "młodszy", "trainee", "graduate", "entry", "internship", "stażysta"];

/// Explicit seniority wins; otherwise the title is searched. Defaults to mid.
pub fn normalize_seniority(raw: Option<&str>, title: &str) -> Seniority {
    let classify = |s: &str| {
        let lower = s.to_lowercase();
        if SENIOR_KEYWORDS.iter().any(|k| lower.contains(k)) {
            Some(Seniority::Senior)
        } else if JUNIOR_KEYWORDS.iter().any(|k| lower.contains(k)) {
            Some(Seniority::Junior)
        } else {
            None
        }
    };

    match raw.filter(|s| !s.trim().is_empty()) {
        Some(s) => classify(s).unwrap_or(Seniority::Mid),
        None => classify(title).unwrap_or(Seniority::Mid),
    }
}

// ── Text ──

/// Trim, collapse whitespace, drop NUL bytes. Empty input becomes None.
pub fn clean_text(text: &str) -> Option<String> {
    let without_nul = text.replace('\0', "");
    let collapsed = WHITESPACE_RE.replace_all(without_nul.trim(), " ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed.into_owned())
    }
}

pub fn clean_description(text: &str, max_chars: usize) -> Option<String> {
    let cleaned = clean_text(text)?;
    if cleaned.chars().count() <= max_chars {
        Some(cleaned)
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        Some(format!("{}...", truncated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn salary_range_with_group_separators() {
        for (text, a, b) in [
            ("10 000 - 15 000 PLN", 10_000.0, 15_000.0),
            ("8000 - 12000 PLN", 8_000.0, 12_000.0),
            ("1 250 - 1 250 PLN", 1_250.0, 1_250.0),
            ("20\u{a0}000 – 28\u{a0}500 PLN", 20_000.0, 28_500.0),
        ] {
            let s = parse_salary(text).unwrap();
            assert_eq!(s.min, a, "{}", text);
            assert_eq!(s.max, b, "{}", text);
            assert_eq!(s.avg, (a + b) / 2.0, "{}", text);
            assert_eq!(s.currency, Currency::Pln, "{}", text);
            assert!(!s.is_b2b);
        }
    }

    #[test]
    fn single_value_salary() {
        let s = parse_salary("18 000 zł").unwrap();
        assert_eq!((s.min, s.max, s.avg), (18_000.0, 18_000.0, 18_000.0));
        assert_eq!(s.currency, Currency::Pln);
    }

    #[test]
    fn salary_without_numbers_is_malformed() {
        assert_eq!(
            parse_salary("Undisclosed"),
            Err(NormalizeError::MalformedSalary("Undisclosed".to_string()))
        );
        assert!(parse_salary("").is_err());
        assert!(parse_salary("B2B").is_err());
    }

    #[test]
    fn b2b_marker_and_currency() {
        let s = parse_salary("B2B: 5 000 - 7 000 EUR").unwrap();
        assert!(s.is_b2b);
        assert_eq!(s.currency, Currency::Eur);
        assert_eq!((s.min, s.max), (5_000.0, 7_000.0));

        let s = parse_salary("15 000 - 20 000 PLN netto (+ VAT)").unwrap();
        assert!(s.is_b2b);

        let s = parse_salary("$120k - $150k / year").unwrap();
        assert_eq!(s.currency, Currency::Usd);
        assert_eq!(s.period, SalaryPeriod::Annual);
        assert_eq!((s.min, s.max), (120_000.0, 150_000.0));
    }

    #[test]
    fn reversed_range_is_swapped() {
        let s = parse_salary("20 000 - 10 000 PLN").unwrap();
        assert_eq!((s.min, s.max), (10_000.0, 20_000.0));
    }

    #[test]
    fn hourly_rates() {
        let s = parse_salary("120 - 150 PLN/h").unwrap();
        assert_eq!(s.period, SalaryPeriod::Hourly);
        assert_eq!(s.avg, 135.0);
    }

    #[test]
    fn decimal_part_is_kept() {
        let s = parse_salary("12 500,50 PLN").unwrap();
        assert_eq!(s.min, 12_500.5);
    }

    #[test]
    fn city_with_remote_is_hybrid() {
        let loc = parse_location("Warszawa / Zdalnie");
        assert_eq!(loc.city.as_deref(), Some("Warszawa"));
        assert_eq!(loc.location_type, Some(LocationType::Hybrid));
        assert_eq!(loc.region.as_deref(), Some("Mazowieckie"));
    }

    #[test]
    fn dash_separated_and_run_together_locations() {
        for text in ["Warszawa - Zdalnie", "Warszawa – zdalnie", "Zdalnie Warszawa"] {
            let loc = parse_location(text);
            assert_eq!(loc.city.as_deref(), Some("Warszawa"), "{}", text);
            assert_eq!(loc.location_type, Some(LocationType::Hybrid), "{}", text);
        }

        let loc = parse_location("Hybrydowo Gdansk");
        assert_eq!(loc.city.as_deref(), Some("Gdańsk"));
        assert_eq!(loc.region.as_deref(), Some("Pomorskie"));
        assert_eq!(loc.location_type, Some(LocationType::Hybrid));

        // An unspaced dash is part of the name.
        let loc = parse_location("Bielsko-Biała / Zdalnie");
        assert_eq!(loc.city.as_deref(), Some("Bielsko-Biała"));
        assert_eq!(loc.location_type, Some(LocationType::Hybrid));
    }

    #[test]
    fn city_alone_is_office() {
        let loc = parse_location("Kraków");
        assert_eq!(loc.city.as_deref(), Some("Kraków"));
        assert_eq!(loc.location_type, Some(LocationType::Office));
    }

    #[test]
    fn remote_alone_has_no_city() {
        let loc = parse_location("Zdalnie");
        assert_eq!(loc.city, None);
        assert_eq!(loc.region, None);
        assert_eq!(loc.location_type, Some(LocationType::Remote));
    }

    #[test]
    fn aliases_map_to_canonical_city() {
        let loc = parse_location("krakow");
        assert_eq!(loc.city.as_deref(), Some("Kraków"));
        let loc = parse_location("Praca zdalna, Wroclaw");
        assert_eq!(loc.city.as_deref(), Some("Wrocław"));
        assert_eq!(loc.location_type, Some(LocationType::Hybrid));
    }

    #[test]
    fn unknown_city_passes_through_with_other_region() {
        let loc = parse_location("bielsko-Biała");
        assert_eq!(loc.city.as_deref(), Some("Bielsko-Biała"));
        assert_eq!(loc.region.as_deref(), Some(OTHER_REGION));
        assert_eq!(loc.location_type, Some(LocationType::Office));
    }

    #[test]
    fn hybrid_keyword_and_extra_locations() {
        let loc = parse_location("Gdańsk (hybrydowo) +2");
        assert_eq!(loc.city.as_deref(), Some("Gdańsk"));
        assert_eq!(loc.location_type, Some(LocationType::Hybrid));
    }

    #[test]
    fn empty_location_is_unknown() {
        assert_eq!(parse_location("  "), Location::unknown());
    }

    #[test]
    fn seniority_from_field_then_title() {
        assert_eq!(normalize_seniority(Some("Senior"), "Developer"), Seniority::Senior);
        assert_eq!(normalize_seniority(None, "Młodszy programista"), Seniority::Junior);
        assert_eq!(normalize_seniority(Some(""), "Tech Lead"), Seniority::Senior);
        assert_eq!(normalize_seniority(Some("Regular"), "Senior Dev"), Seniority::Mid);
        assert_eq!(normalize_seniority(None, "Backend Developer"), Seniority::Mid);
    }

    #[test]
    fn text_cleaning() {
        assert_eq!(clean_text("  a \n\t b\0c "), Some("a bc".to_string()));
        assert_eq!(clean_text(" \n "), None);
        let long = "x".repeat(10);
        assert_eq!(clean_description(&long, 4), Some("xxxx...".to_string()));
    }
}
