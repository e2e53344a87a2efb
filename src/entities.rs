use crate::error::{ReviewError, ReviewResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Name,
    Date,
    Number,
    Address,
    /// No pattern matched; the caller treats the content as free text.
    Text,
}

impl EntityKind {
    /// Lower value wins when spans collide.
    fn priority(&self) -> u8 {
        match self {
            EntityKind::Name => 0,
            EntityKind::Date => 1,
            EntityKind::Address => 2,
            EntityKind::Number => 3,
            EntityKind::Text => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Name => "name",
            EntityKind::Date => "date",
            EntityKind::Number => "number",
            EntityKind::Address => "address",
            EntityKind::Text => "text",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedEntity {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: EntityKind,
    /// Character offset of the match within the input.
    pub start_index: usize,
}

const HONORIFICS: &[&str] = &["Mr", "Mrs", "Ms", "Fr", "Rev", "Dr", "Sr", "Jr"];

const LATIN_MONTHS: &[&str] = &[
    "January", "Jan", "February", "Feb", "March", "Mar", "April", "Apr", "May", "June", "Jun",
    "July", "Jul", "August", "Aug", "September", "Sept", "Sep", "October", "Oct", "November",
    "Nov", "December", "Dec",
];

const CYRILLIC_MONTHS: &[&str] = &[
    "января", "январь", "янв", "февраля", "февраль", "фев", "марта", "март", "мар", "апреля",
    "апрель", "апр", "мая", "май", "июня", "июнь", "июн", "июля", "июль", "июл", "августа",
    "август", "авг", "сентября", "сентябрь", "сент", "сен", "октября", "октябрь", "окт",
    "ноября", "ноябрь", "ноя", "декабря", "декабрь", "дек",
];

const STREET_SUFFIXES: &[&str] = &[
    "St", "Street", "Ave", "Avenue", "Rd", "Road", "Blvd", "Boulevard", "Dr", "Drive", "Ln",
    "Lane", "Ct", "Court", "Pl", "Place", "Way", "Pkwy", "Parkway", "Cir", "Circle", "Ter",
    "Terr", "Terrace",
];

const AGE_UNITS: &[&str] = &[
    "yrs", "yr", "years", "year", "mos", "mo", "months", "month", "days", "day", "лет", "года",
    "год", "мес", "дней", "дня",
];

/// Longest-first alternation so the regex engine prefers "January" over "Jan".
fn alternation(words: &[&str]) -> String {
    let mut sorted: Vec<&str> = words.to_vec();
    sorted.sort_by_key(|w| std::cmp::Reverse(w.chars().count()));
    sorted
        .iter()
        .map(|w| regex::escape(w))
        .collect::<Vec<_>>()
        .join("|")
}

/// Drops a match given the text before it and the match itself.
type Reject = fn(&str, &str) -> bool;

/// "Oak Lane" after a house number belongs to an address; "Mary Lane" alone is a name.
fn street_after_house_number(before: &str, text: &str) -> bool {
    if !before.trim_end().ends_with(|c: char| c.is_ascii_digit()) {
        return false;
    }
    text.split_whitespace()
        .last()
        .map(|w| w.trim_end_matches('.'))
        .map(|w| STREET_SUFFIXES.iter().any(|s| s.eq_ignore_ascii_case(w)))
        .unwrap_or(false)
}

struct Matcher {
    name: String,
    kind: EntityKind,
    regex: Regex,
    reject: Option<Reject>,
}

fn builtin_patterns() -> Vec<(&'static str, EntityKind, String, Option<Reject>)> {
    let honorifics = alternation(HONORIFICS);
    let mut months: Vec<&str> = LATIN_MONTHS.to_vec();
    months.extend_from_slice(CYRILLIC_MONTHS);
    let month = format!(r"(?:{})\.?", alternation(&months));
    let suffixes = alternation(STREET_SUFFIXES);
    let units = alternation(AGE_UNITS);

    vec![
        (
            "latin_name",
            EntityKind::Name,
            format!(
                r"\b(?:(?:{honorifics})\.?\s+[A-Z][a-z]+(?:\s+[A-Z]\.?)?(?:\s+[A-Z][a-z]+)?|[A-Z][a-z]+(?:\s+[A-Z]\.?)?\s+[A-Z][a-z]+)"
            ),
            Some(street_after_house_number as Reject),
        ),
        (
            "cyrillic_name",
            EntityKind::Name,
            r"[А-ЯЁ][а-яё]+(?:\s+[А-ЯЁ]\.?)?\s+[А-ЯЁ][а-яё]+".to_string(),
            None,
        ),
        (
            "date",
            EntityKind::Date,
            format!(
                r"(?i)\b(?:\d{{1,2}}[/.\-]\d{{1,2}}[/.\-]\d{{2,4}}|{month}\s+\d{{1,2}},?\s+\d{{2,4}}|\d{{1,2}}\s+{month}\s+\d{{2,4}}|{month}\s+\d{{4}}|\d{{1,2}}\s+{month}|{month}\s+\d{{1,2}})\b"
            ),
            None,
        ),
        (
            "street_address",
            EntityKind::Address,
            format!(r"(?i)\b\d+\s+[A-Z][a-z]+(?:\s+[A-Z]?[a-z]*)?\s+(?:{suffixes})\.?\b"),
            None,
        ),
        (
            "number_or_age",
            EntityKind::Number,
            format!(r"(?i)\b\d{{1,3}}(?:\s*(?:{units}))?\b"),
            None,
        ),
    ]
}

/// Ordered matchers. Earlier matchers claim their spans first and a later
/// match overlapping a claimed span is dropped, so "123 Main St" is an
/// address and not also the number 123.
pub struct EntityDetector {
    matchers: Vec<Matcher>,
}

impl Default for EntityDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityDetector {
    pub fn new() -> Self {
        let mut matchers = Vec::new();
        for (name, kind, pattern, reject) in builtin_patterns() {
            match Regex::new(&pattern) {
                Ok(regex) => matchers.push(Matcher {
                    name: name.to_string(),
                    kind,
                    regex,
                    reject,
                }),
                Err(e) => tracing::error!(matcher = name, error = %e, "skipping entity matcher"),
            }
        }
        Self { matchers }
    }

    /// Process-wide detector with the built-in tables.
    pub fn shared() -> &'static EntityDetector {
        static DETECTOR: OnceLock<EntityDetector> = OnceLock::new();
        DETECTOR.get_or_init(EntityDetector::new)
    }

    /// Add a matcher; it runs after every existing matcher of the same or higher priority.
    pub fn add_matcher(&mut self, name: &str, kind: EntityKind, pattern: &str) -> ReviewResult<()> {
        if kind == EntityKind::Text {
            return Err(ReviewError::InvalidInput(
                "text is the fallback kind and has no matcher".to_string(),
            ));
        }
        let regex = Regex::new(pattern)
            .map_err(|e| ReviewError::InvalidInput(format!("matcher '{}': {}", name, e)))?;
        let at = self
            .matchers
            .iter()
            .position(|m| m.kind.priority() > kind.priority())
            .unwrap_or(self.matchers.len());
        self.matchers.insert(
            at,
            Matcher {
                name: name.to_string(),
                kind,
                regex,
                reject: None,
            },
        );
        Ok(())
    }

    pub fn matcher_names(&self) -> Vec<&str> {
        self.matchers.iter().map(|m| m.name.as_str()).collect()
    }

    pub fn detect(&self, text: &str) -> Vec<DetectedEntity> {
        let mut entities = Vec::new();
        let mut claimed: Vec<(usize, usize)> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for matcher in &self.matchers {
            for m in matcher.regex.find_iter(text) {
                let raw = m.as_str();
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let start = m.start() + (raw.len() - raw.trim_start().len());
                let end = start + trimmed.len();
                if claimed.iter().any(|&(s, e)| start < e && s < end) {
                    continue;
                }
                if let Some(reject) = matcher.reject {
                    if reject(&text[..start], trimmed) {
                        continue;
                    }
                }
                claimed.push((start, end));
                if !seen.insert(trimmed.to_lowercase()) {
                    continue;
                }
                entities.push(DetectedEntity {
                    text: trimmed.to_string(),
                    kind: matcher.kind,
                    start_index: text[..start].chars().count(),
                });
            }
        }
        entities
    }
}

/// Detect with the shared built-in detector.
pub fn detect(text: &str) -> Vec<DetectedEntity> {
    EntityDetector::shared().detect(text)
}
