//! Parsing of generation output.
//!
//! Model responses are parsed into a [`ParseOutcome`]: a strict JSON parse
//! yields `Parsed`, a documented best-effort extraction yields
//! `HeuristicParsed`, and anything else is `Failed` with a reason. Callers
//! match on the variant instead of probing the response shape.

use regex::Regex;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

static NUMBERED_ITEM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:\d+[.)]|[-*\x{2022}])\s+(.+)$").expect("valid list item regex")
});

static LABELED_FIELD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*[*"']*([A-Za-z][A-Za-z _]{0,40}?)[*"']*\s*[:=]\s*(.+?)\s*,?\s*$"#)
        .expect("valid labeled field regex")
});

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d+(?:\.\d+)?").expect("valid number regex"));

const STOPWORDS: &[&str] = &[
    "a", "about", "above", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be",
    "been", "being", "between", "both", "but", "by", "can", "could", "did", "do", "does", "for",
    "from", "had", "has", "have", "how", "if", "in", "into", "is", "it", "its", "latest", "may",
    "me", "more", "most", "my", "no", "not", "of", "on", "or", "other", "our", "over", "should",
    "so", "some", "such", "than", "that", "the", "their", "them", "then", "there", "these",
    "they", "this", "those", "through", "to", "under", "up", "was", "we", "were", "what", "when",
    "where", "which", "while", "who", "why", "will", "with", "would", "you", "your",
];

/// Result of parsing one model response.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome<T> {
    /// The response matched the expected schema.
    Parsed(T),
    /// The schema did not match; a heuristic recovered a value.
    HeuristicParsed(T),
    /// Nothing usable could be recovered.
    Failed(String),
}

impl<T> ParseOutcome<T> {
    pub fn value(self) -> Option<T> {
        match self {
            ParseOutcome::Parsed(v) | ParseOutcome::HeuristicParsed(v) => Some(v),
            ParseOutcome::Failed(_) => None,
        }
    }

    pub fn is_heuristic(&self) -> bool {
        matches!(self, ParseOutcome::HeuristicParsed(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ParseOutcome::Failed(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ParseOutcome<U> {
        match self {
            ParseOutcome::Parsed(v) => ParseOutcome::Parsed(f(v)),
            ParseOutcome::HeuristicParsed(v) => ParseOutcome::HeuristicParsed(f(v)),
            ParseOutcome::Failed(reason) => ParseOutcome::Failed(reason),
        }
    }
}

/// The outermost `{ ... }` span of `text`, ignoring any surrounding prose or
/// code fences.
pub fn json_object_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse `text` as `T`.
///
/// The whole response, then its outermost JSON object, are tried as strict
/// JSON. If neither matches, `heuristic` is given the raw text.
pub fn parse_structured<T, H>(text: &str, heuristic: H) -> ParseOutcome<T>
where
    T: DeserializeOwned,
    H: FnOnce(&str) -> Option<T>,
{
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<T>(trimmed) {
        return ParseOutcome::Parsed(value);
    }
    let schema_error = match json_object_span(trimmed).map(serde_json::from_str::<T>) {
        Some(Ok(value)) => return ParseOutcome::Parsed(value),
        Some(Err(e)) => e.to_string(),
        None => "no JSON object in response".to_string(),
    };
    match heuristic(trimmed) {
        Some(value) => ParseOutcome::HeuristicParsed(value),
        None => ParseOutcome::Failed(schema_error),
    }
}

/// `key: value` lines, keys lowercased with spaces turned into underscores.
/// Later duplicates win.
pub fn labeled_fields(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .filter_map(|line| {
            let caps = LABELED_FIELD_RE.captures(line)?;
            let key = caps[1].trim().to_lowercase().replace(' ', "_");
            let value = caps[2].trim().trim_matches(|c| c == '"' || c == '\'').to_string();
            (!value.is_empty()).then_some((key, value))
        })
        .collect()
}

/// Items of a numbered or bulleted list, in order.
pub fn numbered_items(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| NUMBERED_ITEM_RE.captures(line))
        .map(|caps| caps[1].trim().trim_matches('*').trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

/// First number in `text`, if any.
pub fn first_number(text: &str) -> Option<f64> {
    NUMBER_RE.find(text).and_then(|m| m.as_str().parse().ok())
}

/// Lowercased content words, stopwords and short tokens removed, first
/// occurrence order, at most `limit`.
pub fn keywords(text: &str, limit: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    text.split(|c: char| !c.is_alphanumeric() && c != '-')
        .map(|t| t.trim_matches('-').to_lowercase())
        .filter(|t| t.chars().count() > 2 && !STOPWORDS.contains(&t.as_str()))
        .filter(|t| seen.insert(t.clone()))
        .take(limit)
        .collect()
}

pub fn keyword_set(text: &str) -> HashSet<String> {
    keywords(text, usize::MAX).into_iter().collect()
}

/// Jaccard similarity of two keyword sets. Two empty sets score 0.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// At most `max` characters of `text`, never splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// The first `n` whitespace-separated words of `text`.
pub fn first_words(text: &str, n: usize) -> Vec<String> {
    text.split_whitespace().take(n).map(str::to_string).collect()
}
