//! Canonical slug tokens: lowercase ASCII letters and digits separated by
//! single hyphens.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

pub const MAX_SLUG_LEN: usize = 50;

/// Tokens kept by [`slug_from_title`].
pub const MAX_TITLE_TOKENS: usize = 5;

static SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s_]+").expect("valid pattern"));
static DISALLOWED: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9-]").expect("valid pattern"));
static HYPHEN_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"-{2,}").expect("valid pattern"));
static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\W+").expect("valid pattern"));
static CANONICAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").expect("valid pattern"));

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "in",
    "into", "is", "it", "its", "of", "on", "or", "should", "so", "than", "that", "the", "their",
    "then", "there", "these", "this", "to", "via", "was", "will", "with", "within",
];

pub fn slugify(text: &str) -> String {
    let lowered = text.to_lowercase();
    let hyphenated = SEPARATORS.replace_all(&lowered, "-");
    let stripped = DISALLOWED.replace_all(&hyphenated, "");
    let collapsed = HYPHEN_RUNS.replace_all(&stripped, "-");
    let truncated: String = collapsed
        .trim_matches('-')
        .chars()
        .take(MAX_SLUG_LEN)
        .collect();
    truncated.trim_matches('-').to_string()
}

/// A short slug built from the meaningful words of a title.
pub fn slug_from_title(text: &str) -> String {
    let lowered = text.to_lowercase();
    let tokens: Vec<&str> = NON_WORD
        .split(&lowered)
        .filter(|t| t.len() >= 2 && !STOP_WORDS.contains(t))
        .take(MAX_TITLE_TOKENS)
        .collect();
    slugify(&tokens.join("-"))
}

/// `base` if unused, otherwise the first free `base-N` for N = 1, 2, ...
pub fn unique_slug<S: AsRef<str>>(base: &str, existing_slugs: &[S]) -> String {
    let taken: HashSet<&str> = existing_slugs.iter().map(AsRef::as_ref).collect();
    if !taken.contains(base) {
        return base.to_string();
    }
    (1..)
        .map(|n| format!("{base}-{n}"))
        .find(|candidate| !taken.contains(candidate.as_str()))
        .unwrap_or_else(|| base.to_string())
}

pub fn is_valid_slug(slug: &str) -> bool {
    CANONICAL.is_match(slug)
}
