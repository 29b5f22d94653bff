//! Fuzzy scoring on a 0..=100 scale.
//!
//! A score blends per-token coverage (every query token matched against its
//! closest candidate token with Jaro-Winkler) with a whole-string normalized
//! Levenshtein term, so token order and extra words still count for something.

use regex::Regex;
use std::sync::LazyLock;
use strsim::{jaro_winkler, normalized_levenshtein};

static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\p{L}\p{N}\s]+").expect("static regex"));
static SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("static regex"));

const COVERAGE_WEIGHT: f64 = 0.75;
const WHOLE_WEIGHT: f64 = 0.25;

/// Lowercases, drops punctuation and collapses whitespace.
pub fn normalize(text: &str) -> String {
    let lower = text.to_lowercase();
    let stripped = NON_WORD.replace_all(&lower, " ");
    SPACES.replace_all(stripped.trim(), " ").into_owned()
}

/// Scores an already-normalized query against a raw candidate string.
pub fn score_normalized(query: &str, candidate: &str) -> f64 {
    let candidate = normalize(candidate);
    if query.is_empty() || candidate.is_empty() {
        return 0.0;
    }
    if query == candidate {
        return 100.0;
    }

    let candidate_tokens: Vec<&str> = candidate.split(' ').collect();
    let query_tokens: Vec<&str> = query.split(' ').collect();

    let coverage = query_tokens
        .iter()
        .map(|q| {
            candidate_tokens
                .iter()
                .map(|c| jaro_winkler(q, c))
                .fold(0.0_f64, f64::max)
        })
        .sum::<f64>()
        / query_tokens.len() as f64;

    let whole = normalized_levenshtein(query, &candidate);

    (100.0 * (COVERAGE_WEIGHT * coverage + WHOLE_WEIGHT * whole)).clamp(0.0, 100.0)
}

/// Scores two raw strings.
pub fn similarity(query: &str, candidate: &str) -> f64 {
    score_normalized(&normalize(query), candidate)
}

/// True when any of the (normalized) `terms` appears as whole words in `title`.
pub fn contains_term(title: &str, terms: &[String]) -> bool {
    let padded = format!(" {} ", normalize(title));
    terms.iter().any(|term| {
        let term = normalize(term);
        !term.is_empty() && padded.contains(&format!(" {} ", term))
    })
}
