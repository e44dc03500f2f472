//! Term normalization shared by indexing and query scoring.

use std::collections::BTreeSet;

/// Korean particles and verb endings, longest first so the first match is
/// also the longest one.
const SUFFIXES: &[&str] = &[
    "했습니다", "에서는", "으로는", "에게서", "이라는", "이라고", "입니다", "습니다",
    "에서", "으로", "에게", "까지", "부터", "이나", "처럼", "보다", "라는", "라고",
    "하는", "하고", "이다", "에는", "와는", "과는", "로는", "했다", "하다",
    "은", "는", "이", "가", "을", "를", "의", "에", "도", "로", "와", "과", "만", "랑",
];

const MIN_STEM_CHARS: usize = 2;

/// Lowercased terms of `text`, with repetition, each followed by its
/// stemmed variant when one exists.
pub fn tokenize_stream(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let mut terms = Vec::new();

    for token in lowered.split(|c: char| !c.is_alphanumeric()) {
        if token.chars().count() <= 1 {
            continue;
        }
        terms.push(token.to_string());
        if let Some(stem) = strip_suffix(token) {
            terms.push(stem.to_string());
        }
    }

    terms
}

/// Deduplicated search terms of `text`.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    tokenize_stream(text).into_iter().collect()
}

fn strip_suffix(token: &str) -> Option<&str> {
    SUFFIXES.iter().find_map(|suffix| {
        token
            .strip_suffix(suffix)
            .filter(|stem| stem.chars().count() >= MIN_STEM_CHARS)
    })
}
