//! Metric classification: block title → [`MetricId`].
//!
//! Classification is a pure normalization over arbitrary title text. There is
//! no closed list of metrics: a new upstream title classifies by the same rule
//! without a code change.
//!
//! Rule:
//! 1. lowercase; `/`, `-`, `_` and whitespace separate words, any other
//!    punctuation is removed
//! 2. drop boilerplate (`average` and filler words)
//! 3. drop `monthly`, the canonical granularity; other granularity words
//!    (`annual`, `weekly`, `daily`, ...) stay so they never collide with it
//! 4. singularize plurals (`returns` → `return`)
//! 5. join with `_`; an empty result is `unclassified`

use crate::domain::MetricId;

const BOILERPLATE: &[&str] = &[
    "average", "the", "a", "an", "and", "or", "of", "to", "in", "for",
];

/// Granularity that needs no marker in the identifier.
const CANONICAL_GRANULARITY: &str = "monthly";

const FALLBACK: &str = "unclassified";

/// Classify a block title into a metric identifier. Total: never fails.
pub fn classify(title: &str) -> MetricId {
    let lowered = title.to_lowercase();
    let mut cleaned = String::with_capacity(lowered.len());
    for ch in lowered.chars() {
        if ch.is_alphanumeric() {
            cleaned.push(ch);
        } else if ch.is_whitespace() || matches!(ch, '/' | '-' | '_') {
            cleaned.push(' ');
        }
    }

    let tokens: Vec<String> = cleaned
        .split_whitespace()
        .filter(|w| !BOILERPLATE.contains(w) && *w != CANONICAL_GRANULARITY)
        .map(singularize)
        .collect();

    if tokens.is_empty() {
        MetricId(FALLBACK.to_string())
    } else {
        MetricId(tokens.join("_"))
    }
}

fn singularize(word: &str) -> String {
    let keeps_s = word.ends_with("ss") || word.ends_with("us") || word.ends_with("is");
    if word.len() > 3 && word.ends_with('s') && !keeps_s {
        word[..word.len() - 1].to_string()
    } else {
        word.to_string()
    }
}
