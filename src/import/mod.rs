//! Normalization of extracted homework into canonical subject/category data.
//!
//! Everything here is pure except [`ImportNormalizer::normalize`], which calls
//! the text-extraction collaborator.

pub mod categories;
pub mod normalizer;
pub mod status;
pub mod subjects;

pub use categories::{Category, CategoryClassifier};
pub use normalizer::{ImportNormalizer, Normalized, NormalizedRecord, NormalizedSubtask};
pub use status::aggregate;
pub use subjects::{ResolveMethod, ResolvedSubject, SubjectResolver};

/// Similarity of two strings on a 0-100 scale.
///
/// Weighted like a WRatio: the plain ratio, or for strings of similar length
/// the word-order-insensitive ratio (x0.95). When one string is at least 1.5
/// times longer, the best window of the longer string counts too, scaled by
/// 0.9 (0.6 from 8 times longer). So "математика 5 класс" still scores 90
/// against "математика".
pub fn similarity(a: &str, b: &str) -> f64 {
    let full = ratio(a, b);
    let (len_a, len_b) = (a.chars().count(), b.chars().count());
    let (shorter, longer, short_len, long_len) = if len_a <= len_b {
        (a, b, len_a, len_b)
    } else {
        (b, a, len_b, len_a)
    };
    if short_len == 0 {
        return full;
    }

    let len_ratio = long_len as f64 / short_len as f64;
    if len_ratio < 1.5 {
        return full.max(token_sort_ratio(a, b) * 0.95);
    }
    let scale = if len_ratio < 8.0 { 0.9 } else { 0.6 };
    full.max(partial_ratio(shorter, longer) * scale)
}

/// Normalized Levenshtein over chars, 0-100.
pub fn ratio(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b) * 100.0
}

/// Best ratio of `shorter` against every window of `longer` of the same length.
pub fn partial_ratio(shorter: &str, longer: &str) -> f64 {
    let window = shorter.chars().count();
    let chars: Vec<char> = longer.chars().collect();
    if window == 0 || window >= chars.len() {
        return ratio(shorter, longer);
    }
    chars
        .windows(window)
        .map(|w| ratio(shorter, &w.iter().collect::<String>()))
        .fold(0.0, f64::max)
}

/// Ratio after sorting whitespace-separated words.
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    fn sorted(s: &str) -> String {
        let mut words: Vec<&str> = s.split_whitespace().collect();
        words.sort_unstable();
        words.join(" ")
    }
    ratio(&sorted(a), &sorted(b))
}

/// Best scoring choice for `query`. Ties keep the earliest choice.
pub fn best_match<'a, I>(query: &str, choices: I) -> Option<(&'a str, f64)>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<(&'a str, f64)> = None;
    for choice in choices {
        let score = similarity(query, choice);
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((choice, score)),
        }
    }
    best
}
