//! Subject name canonicalization.
//!
//! Resolution order:
//! 1. exact match against a canonical name or one of its synonyms
//! 2. fuzzy match against the canonical names, accepted at or above the threshold
//! 3. the cleaned input, unchanged
//!
//! A pass-through name is not guaranteed to exist in the subject catalog;
//! the caller treats a failed lookup as a per-record not-found error.

use super::best_match;
use serde::Serialize;

/// Default fuzzy acceptance threshold (0-100).
pub const DEFAULT_SUBJECT_THRESHOLD: f64 = 70.0;

/// Canonical subject names with their known synonyms and abbreviations.
pub const CANONICAL_SUBJECTS: &[(&str, &[&str])] = &[
    ("математика", &["мат", "мат-ка", "матеша", "мат.", "матем"]),
    ("русский язык", &["рус", "русский", "рус. яз.", "руский"]),
    ("английский язык", &["англ", "английский", "англ. яз.", "инглиш"]),
    ("история", &["ист", "история", "истор"]),
    ("труд", &["труд", "труды", "технология"]),
    ("ИЗО", &["изоша", "изобразительное искусство"]),
    ("биология", &["био", "биол"]),
];

/// How a subject name was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "method")]
pub enum ResolveMethod {
    Exact,
    Synonym,
    Fuzzy { score: f64 },
    Unresolved,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedSubject {
    pub name: String,
    pub method: ResolveMethod,
}

struct Entry {
    canonical: &'static str,
    key: String,
    synonyms: Vec<String>,
}

/// Maps freeform subject names onto the canonical subject names.
pub struct SubjectResolver {
    entries: Vec<Entry>,
    threshold: f64,
}

impl SubjectResolver {
    pub fn new(threshold: f64) -> Self {
        let entries = CANONICAL_SUBJECTS
            .iter()
            .map(|&(canonical, synonyms)| Entry {
                canonical,
                key: clean_name(canonical),
                synonyms: synonyms.iter().map(|s| clean_name(s)).collect(),
            })
            .collect();
        Self { entries, threshold }
    }

    /// Canonical names in declaration order.
    pub fn canonical_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|e| e.canonical)
    }

    pub fn resolve(&self, raw: &str) -> ResolvedSubject {
        let name = clean_name(raw);

        for entry in &self.entries {
            if entry.key == name {
                return ResolvedSubject {
                    name: entry.canonical.to_string(),
                    method: ResolveMethod::Exact,
                };
            }
            if entry.synonyms.iter().any(|s| *s == name) {
                return ResolvedSubject {
                    name: entry.canonical.to_string(),
                    method: ResolveMethod::Synonym,
                };
            }
        }

        let keys = self.entries.iter().map(|e| e.key.as_str());
        if let Some((key, score)) = best_match(&name, keys) {
            if score >= self.threshold {
                if let Some(entry) = self.entries.iter().find(|e| e.key == key) {
                    return ResolvedSubject {
                        name: entry.canonical.to_string(),
                        method: ResolveMethod::Fuzzy { score },
                    };
                }
            }
        }

        ResolvedSubject {
            name,
            method: ResolveMethod::Unresolved,
        }
    }
}

impl Default for SubjectResolver {
    fn default() -> Self {
        Self::new(DEFAULT_SUBJECT_THRESHOLD)
    }
}

/// Lowercase, drop punctuation, collapse whitespace.
pub fn clean_name(raw: &str) -> String {
    let stripped: String = raw
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}
