//! Subtask category classification.
//!
//! Categories are scanned in the order of [`CATEGORY_KEYWORDS`], and keywords
//! within a category in their listed order. The first keyword found as a
//! substring of the lowercased text wins, so when two categories could both
//! match ("выполнить задание в файле" hits both `exercise` and `file`) the
//! earlier category is chosen.

use super::best_match;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default fuzzy acceptance threshold (0-100).
pub const DEFAULT_CATEGORY_THRESHOLD: f64 = 80.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Exercise,
    Theory,
    Dictation,
    Map,
    Drawing,
    Reminder,
    File,
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Exercise => "exercise",
            Category::Theory => "theory",
            Category::Dictation => "dictation",
            Category::Map => "map",
            Category::Drawing => "drawing",
            Category::Reminder => "reminder",
            Category::File => "file",
            Category::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed taxonomy in scan order. `other` has no keywords.
pub const CATEGORY_KEYWORDS: &[(Category, &[&str])] = &[
    (
        Category::Exercise,
        &["пример", "упр", "задача", "решить", "номер", "#", "№", "выполнить", "написать"],
    ),
    (
        Category::Theory,
        &["выучить", "повторить", "прочитать", "пересказ", "учить"],
    ),
    (Category::Dictation, &["диктант", "словарь"]),
    (Category::Map, &["карта", "атлас", "контурная карта"]),
    (Category::Drawing, &["чертеж", "рисунок"]),
    (Category::Reminder, &["принести", "взять с собой"]),
    (
        Category::File,
        &["см файл", "выполнить задание в файле", "файл"],
    ),
];

/// Classifies subtask text into the fixed category taxonomy.
pub struct CategoryClassifier {
    threshold: f64,
}

impl CategoryClassifier {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn classify(&self, text: &str) -> Category {
        let text = text.trim().to_lowercase();

        for (category, keywords) in CATEGORY_KEYWORDS {
            if keywords.iter().any(|kw| text.contains(kw)) {
                return *category;
            }
        }

        let all_keywords = CATEGORY_KEYWORDS
            .iter()
            .flat_map(|(_, keywords)| keywords.iter().copied());
        if let Some((keyword, score)) = best_match(&text, all_keywords) {
            if score >= self.threshold {
                return category_of(keyword);
            }
        }

        Category::Other
    }
}

impl Default for CategoryClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_CATEGORY_THRESHOLD)
    }
}

fn category_of(keyword: &str) -> Category {
    CATEGORY_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.contains(&keyword))
        .map(|(category, _)| *category)
        .unwrap_or(Category::Other)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_sign_is_exercise() {
        let classifier = CategoryClassifier::default();
        assert_eq!(classifier.classify("№12, 14 на стр. 30"), Category::Exercise);
    }

    #[test]
    fn memorize_is_theory() {
        let classifier = CategoryClassifier::default();
        assert_eq!(classifier.classify("Выучить стихотворение"), Category::Theory);
    }

    #[test]
    fn earlier_category_wins_overlapping_keywords() {
        let classifier = CategoryClassifier::default();
        assert_eq!(
            classifier.classify("выполнить задание в файле"),
            Category::Exercise
        );
        assert_eq!(classifier.classify("см файл"), Category::File);
    }

    #[test]
    fn contour_map_is_map() {
        let classifier = CategoryClassifier::default();
        assert_eq!(
            classifier.classify("Заполнить контурную карту, используя атлас"),
            Category::Map
        );
    }

    #[test]
    fn misspelled_keyword_matches_fuzzily() {
        let classifier = CategoryClassifier::default();
        // "диктнт": one deletion from "диктант"
        assert_eq!(classifier.classify("диктнт"), Category::Dictation);
    }

    #[test]
    fn unrelated_text_is_other() {
        let classifier = CategoryClassifier::default();
        assert_eq!(classifier.classify("купить хлеб"), Category::Other);
    }
}
