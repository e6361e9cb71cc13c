//! Turns the extraction collaborator's output into records ready for upsert.

use super::{Category, CategoryClassifier, SubjectResolver};
use crate::config::ImportConfig;
use crate::error::{ExtractionError, JobResult};
use crate::extract::{Extraction, HomeworkExtractor, SubjectBlock};
use chrono::{Days, NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// A subject block after filtering and canonicalization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedRecord {
    /// Canonical subject name (or the cleaned pass-through name).
    pub subject: String,
    /// ISO date (`YYYY-MM-DD`).
    pub date: String,
    /// Trimmed description, also used as the task title.
    pub description: String,
    pub subtasks: Vec<NormalizedSubtask>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedSubtask {
    pub detail: String,
    pub category: Category,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Normalized {
    pub records: Vec<NormalizedRecord>,
    /// Blocks dropped because they announce that nothing was assigned.
    pub skipped: usize,
}

/// Calls the extractor and normalizes what it returns.
pub struct ImportNormalizer {
    extractor: Arc<dyn HomeworkExtractor>,
    subjects: SubjectResolver,
    categories: CategoryClassifier,
    no_homework_phrases: Vec<String>,
    description_limit: usize,
    default_date_offset_days: u64,
}

impl ImportNormalizer {
    pub fn new(extractor: Arc<dyn HomeworkExtractor>, config: &ImportConfig) -> Self {
        Self {
            extractor,
            subjects: SubjectResolver::new(config.subject_threshold),
            categories: CategoryClassifier::new(config.category_threshold),
            no_homework_phrases: config
                .no_homework_phrases
                .iter()
                .map(|p| p.to_lowercase())
                .collect(),
            description_limit: config.description_limit,
            default_date_offset_days: config.default_date_offset_days,
        }
    }

    /// Extract and normalize `raw_text`. Nothing is persisted here.
    pub async fn normalize(&self, raw_text: &str) -> JobResult<Normalized> {
        let extraction = self.extractor.extract(raw_text).await?;
        let today = Utc::now().date_naive();
        Ok(self.normalize_extraction(extraction, today)?)
    }

    /// Normalize an already extracted response. `today` anchors undated blocks.
    pub fn normalize_extraction(
        &self,
        extraction: Extraction,
        today: NaiveDate,
    ) -> Result<Normalized, ExtractionError> {
        if extraction.subjects.is_empty() {
            return Err(ExtractionError::Empty);
        }

        let mut normalized = Normalized::default();
        for block in extraction.subjects {
            if !self.has_homework(&block) {
                debug!(subject = %block.name, "Skipping block without homework");
                normalized.skipped += 1;
                continue;
            }
            normalized.records.push(self.normalize_block(block, today)?);
        }
        Ok(normalized)
    }

    /// A block is dropped only when its single non-blank subtask says nothing
    /// was assigned.
    pub fn has_homework(&self, block: &SubjectBlock) -> bool {
        let mut details = block
            .task
            .subtasks
            .iter()
            .map(|st| st.detail.trim())
            .filter(|detail| !detail.is_empty());
        let (Some(only), None) = (details.next(), details.next()) else {
            return true;
        };
        let detail = only.to_lowercase();
        !self
            .no_homework_phrases
            .iter()
            .any(|phrase| detail.contains(phrase.as_str()))
    }

    fn normalize_block(
        &self,
        block: SubjectBlock,
        today: NaiveDate,
    ) -> Result<NormalizedRecord, ExtractionError> {
        if block.name.trim().is_empty() {
            return Err(ExtractionError::Malformed(
                "subject block without a name".to_string(),
            ));
        }

        let resolved = self.subjects.resolve(&block.name);
        debug!(raw = %block.name, subject = %resolved.name, method = ?resolved.method, "Resolved subject");

        let date = match block.date.as_deref().map(str::trim) {
            Some(date) if !date.is_empty() => NaiveDate::parse_from_str(date, "%Y-%m-%d")
                .map_err(|e| {
                    ExtractionError::Malformed(format!("invalid date '{}': {}", date, e))
                })?,
            _ => today
                .checked_add_days(Days::new(self.default_date_offset_days))
                .unwrap_or(today),
        };

        let subtasks = block
            .task
            .subtasks
            .into_iter()
            .filter(|st| !st.detail.trim().is_empty())
            .map(|st| NormalizedSubtask {
                category: self.categories.classify(&st.detail),
                detail: st.detail.trim().to_string(),
            })
            .collect();

        Ok(NormalizedRecord {
            subject: resolved.name,
            date: date.format("%Y-%m-%d").to_string(),
            description: trim_description(&block.task.description, self.description_limit),
            subtasks,
        })
    }
}

/// Truncate to `limit` characters, marking truncation with "...".
pub fn trim_description(text: &str, limit: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let head: String = text.chars().take(limit).collect();
    format!("{}...", head.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{SubtaskBlock, TaskBlock};
    use async_trait::async_trait;

    struct NeverCalled;

    #[async_trait]
    impl HomeworkExtractor for NeverCalled {
        async fn extract(&self, _raw_text: &str) -> Result<Extraction, ExtractionError> {
            Err(ExtractionError::Network("not used".into()))
        }
    }

    fn normalizer() -> ImportNormalizer {
        ImportNormalizer::new(Arc::new(NeverCalled), &ImportConfig::default())
    }

    fn block(name: &str, date: Option<&str>, details: &[&str]) -> SubjectBlock {
        SubjectBlock {
            name: name.to_string(),
            date: date.map(str::to_string),
            task: TaskBlock {
                description: format!("{} homework", name),
                subtasks: details
                    .iter()
                    .map(|d| SubtaskBlock {
                        type_hint: String::new(),
                        detail: d.to_string(),
                    })
                    .collect(),
            },
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 9, 30).unwrap()
    }

    #[test]
    fn single_no_homework_subtask_is_filtered() {
        let n = normalizer();
        assert!(!n.has_homework(&block("история", None, &["Домашнего задания нет"])));
        assert!(n.has_homework(&block("история", None, &["выучить стих"])));
    }

    #[test]
    fn blank_subtasks_do_not_hide_a_no_homework_note() {
        let n = normalizer();
        assert!(!n.has_homework(&block("история", None, &["", "дз нет", "  "])));

        let extraction = Extraction {
            subjects: vec![block("история", None, &["", "Домашнего задания нет"])],
        };
        let normalized = n.normalize_extraction(extraction, today()).unwrap();
        assert_eq!(normalized.skipped, 1);
        assert!(normalized.records.is_empty());
    }

    #[test]
    fn blocks_with_zero_or_many_subtasks_are_kept() {
        let n = normalizer();
        assert!(n.has_homework(&block("история", None, &[])));
        assert!(n.has_homework(&block(
            "история",
            None,
            &["домашнего задания нет", "принести атлас"]
        )));
    }

    #[test]
    fn filtered_blocks_are_counted_as_skipped() {
        let n = normalizer();
        let extraction = Extraction {
            subjects: vec![
                block("Матеша", Some("2024-10-01"), &["№12, №13"]),
                block("история", None, &["дз нет"]),
            ],
        };
        let normalized = n.normalize_extraction(extraction, today()).unwrap();
        assert_eq!(normalized.skipped, 1);
        assert_eq!(normalized.records.len(), 1);

        let record = &normalized.records[0];
        assert_eq!(record.subject, "математика");
        assert_eq!(record.date, "2024-10-01");
        assert_eq!(record.subtasks[0].category, Category::Exercise);
    }

    #[test]
    fn undated_block_defaults_to_tomorrow() {
        let n = normalizer();
        let extraction = Extraction {
            subjects: vec![block("труд", None, &["принести фартук"])],
        };
        let normalized = n.normalize_extraction(extraction, today()).unwrap();
        assert_eq!(normalized.records[0].date, "2024-10-01");
        assert_eq!(normalized.records[0].subtasks[0].category, Category::Reminder);
    }

    #[test]
    fn invalid_date_is_malformed() {
        let n = normalizer();
        let extraction = Extraction {
            subjects: vec![block("труд", Some("01.10.2024"), &["принести фартук"])],
        };
        let err = n.normalize_extraction(extraction, today()).unwrap_err();
        assert!(matches!(err, ExtractionError::Malformed(_)));
    }

    #[test]
    fn empty_extraction_is_an_error() {
        let n = normalizer();
        let err = n
            .normalize_extraction(Extraction { subjects: vec![] }, today())
            .unwrap_err();
        assert!(matches!(err, ExtractionError::Empty));
    }

    #[test]
    fn trim_description_keeps_short_text() {
        assert_eq!(trim_description("  стр. 106  ", 50), "стр. 106");
    }

    #[test]
    fn trim_description_truncates_by_chars() {
        let long = "Учить записанное в тетрадь; §. 5 (пункты 1,2) - учить и повторить";
        let trimmed = trim_description(long, 50);
        assert!(trimmed.ends_with("..."));
        assert_eq!(trimmed.chars().count(), 53);
    }

    #[tokio::test]
    async fn extractor_failure_propagates() {
        let err = normalizer().normalize("anything").await.unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::ExternalServiceError);
    }
}
