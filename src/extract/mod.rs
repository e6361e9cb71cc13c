//! Text-extraction collaborator.
//!
//! The extractor turns raw homework text into subject blocks. It is an
//! opaque external service; the worker only depends on [`HomeworkExtractor`].

mod openai;

pub use openai::OpenAiExtractor;

use crate::error::ExtractionError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Structured response of the extraction service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub subjects: Vec<SubjectBlock>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectBlock {
    pub name: String,
    /// `YYYY-MM-DD` when the text names a due date.
    #[serde(default)]
    pub date: Option<String>,
    pub task: TaskBlock,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskBlock {
    pub description: String,
    #[serde(default)]
    pub subtasks: Vec<SubtaskBlock>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskBlock {
    /// Category suggested by the service; classification uses `detail`.
    #[serde(rename = "type", default)]
    pub type_hint: String,
    pub detail: String,
}

/// Anything that can extract homework structure from free text.
#[async_trait]
pub trait HomeworkExtractor: Send + Sync {
    async fn extract(&self, raw_text: &str) -> Result<Extraction, ExtractionError>;
}

/// Parse an extraction payload from a JSON string.
pub fn parse_extraction(json: &str) -> Result<Extraction, ExtractionError> {
    serde_json::from_str(json).map_err(|e| ExtractionError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_payload() {
        let extraction = parse_extraction(
            r#"{"subjects":[{"name":"История","task":{"description":"§5","subtasks":[{"type":"theory","detail":"учить §5"}]}}]}"#,
        )
        .unwrap();
        let block = &extraction.subjects[0];
        assert_eq!(block.name, "История");
        assert_eq!(block.date, None);
        assert_eq!(block.task.subtasks[0].type_hint, "theory");
    }

    #[test]
    fn missing_task_is_malformed() {
        let err = parse_extraction(r#"{"subjects":[{"name":"История"}]}"#).unwrap_err();
        assert!(matches!(err, ExtractionError::Malformed(_)));
    }
}
