//! Structured error types recorded into failed jobs.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Malformed job payload.
    ValidationError,
    /// A referenced record (usually a subject) does not exist.
    NotFound,
    /// Uniqueness race on the task content hash.
    Conflict,
    /// The text-extraction service was unreachable or returned unusable data.
    ExternalServiceError,
    /// No handler is registered for the job type.
    UnknownJobType,

    DatabaseError,
    InternalError,
}

/// Structured error produced while processing a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl JobError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    // Convenience constructors

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    pub fn subject_not_found(name: &str) -> Self {
        Self::new(ErrorCode::NotFound, format!("Subject not found: {}", name))
    }

    pub fn not_found(what: &str, id: impl fmt::Display) -> Self {
        Self::new(ErrorCode::NotFound, format!("{} not found: {}", what, id))
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    pub fn external(err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::ExternalServiceError, err.to_string())
    }

    pub fn unknown_job_type(job_type: &str) -> Self {
        Self::new(
            ErrorCode::UnknownJobType,
            format!("Unknown job type: {}", job_type),
        )
    }

    pub fn database(err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::DatabaseError, err.to_string())
    }

    pub fn internal(err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::InternalError, err.to_string())
    }

    /// The JSON written into a failed job's `result` column.
    pub fn to_result_value(&self) -> Value {
        json!({ "error": self })
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for JobError {}

// Storage helpers return anyhow; keep an embedded JobError if there is one.
impl From<anyhow::Error> for JobError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<JobError>() {
            Ok(job_err) => job_err,
            Err(err) => match err.downcast::<rusqlite::Error>() {
                Ok(sql_err) => JobError::database(sql_err),
                Err(err) => JobError::internal(err),
            },
        }
    }
}

/// Failures of the text-extraction collaborator.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("Extraction service rejected the credentials: {0}")]
    Auth(String),

    #[error("Extraction service unreachable: {0}")]
    Network(String),

    #[error("Extraction request timed out after {0}s")]
    Timeout(u64),

    #[error("Extraction service returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Malformed extraction response: {0}")]
    Malformed(String),

    #[error("Extraction response contained no subjects")]
    Empty,
}

impl From<ExtractionError> for JobError {
    fn from(err: ExtractionError) -> Self {
        JobError::external(err)
    }
}

/// Result type for job processing.
pub type JobResult<T> = std::result::Result<T, JobError>;
