//! Job requests, handlers and the worker loop.
//!
//! A job row stores its type as a string and its payload as JSON.
//! [`JobRequest`] is the typed view of the two together; rows are decoded
//! into it at submission (to reject bad payloads early) and again right
//! before dispatch.

pub mod import;
pub mod registry;
pub mod worker;

pub use import::{ImportHandler, ImportSummary, RecordFailure};
pub use registry::{HandlerRegistry, JobHandler, RegistryError};
pub use worker::Worker;

use crate::db::Database;
use crate::error::{JobError, JobResult};
use crate::types::Job;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const IMPORT_HOMEWORK: &str = "import_homework";

/// Payload of an `import_homework` job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportHomeworkPayload {
    #[serde(alias = "text")]
    pub raw_text: String,
    pub child_id: i64,
}

/// A job's type together with its strongly-typed payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum JobRequest {
    ImportHomework(ImportHomeworkPayload),
}

impl JobRequest {
    pub fn job_type(&self) -> &'static str {
        match self {
            JobRequest::ImportHomework(_) => IMPORT_HOMEWORK,
        }
    }

    /// The payload as stored in the `payload` column.
    pub fn payload(&self) -> JobResult<Value> {
        let value = match self {
            JobRequest::ImportHomework(p) => serde_json::to_value(p),
        };
        value.map_err(JobError::internal)
    }

    /// Decode a stored `(type, payload)` pair.
    pub fn from_parts(job_type: &str, payload: Option<&Value>) -> JobResult<Self> {
        let payload = payload.ok_or_else(|| JobError::validation("job has no payload"))?;
        let request = match job_type {
            IMPORT_HOMEWORK => JobRequest::ImportHomework(
                serde_json::from_value(payload.clone()).map_err(|e| {
                    JobError::validation(format!("invalid {} payload", IMPORT_HOMEWORK))
                        .with_details(e.to_string())
                })?,
            ),
            other => return Err(JobError::unknown_job_type(other)),
        };
        request.validate()?;
        Ok(request)
    }

    pub fn from_job(job: &Job) -> JobResult<Self> {
        Self::from_parts(&job.job_type, job.payload.as_ref())
    }

    pub fn validate(&self) -> JobResult<()> {
        match self {
            JobRequest::ImportHomework(p) => {
                if p.raw_text.trim().is_empty() {
                    return Err(JobError::validation("raw_text must not be empty"));
                }
                Ok(())
            }
        }
    }
}

/// Validate and enqueue a job for `user_id`.
pub fn submit(db: &Database, user_id: i64, request: &JobRequest) -> JobResult<Job> {
    request.validate()?;
    let payload = request.payload()?;
    let job = db.create_job(user_id, request.job_type(), &payload)?;
    tracing::info!(job_id = job.id, job_type = %job.job_type, user_id, "Job submitted");
    Ok(job)
}
