//! The `import_homework` handler.
//!
//! Extraction and normalization happen before anything is written, so an
//! extractor failure leaves the database untouched. Records are then
//! upserted one by one; a subject missing from the catalog fails only its
//! own record.

use super::{JobHandler, JobRequest};
use crate::db::Database;
use crate::error::{ErrorCode, JobError, JobResult};
use crate::import::{ImportNormalizer, NormalizedRecord};
use crate::types::{Job, SubtaskDraft, TaskDraft, UpsertOutcome, UpsertResult};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

/// A record that could not be persisted.
#[derive(Debug, Clone, Serialize)]
pub struct RecordFailure {
    pub subject: String,
    pub error: JobError,
}

/// Result payload of a finished import job.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportSummary {
    /// Records persisted in any form.
    pub count: usize,
    pub created: usize,
    pub updated: usize,
    pub duplicate: usize,
    /// Blocks dropped by the homework-presence filter.
    pub skipped: usize,
    pub records: Vec<UpsertResult>,
    pub errors: Vec<RecordFailure>,
}

impl ImportSummary {
    fn push(&mut self, result: UpsertResult) {
        match result.outcome {
            UpsertOutcome::Created => self.created += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Duplicate => self.duplicate += 1,
        }
        self.count += 1;
        self.records.push(result);
    }
}

pub struct ImportHandler {
    db: Database,
    normalizer: ImportNormalizer,
}

impl ImportHandler {
    pub fn new(db: Database, normalizer: ImportNormalizer) -> Self {
        Self { db, normalizer }
    }

    /// Turn normalized records into tasks for `child_id`.
    pub fn persist(
        &self,
        child_id: i64,
        records: Vec<NormalizedRecord>,
        summary: &mut ImportSummary,
    ) -> JobResult<()> {
        for record in records {
            let subject = record.subject.clone();
            match self.persist_record(child_id, record) {
                Ok(result) => {
                    info!(
                        task_id = result.task.id,
                        subject = %subject,
                        outcome = result.outcome.as_str(),
                        "Imported record"
                    );
                    summary.push(result);
                }
                Err(error) if error.code == ErrorCode::NotFound => {
                    warn!(subject = %subject, error = %error, "Skipping record");
                    summary.errors.push(RecordFailure { subject, error });
                }
                Err(error) => return Err(error),
            }
        }
        Ok(())
    }

    fn persist_record(&self, child_id: i64, record: NormalizedRecord) -> JobResult<UpsertResult> {
        let subject = self
            .db
            .find_subject_by_name(&record.subject)?
            .ok_or_else(|| JobError::subject_not_found(&record.subject))?;

        let draft = TaskDraft {
            child_id,
            subject_id: subject.id,
            date: record.date,
            description: record.description,
            subtasks: record
                .subtasks
                .into_iter()
                .map(|st| SubtaskDraft {
                    title: st.detail,
                    category: Some(st.category.as_str().to_string()),
                })
                .collect(),
        };
        Ok(self.db.upsert_task(&draft)?)
    }
}

#[async_trait]
impl JobHandler for ImportHandler {
    async fn handle(&self, job: &Job, request: JobRequest) -> JobResult<Value> {
        let JobRequest::ImportHomework(payload) = request;

        let normalized = self.normalizer.normalize(&payload.raw_text).await?;
        let mut summary = ImportSummary {
            skipped: normalized.skipped,
            ..Default::default()
        };
        self.persist(payload.child_id, normalized.records, &mut summary)?;

        info!(
            job_id = job.id,
            created = summary.created,
            updated = summary.updated,
            duplicate = summary.duplicate,
            skipped = summary.skipped,
            failed_records = summary.errors.len(),
            "Import finished"
        );
        serde_json::to_value(&summary).map_err(JobError::internal)
    }
}
