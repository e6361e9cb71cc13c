//! Job store and lifecycle.
//!
//! Every status change is a conditional `UPDATE` on the current status, so
//! concurrent workers can race on the same row and at most one wins. A job
//! never moves backwards: `pending -> running -> done | failed`.

use super::{Database, now_ms};
use crate::types::{Job, JobStatus};
use anyhow::Result;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use serde_json::Value;

const JOB_COLUMNS: &str = "id, user_id, type, status, payload, result, created_at, updated_at";

fn json_column(row: &Row, idx: usize) -> rusqlite::Result<Option<Value>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        serde_json::from_str(&s)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

pub fn parse_job_row(row: &Row) -> rusqlite::Result<Job> {
    Ok(Job {
        id: row.get(0)?,
        user_id: row.get(1)?,
        job_type: row.get(2)?,
        status: row.get(3)?,
        payload: json_column(row, 4)?,
        result: json_column(row, 5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn get_job_internal(conn: &Connection, job_id: i64) -> Result<Option<Job>> {
    let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![job_id], parse_job_row)
        .optional()?)
}

/// Outcome of a requested status change.
#[derive(Debug, Clone)]
pub enum Transition {
    Applied(Job),
    /// The job exists but its current status does not allow the change.
    Rejected { current: JobStatus },
    NotFound,
}

impl Database {
    /// Insert a new `pending` job.
    pub fn create_job(&self, user_id: i64, job_type: &str, payload: &Value) -> Result<Job> {
        let now = now_ms();
        let payload = serde_json::to_string(payload)?;
        self.with_conn(|conn| {
            let sql = format!(
                "INSERT INTO jobs (user_id, type, status, payload, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 RETURNING {JOB_COLUMNS}"
            );
            let job = conn.query_row(
                &sql,
                params![user_id, job_type, JobStatus::Pending, payload, now],
                parse_job_row,
            )?;
            Ok(job)
        })
    }

    pub fn get_job(&self, job_id: i64) -> Result<Option<Job>> {
        self.with_conn(|conn| get_job_internal(conn, job_id))
    }

    /// Fetch a job only if it belongs to `user_id`.
    pub fn get_job_for_owner(&self, job_id: i64, user_id: i64) -> Result<Option<Job>> {
        Ok(self.get_job(job_id)?.filter(|job| job.user_id == user_id))
    }

    /// List an owner's jobs, newest first.
    pub fn list_jobs(
        &self,
        user_id: i64,
        status: Option<JobStatus>,
        job_type: Option<&str>,
    ) -> Result<Vec<Job>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {JOB_COLUMNS} FROM jobs
                 WHERE user_id = ?1
                   AND (?2 IS NULL OR status = ?2)
                   AND (?3 IS NULL OR type = ?3)
                 ORDER BY created_at DESC, id DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let jobs = stmt
                .query_map(params![user_id, status, job_type], parse_job_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(jobs)
        })
    }

    /// Delete an owner's job. Returns false when no such job exists for that owner.
    pub fn delete_job(&self, job_id: i64, user_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM jobs WHERE id = ?1 AND user_id = ?2",
                params![job_id, user_id],
            )?;
            Ok(deleted > 0)
        })
    }

    /// Claim a specific job. Returns true only for the caller that moved it
    /// from `pending` to `running`.
    pub fn claim_job(&self, job_id: i64) -> Result<bool> {
        let now = now_ms();
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE jobs SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
                params![JobStatus::Running, now, job_id, JobStatus::Pending],
            )?;
            Ok(updated == 1)
        })
    }

    /// Claim the oldest pending job in a single statement.
    pub fn claim_next_job(&self) -> Result<Option<Job>> {
        let now = now_ms();
        self.with_conn(|conn| {
            let sql = format!(
                "UPDATE jobs SET status = ?1, updated_at = ?2
                 WHERE id = (
                     SELECT id FROM jobs WHERE status = ?3
                     ORDER BY created_at ASC, id ASC
                     LIMIT 1
                 )
                 AND status = ?3
                 RETURNING {JOB_COLUMNS}"
            );
            Ok(conn
                .query_row(
                    &sql,
                    params![JobStatus::Running, now, JobStatus::Pending],
                    parse_job_row,
                )
                .optional()?)
        })
    }

    /// Move a job one step forward, writing `result` when given.
    ///
    /// The update is conditional on the status read inside the same
    /// transaction, so a concurrent change turns into `Rejected`.
    pub fn transition_job(
        &self,
        job_id: i64,
        next: JobStatus,
        result: Option<&Value>,
    ) -> Result<Transition> {
        let now = now_ms();
        let result = result.map(serde_json::to_string).transpose()?;
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let Some(current) = get_job_internal(&tx, job_id)? else {
                return Ok(Transition::NotFound);
            };
            if !current.status.can_transition_to(next) {
                return Ok(Transition::Rejected {
                    current: current.status,
                });
            }

            let sql = format!(
                "UPDATE jobs SET status = ?1, result = COALESCE(?2, result), updated_at = ?3
                 WHERE id = ?4 AND status = ?5
                 RETURNING {JOB_COLUMNS}"
            );
            let updated = tx
                .query_row(
                    &sql,
                    params![next, result, now, job_id, current.status],
                    parse_job_row,
                )
                .optional()?;
            tx.commit()?;

            Ok(match updated {
                Some(job) => Transition::Applied(job),
                None => Transition::Rejected {
                    current: current.status,
                },
            })
        })
    }

    /// Finish a running job as `done` or `failed` with its result payload.
    pub fn complete_job(&self, job_id: i64, status: JobStatus, result: &Value) -> Result<Transition> {
        debug_assert!(status.is_terminal());
        self.transition_job(job_id, status, Some(result))
    }
}
