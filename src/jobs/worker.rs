//! Polling worker.
//!
//! One job at a time: claim the oldest pending job, dispatch it, record the
//! outcome, repeat. Between empty polls the worker sleeps for the poll
//! interval or until a submission wakes it. Shutdown is observed between
//! jobs; a job in flight always runs to completion.

use super::HandlerRegistry;
use crate::db::Database;
use crate::db::jobs::Transition;
use crate::error::JobError;
use crate::types::{Job, JobStatus};
use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Notify, watch};
use tracing::{debug, error, info, warn};

/// Attempts at writing a job's final status before it is left `running`.
const RECORD_ATTEMPTS: u32 = 3;
const RECORD_RETRY_DELAY: Duration = Duration::from_millis(200);

pub struct Worker {
    db: Database,
    registry: Arc<HandlerRegistry>,
    poll_interval: Duration,
    wakeup: Arc<Notify>,
}

impl Worker {
    pub fn new(db: Database, registry: Arc<HandlerRegistry>, poll_interval: Duration) -> Self {
        Self {
            db,
            registry,
            poll_interval,
            wakeup: Arc::new(Notify::new()),
        }
    }

    /// Handle that submitters signal to skip the rest of the poll sleep.
    pub fn wakeup(&self) -> Arc<Notify> {
        self.wakeup.clone()
    }

    /// Claim and process at most one job. Returns the id of the processed job.
    pub async fn run_once(&self) -> Result<Option<i64>> {
        let Some(job) = self.db.claim_next_job()? else {
            return Ok(None);
        };
        let job_id = job.id;
        self.process(job).await?;
        Ok(Some(job_id))
    }

    /// Run a claimed job and write its final status.
    pub async fn process(&self, job: Job) -> Result<()> {
        let started = Instant::now();
        info!(job_id = job.id, job_type = %job.job_type, user_id = job.user_id, "Processing job");

        // Dispatch on its own task so a panicking handler fails the job
        // instead of taking the loop down.
        let registry = self.registry.clone();
        let claimed = job.clone();
        let outcome = tokio::spawn(async move { registry.dispatch(&claimed).await })
            .await
            .unwrap_or_else(|e| Err(JobError::internal(format!("job handler panicked: {}", e))));

        let duration_ms = started.elapsed().as_millis() as u64;
        let (status, result) = match outcome {
            Ok(value) => (JobStatus::Done, value),
            Err(err) => {
                warn!(job_id = job.id, code = ?err.code, error = %err, duration_ms, "Job failed");
                (JobStatus::Failed, err.to_result_value())
            }
        };

        let db = &self.db;
        let recorded = retry_write(job.id, RECORD_ATTEMPTS, RECORD_RETRY_DELAY, || {
            db.complete_job(job.id, status, &result)
        })
        .await?;
        match recorded {
            Transition::Applied(job) => {
                info!(job_id = job.id, status = %job.status, duration_ms, "Job finished");
            }
            Transition::Rejected { current } => {
                warn!(job_id = job.id, current = %current, "Job status changed underneath the worker");
            }
            Transition::NotFound => {
                warn!(job_id = job.id, "Job was deleted while running");
            }
        }
        Ok(())
    }

    /// Poll until `shutdown` flips to true (or its sender goes away).
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            handlers = ?self.registry.registered_types(),
            "Worker started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_once().await {
                // keep draining while there is work
                Ok(Some(_)) => continue,
                Ok(None) => debug!("No pending jobs"),
                Err(e) => error!(error = %e, "Worker iteration failed"),
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = self.wakeup.notified() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!("Worker stopped");
    }
}

/// Run a database write, retrying failures (SQLITE_BUSY past the busy
/// timeout, mostly) with a linear backoff.
async fn retry_write<T, F>(job_id: i64, attempts: u32, delay: Duration, mut write: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut attempt = 1;
    loop {
        match write() {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                warn!(job_id, attempt, error = %e, "Recording job outcome failed, retrying");
                tokio::time::sleep(delay * attempt).await;
                attempt += 1;
            }
            Err(e) => {
                error!(job_id, attempts = attempt, error = %e, "Could not record job outcome, job stays running");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    const DELAY: Duration = Duration::from_millis(1);

    #[tokio::test]
    async fn retry_write_recovers_from_transient_failures() {
        let mut calls = 0;
        let value = retry_write(7, 3, DELAY, || {
            calls += 1;
            if calls < 3 {
                Err(anyhow!("database is locked"))
            } else {
                Ok(calls)
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 3);
    }

    #[tokio::test]
    async fn retry_write_gives_up_after_the_last_attempt() {
        let mut calls = 0;
        let result: Result<()> = retry_write(7, 3, DELAY, || {
            calls += 1;
            Err(anyhow!("database is locked"))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }
}
