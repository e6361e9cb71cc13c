//! Maps a job's type string to the handler that processes it.

use super::JobRequest;
use crate::error::{JobError, JobResult};
use crate::types::Job;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Processes one kind of job. The returned value becomes the job's `result`.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job, request: JobRequest) -> JobResult<Value>;
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Handler for job type '{0}' is already registered")]
    AlreadyRegistered(String),
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H: JobHandler + 'static>(
        &mut self,
        job_type: &str,
        handler: H,
    ) -> Result<(), RegistryError> {
        if self.handlers.contains_key(job_type) {
            return Err(RegistryError::AlreadyRegistered(job_type.to_string()));
        }
        self.handlers.insert(job_type.to_string(), Arc::new(handler));
        Ok(())
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    /// Registered types, sorted.
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    /// Route a claimed job to its handler.
    ///
    /// An unregistered type fails before anything is decoded or invoked.
    pub async fn dispatch(&self, job: &Job) -> JobResult<Value> {
        let handler = self
            .get(&job.job_type)
            .ok_or_else(|| JobError::unknown_job_type(&job.job_type))?;
        let request = JobRequest::from_job(job)?;
        handler.handle(job, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::jobs::IMPORT_HOMEWORK;
    use crate::types::JobStatus;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingHandler {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        async fn handle(&self, _job: &Job, _request: JobRequest) -> JobResult<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"ok": true}))
        }
    }

    fn job(job_type: &str, payload: Value) -> Job {
        Job {
            id: 1,
            user_id: 1,
            job_type: job_type.to_string(),
            status: JobStatus::Running,
            payload: Some(payload),
            result: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn double_registration_is_rejected() {
        let mut registry = HandlerRegistry::new();
        registry
            .register(IMPORT_HOMEWORK, CountingHandler::default())
            .unwrap();
        let result = registry.register(IMPORT_HOMEWORK, CountingHandler::default());
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(_))));
        assert_eq!(registry.registered_types(), vec![IMPORT_HOMEWORK.to_string()]);
    }

    #[tokio::test]
    async fn unknown_type_never_invokes_a_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new();
        registry
            .register(
                IMPORT_HOMEWORK,
                CountingHandler {
                    calls: calls.clone(),
                },
            )
            .unwrap();

        let err = registry
            .dispatch(&job("send_report", json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownJobType);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn registered_type_reaches_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new();
        registry
            .register(
                IMPORT_HOMEWORK,
                CountingHandler {
                    calls: calls.clone(),
                },
            )
            .unwrap();

        let value = registry
            .dispatch(&job(
                IMPORT_HOMEWORK,
                json!({"raw_text": "труд: фартук", "child_id": 2}),
            ))
            .await
            .unwrap();
        assert_eq!(value["ok"], true);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
