//! HTTP API: job submission and queries plus the internal status channel.
//!
//! Routes:
//! - `POST /jobs` submit a job (`{user_id, type, payload}`)
//! - `GET /jobs?user_id=&status=&type=` list an owner's jobs
//! - `GET /jobs/{id}?user_id=` fetch one job scoped to its owner
//! - `DELETE /jobs/{id}?user_id=` delete one job scoped to its owner
//! - `PATCH /internal/jobs/{id}` move a job forward (requires `x-api-key`)
//! - `GET /health`

use axum::{
    Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, patch},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Notify, watch};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::db::Database;
use crate::db::jobs::Transition;
use crate::error::{ErrorCode, JobError};
use crate::jobs::{self, JobRequest};
use crate::types::{Job, JobStatus};

const API_KEY_HEADER: &str = "x-api-key";

/// Server state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    db: Database,
    /// Wakes the in-process worker after a submission.
    wakeup: Arc<Notify>,
    worker_api_key: Option<Arc<str>>,
}

impl AppState {
    pub fn new(db: Database, wakeup: Arc<Notify>, worker_api_key: Option<String>) -> Self {
        Self {
            db,
            wakeup,
            worker_api_key: worker_api_key.map(Arc::from),
        }
    }
}

/// A [`JobError`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: JobError,
}

impl ApiError {
    fn new(status: StatusCode, error: JobError) -> Self {
        Self { status, error }
    }
}

impl From<JobError> for ApiError {
    fn from(error: JobError) -> Self {
        let status = match error.code {
            ErrorCode::ValidationError | ErrorCode::UnknownJobType => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::ExternalServiceError => StatusCode::BAD_GATEWAY,
            ErrorCode::DatabaseError | ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, error)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        JobError::from(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.error.to_result_value())).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
struct SubmitJobBody {
    user_id: i64,
    #[serde(rename = "type")]
    job_type: String,
    #[serde(default)]
    payload: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct OwnerQuery {
    user_id: i64,
}

#[derive(Debug, Deserialize)]
struct ListJobsQuery {
    user_id: i64,
    status: Option<String>,
    #[serde(rename = "type")]
    job_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateJobBody {
    status: JobStatus,
    #[serde(default)]
    result: Option<Value>,
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

async fn submit_job(
    State(state): State<AppState>,
    Json(body): Json<SubmitJobBody>,
) -> ApiResult<(StatusCode, Json<Job>)> {
    let request = JobRequest::from_parts(&body.job_type, body.payload.as_ref())?;
    let job = jobs::submit(&state.db, body.user_id, &request)?;
    state.wakeup.notify_one();
    Ok((StatusCode::CREATED, Json(job)))
}

async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<Json<Vec<Job>>> {
    let status = query
        .status
        .as_deref()
        .map(|s| {
            JobStatus::parse(s)
                .ok_or_else(|| JobError::validation(format!("unknown job status: {}", s)))
        })
        .transpose()?;
    let jobs = state
        .db
        .list_jobs(query.user_id, status, query.job_type.as_deref())?;
    Ok(Json(jobs))
}

async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
    Query(owner): Query<OwnerQuery>,
) -> ApiResult<Json<Job>> {
    let job = state
        .db
        .get_job_for_owner(job_id, owner.user_id)?
        .ok_or_else(|| JobError::not_found("Job", job_id))?;
    Ok(Json(job))
}

async fn delete_job(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
    Query(owner): Query<OwnerQuery>,
) -> ApiResult<StatusCode> {
    if state.db.delete_job(job_id, owner.user_id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(JobError::not_found("Job", job_id).into())
    }
}

/// Status update channel for out-of-process workers.
async fn update_job(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<UpdateJobBody>,
) -> ApiResult<Json<Job>> {
    let Some(expected) = state.worker_api_key.as_deref() else {
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            JobError::validation("worker status channel is disabled"),
        ));
    };
    let provided = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
    if provided != Some(expected) {
        return Err(ApiError::new(
            StatusCode::UNAUTHORIZED,
            JobError::validation("invalid worker api key"),
        ));
    }

    match state
        .db
        .transition_job(job_id, body.status, body.result.as_ref())?
    {
        Transition::Applied(job) => {
            info!(job_id, status = %job.status, "Job updated by external worker");
            Ok(Json(job))
        }
        Transition::Rejected { current } => Err(JobError::conflict(format!(
            "cannot move job {} from {} to {}",
            job_id, current, body.status
        ))
        .into()),
        Transition::NotFound => Err(JobError::not_found("Job", job_id).into()),
    }
}

/// Build the router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/jobs", get(list_jobs).post(submit_job))
        .route("/jobs/{job_id}", get(get_job).delete(delete_job))
        .route("/internal/jobs/{job_id}", patch(update_job))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` flips to true.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    info!("HTTP API listening on http://{}", addr);

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
            info!("HTTP API shutting down");
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderName, HeaderValue};
    use axum_test::TestServer;

    fn server(api_key: Option<&str>) -> (TestServer, Database) {
        let db = Database::open_in_memory().unwrap();
        let state = AppState::new(
            db.clone(),
            Arc::new(Notify::new()),
            api_key.map(str::to_string),
        );
        (TestServer::new(build_router(state)).unwrap(), db)
    }

    fn import_body(user_id: i64) -> Value {
        json!({
            "user_id": user_id,
            "type": "import_homework",
            "payload": {"raw_text": "Матеша: №12, №13", "child_id": 5}
        })
    }

    #[tokio::test]
    async fn submit_then_fetch_as_owner() {
        let (server, _db) = server(None);

        let response = server.post("/jobs").json(&import_body(1)).await;
        response.assert_status(StatusCode::CREATED);
        let job: Value = response.json();
        assert_eq!(job["status"], "pending");
        let id = job["id"].as_i64().unwrap();

        let fetched = server
            .get(&format!("/jobs/{}", id))
            .add_query_param("user_id", 1)
            .await;
        fetched.assert_status_ok();
        assert_eq!(fetched.json::<Value>()["type"], "import_homework");

        // another user cannot see it
        server
            .get(&format!("/jobs/{}", id))
            .add_query_param("user_id", 2)
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_payload_is_rejected_at_submission() {
        let (server, db) = server(None);
        let response = server
            .post("/jobs")
            .json(&json!({"user_id": 1, "type": "import_homework", "payload": {"raw_text": ""}}))
            .await;
        response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(response.json::<Value>()["error"]["code"], "validation_error");
        assert!(db.list_jobs(1, None, None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let (server, db) = server(None);
        server.post("/jobs").json(&import_body(1)).await;
        server.post("/jobs").json(&import_body(1)).await;
        db.claim_next_job().unwrap();

        let running = server
            .get("/jobs")
            .add_query_param("user_id", 1)
            .add_query_param("status", "running")
            .await;
        assert_eq!(running.json::<Vec<Value>>().len(), 1);

        let all = server.get("/jobs").add_query_param("user_id", 1).await;
        assert_eq!(all.json::<Vec<Value>>().len(), 2);
    }

    #[tokio::test]
    async fn delete_is_scoped_to_owner() {
        let (server, db) = server(None);
        let job: Value = server.post("/jobs").json(&import_body(1)).await.json();
        let path = format!("/jobs/{}", job["id"]);

        server
            .delete(&path)
            .add_query_param("user_id", 2)
            .await
            .assert_status(StatusCode::NOT_FOUND);
        server
            .delete(&path)
            .add_query_param("user_id", 1)
            .await
            .assert_status(StatusCode::NO_CONTENT);
        assert!(db.list_jobs(1, None, None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn internal_patch_requires_key_and_is_monotonic() {
        let (server, db) = server(Some("s3cret"));
        let job: Value = server.post("/jobs").json(&import_body(1)).await.json();
        let path = format!("/internal/jobs/{}", job["id"]);
        let key = HeaderName::from_static(API_KEY_HEADER);

        server
            .patch(&path)
            .json(&json!({"status": "running"}))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);

        server
            .patch(&path)
            .add_header(key.clone(), HeaderValue::from_static("s3cret"))
            .json(&json!({"status": "running"}))
            .await
            .assert_status_ok();

        let done = server
            .patch(&path)
            .add_header(key.clone(), HeaderValue::from_static("s3cret"))
            .json(&json!({"status": "done", "result": {"count": 0}}))
            .await;
        done.assert_status_ok();
        assert_eq!(done.json::<Value>()["result"]["count"], 0);

        // no way back
        server
            .patch(&path)
            .add_header(key, HeaderValue::from_static("s3cret"))
            .json(&json!({"status": "pending"}))
            .await
            .assert_status(StatusCode::CONFLICT);

        let id = job["id"].as_i64().unwrap();
        assert_eq!(db.get_job(id).unwrap().unwrap().status, JobStatus::Done);
    }

    #[tokio::test]
    async fn internal_patch_disabled_without_key() {
        let (server, _db) = server(None);
        server
            .patch("/internal/jobs/1")
            .json(&json!({"status": "running"}))
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (server, _db) = server(None);
        assert_eq!(server.get("/health").await.json::<Value>()["status"], "ok");
    }
}
