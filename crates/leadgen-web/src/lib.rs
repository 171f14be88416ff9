//! Axum JSON API over the job dispatcher: submit, inspect, cancel, and
//! list scraping jobs.

use std::sync::Arc;

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use leadgen_core::SearchSpecification;
use leadgen_pipeline::{CancelError, Dispatcher, SubmitError};
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::info;
use uuid::Uuid;

pub const CRATE_NAME: &str = "leadgen-web";

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[derive(Debug, Deserialize, Default)]
struct JobsQuery {
    limit: Option<u32>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/jobs", post(submit_job_handler).get(list_jobs_handler))
        .route("/jobs/{id}", get(job_status_handler))
        .route("/jobs/{id}/cancel", post(cancel_job_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(dispatcher: Arc<Dispatcher>, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "listening");
    axum::serve(listener, app(AppState::new(dispatcher))).await?;
    Ok(())
}

/// Accepts a search specification, queues a job, and returns the pending
/// job record. The job runs asynchronously; poll `GET /jobs/{id}`.
async fn submit_job_handler(
    State(state): State<Arc<AppState>>,
    Json(spec): Json<SearchSpecification>,
) -> Response {
    match state.dispatcher.submit(spec).await {
        Ok(job) => (StatusCode::ACCEPTED, Json(job)).into_response(),
        Err(SubmitError::Validation(err)) => {
            error_response(StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
        }
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

async fn job_status_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<Uuid>,
) -> Response {
    match state.dispatcher.job_status(id).await {
        Ok(Some(job)) => Json(job).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("job {id} not found")),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

async fn cancel_job_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<Uuid>,
) -> Response {
    match state.dispatcher.cancel(id).await {
        Ok(()) => Json(serde_json::json!({ "id": id, "status": "cancelled" })).into_response(),
        Err(err @ CancelError::NotFound(_)) => {
            error_response(StatusCode::NOT_FOUND, err.to_string())
        }
        Err(err @ CancelError::NotCancellable(_, _)) => {
            error_response(StatusCode::CONFLICT, err.to_string())
        }
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

async fn list_jobs_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<JobsQuery>,
) -> Response {
    match state.dispatcher.overview(query.limit.unwrap_or(20)).await {
        Ok(overview) => Json(overview).into_response(),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use http_body_util::BodyExt;
    use leadgen_core::{Job, JobStatus};
    use leadgen_extract::{FixtureExtractor, ListingPage};
    use leadgen_pipeline::{DispatcherConfig, JobPipeline, MemorySink};
    use leadgen_store::{JobPatch, JobRecordStore, MemoryStore};
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_app() -> (Router, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let extractor = Arc::new(FixtureExtractor::new().with_page(ListingPage {
            listings: vec![leadgen_core::RawListing {
                title: "Senior Rust Engineer".to_string(),
                company_name: "Initech".to_string(),
                location: "Berlin".to_string(),
                url: "https://board.example/jobs/1".to_string(),
                salary: None,
            }],
            has_next_page: false,
        }));
        let sink = Arc::new(MemorySink::new());
        let pipeline = Arc::new(JobPipeline::new(store.clone(), extractor, sink));
        let dispatcher = Dispatcher::start(pipeline, DispatcherConfig::default());
        (app(AppState::new(dispatcher)), store)
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn submit_returns_accepted_pending_job() {
        let (app, store) = test_app();
        let resp = app
            .oneshot(post_json(
                "/jobs",
                r#"{"keywords":"rust engineer","location":"Berlin","max_pages":1}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let body = body_json(resp).await;
        assert_eq!(body["status"], "pending");
        let id: Uuid = body["id"].as_str().unwrap().parse().unwrap();

        // The worker picks the job up and runs it to completion.
        for _ in 0..200 {
            let job = store.find_job(id).await.unwrap().unwrap();
            if job.status.is_terminal() {
                assert_eq!(job.status, JobStatus::Completed);
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("submitted job never reached a terminal state");
    }

    #[tokio::test]
    async fn submit_rejects_invalid_specification() {
        let (app, _store) = test_app();
        let resp = app
            .oneshot(post_json(
                "/jobs",
                r#"{"keywords":"   ","location":"Berlin"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = body_json(resp).await;
        assert!(body["error"].as_str().unwrap().contains("keywords"));
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let (app, _store) = test_app();
        let resp = app
            .oneshot(
                Request::builder()
                    .uri(format!("/jobs/{}", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn job_status_reflects_the_store() {
        let (app, store) = test_app();
        let job = Job::new_pending(sample_spec());
        store.create_job(&job).await.unwrap();

        let resp = app
            .oneshot(
                Request::builder()
                    .uri(format!("/jobs/{}", job.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = body_json(resp).await;
        assert_eq!(body["status"], "pending");
        assert_eq!(body["spec"]["keywords"], "rust engineer");
    }

    #[tokio::test]
    async fn cancelling_a_completed_job_conflicts() {
        let (app, store) = test_app();
        let job = Job::new_pending(sample_spec());
        store.create_job(&job).await.unwrap();
        store
            .update_job(job.id, JobPatch::status(JobStatus::Completed))
            .await
            .unwrap();

        let resp = app
            .oneshot(post_json(&format!("/jobs/{}/cancel", job.id), ""))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn cancelling_a_pending_job_succeeds() {
        let (app, store) = test_app();
        let job = Job::new_pending(sample_spec());
        store.create_job(&job).await.unwrap();

        let resp = app
            .oneshot(post_json(&format!("/jobs/{}/cancel", job.id), ""))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let stored = store.find_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn listing_buckets_jobs_by_state() {
        let (app, store) = test_app();
        let pending = Job::new_pending(sample_spec());
        store.create_job(&pending).await.unwrap();
        let done = Job::new_pending(sample_spec());
        store.create_job(&done).await.unwrap();
        store
            .update_job(done.id, JobPatch::status(JobStatus::Failed))
            .await
            .unwrap();

        let resp = app
            .oneshot(Request::builder().uri("/jobs").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = body_json(resp).await;
        assert_eq!(body["active"].as_array().unwrap().len(), 1);
        assert_eq!(body["completed"].as_array().unwrap().len(), 1);
        assert_eq!(body["active"][0]["id"], pending.id.to_string());
    }

    fn sample_spec() -> SearchSpecification {
        SearchSpecification {
            keywords: "rust engineer".to_string(),
            location: "Berlin".to_string(),
            experience_tier: None,
            job_type: None,
            industry: None,
            company_size: None,
            exclude_agencies: true,
            max_pages: 1,
        }
    }
}
