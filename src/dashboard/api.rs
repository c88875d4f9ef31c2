use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        FromRequest, FromRequestParts, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use devboard_common::Job;
use serde::Deserialize;
use tracing::error;

use super::service::DashboardService;
use super::sse;

use crate::clients::{ClientError, CreatePullRequest};
use crate::config::SettingsUpdate;
use crate::errors::DashboardError;
use crate::jobs::{
    AiJobRequest, DeployJobRequest, JobLauncher, JobTracker, LaunchRequest, PlaywrightJobRequest,
};
use crate::notes::NoteKind;
use crate::polling::PollingRefresher;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub service: Arc<DashboardService>,
    pub jobs: Arc<JobTracker>,
    pub launcher: JobLauncher,
    pub poller: PollingRefresher,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct TransitionRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct TextRequest {
    pub text: String,
}

#[derive(Deserialize)]
pub struct NoteRequest {
    pub content: String,
}

#[derive(Deserialize)]
pub struct SearchQuery {
    pub jql: String,
    pub limit: Option<u32>,
}

#[derive(Deserialize)]
pub struct ReviewerQuery {
    #[serde(default)]
    pub q: String,
}

#[derive(Deserialize)]
pub struct LimitQuery {
    pub limit: Option<u32>,
}

const DEFAULT_SEARCH_LIMIT: u32 = 50;
const DEFAULT_LIST_LIMIT: u32 = 20;

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<DashboardError> for ApiError {
    fn from(err: DashboardError) -> Self {
        let message = err.to_string();
        match err {
            DashboardError::NotConfigured { .. }
            | DashboardError::InvalidNoteKind(_)
            | DashboardError::BadRequest(_) => ApiError::BadRequest(message),
            DashboardError::JobNotFound { .. } | DashboardError::NoteNotFound { .. } => {
                ApiError::NotFound(message)
            }
            DashboardError::Client(client) => match client {
                ClientError::NotFound { .. } => ApiError::NotFound(message),
                ClientError::NotConfigured(_)
                | ClientError::NoTransition { .. }
                | ClientError::InvalidIdentifier { .. } => ApiError::BadRequest(message),
                _ => ApiError::Internal(message),
            },
            DashboardError::Io(_) | DashboardError::Other(_) => {
                error!("internal error: {}", message);
                ApiError::Internal(message)
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

// ── Extractors ────────────────────────────────────────────────────────
//
// Wrappers around axum's extractors whose rejections render as `ApiError`.

#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/settings", get(get_settings).put(update_settings))
        .route("/api/refresh", post(refresh))
        .route("/api/cache/info", get(cache_info))
        .route("/api/tickets", get(list_tickets))
        .route("/api/tickets/mine", get(my_tickets))
        .route("/api/tickets/search", get(search_tickets))
        .route("/api/tickets/{key}", get(get_ticket))
        .route("/api/tickets/{key}/transition", post(transition_ticket))
        .route("/api/tickets/{key}/description", put(update_ticket_description))
        .route("/api/tickets/{key}/assign", post(assign_ticket))
        .route("/api/tickets/{key}/unassign", post(unassign_ticket))
        .route("/api/tickets/{key}/comments", post(comment_on_ticket))
        .route("/api/prs", get(list_prs).post(create_pr))
        .route("/api/prs/{id}", get(get_pr))
        .route("/api/prs/{id}/description", put(update_pr_description))
        .route("/api/prs/{id}/checks", get(pr_checks))
        .route("/api/prs/{id}/statuses", get(pr_statuses))
        .route("/api/prs/{id}/threads", get(pr_threads))
        .route(
            "/api/prs/{id}/reviewers/{reviewer_id}",
            post(add_reviewer).delete(remove_reviewer),
        )
        .route("/api/reviewers/search", get(search_reviewers))
        .route("/api/builds", get(list_builds))
        .route("/api/test-runs", get(list_test_runs))
        .route("/api/notes", get(list_notes))
        .route(
            "/api/notes/{kind}/{id}",
            get(get_note).put(save_note).delete(delete_note),
        )
        .route("/api/jobs", get(list_jobs))
        .route("/api/jobs/ai", post(start_ai_job))
        .route("/api/jobs/playwright", post(start_playwright_job))
        .route("/api/jobs/deploy", post(start_deploy_job))
        .route("/api/jobs/{id}", get(get_job))
        .route("/api/jobs/{id}/output", get(sse::job_output))
        .route("/api/jobs/{id}/cancel", post(cancel_job))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn get_settings(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.service.settings().masked())
}

async fn update_settings(
    State(state): State<SharedState>,
    ApiJson(update): ApiJson<SettingsUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let masked = state.service.update_settings(update)?;
    state.poller.restart(state.service.poll_interval_minutes());
    Ok(Json(masked))
}

async fn refresh(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.service.refresh().await?;
    // Manual refresh resets the countdown to the next tick
    state.poller.restart(state.service.poll_interval_minutes());
    Ok(Json(outcome))
}

async fn cache_info(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.service.cache_info())
}

async fn list_tickets(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.tickets_with_prs().await?))
}

async fn my_tickets(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.my_tickets().await?))
}

async fn search_tickets(
    State(state): State<SharedState>,
    ApiQuery(query): ApiQuery<SearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
    Ok(Json(state.service.search_tickets(&query.jql, limit).await?))
}

async fn get_ticket(
    State(state): State<SharedState>,
    ApiPath(key): ApiPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.ticket(&key).await?))
}

async fn transition_ticket(
    State(state): State<SharedState>,
    ApiPath(key): ApiPath<String>,
    ApiJson(req): ApiJson<TransitionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("Transition name is required".into()));
    }
    Ok(Json(state.service.transition_ticket(&key, &req.name).await?))
}

async fn update_ticket_description(
    State(state): State<SharedState>,
    ApiPath(key): ApiPath<String>,
    ApiJson(req): ApiJson<TextRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .service
        .update_ticket_description(&key, &req.text)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn assign_ticket(
    State(state): State<SharedState>,
    ApiPath(key): ApiPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.service.assign_ticket(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn unassign_ticket(
    State(state): State<SharedState>,
    ApiPath(key): ApiPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.service.unassign_ticket(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn comment_on_ticket(
    State(state): State<SharedState>,
    ApiPath(key): ApiPath<String>,
    ApiJson(req): ApiJson<TextRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = state.service.comment_on_ticket(&key, &req.text).await?;
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "id": id }))))
}

async fn list_prs(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.prs_with_tickets().await?))
}

async fn create_pr(
    State(state): State<SharedState>,
    ApiJson(req): ApiJson<CreatePullRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let pr = state.service.create_pull_request(&req).await?;
    Ok((StatusCode::CREATED, Json(pr)))
}

async fn get_pr(
    State(state): State<SharedState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.pull_request(id).await?))
}

async fn update_pr_description(
    State(state): State<SharedState>,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<TextRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.update_pr_description(id, &req.text).await?))
}

async fn pr_checks(
    State(state): State<SharedState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.pr_checks(id).await?))
}

async fn pr_statuses(
    State(state): State<SharedState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.pr_statuses(id).await?))
}

async fn pr_threads(
    State(state): State<SharedState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.pr_threads(id).await?))
}

async fn add_reviewer(
    State(state): State<SharedState>,
    ApiPath((id, reviewer_id)): ApiPath<(i64, String)>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.add_reviewer(id, &reviewer_id).await?))
}

async fn remove_reviewer(
    State(state): State<SharedState>,
    ApiPath((id, reviewer_id)): ApiPath<(i64, String)>,
) -> Result<impl IntoResponse, ApiError> {
    state.service.remove_reviewer(id, &reviewer_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn search_reviewers(
    State(state): State<SharedState>,
    ApiQuery(query): ApiQuery<ReviewerQuery>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.search_reviewers(&query.q).await?))
}

async fn list_builds(
    State(state): State<SharedState>,
    ApiQuery(query): ApiQuery<LimitQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    Ok(Json(state.service.builds(limit).await?))
}

async fn list_test_runs(
    State(state): State<SharedState>,
    ApiQuery(query): ApiQuery<LimitQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    Ok(Json(state.service.test_runs(limit).await?))
}

async fn list_notes(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.notes().list().await?))
}

async fn get_note(
    State(state): State<SharedState>,
    ApiPath((kind, id)): ApiPath<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let kind: NoteKind = kind.parse()?;
    Ok(Json(state.service.notes().get(kind, &id).await?))
}

async fn save_note(
    State(state): State<SharedState>,
    ApiPath((kind, id)): ApiPath<(String, String)>,
    ApiJson(req): ApiJson<NoteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let kind: NoteKind = kind.parse()?;
    Ok(Json(state.service.notes().save(kind, &id, &req.content).await?))
}

async fn delete_note(
    State(state): State<SharedState>,
    ApiPath((kind, id)): ApiPath<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let kind: NoteKind = kind.parse()?;
    state.service.notes().delete(kind, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_jobs(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.jobs.list())
}

fn launch(state: &SharedState, request: LaunchRequest) -> Result<(StatusCode, Json<Job>), ApiError> {
    let job = state
        .launcher
        .launch(request, &state.service.job_commands())?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

async fn start_ai_job(
    State(state): State<SharedState>,
    ApiJson(req): ApiJson<AiJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    launch(&state, LaunchRequest::Ai(req))
}

async fn start_playwright_job(
    State(state): State<SharedState>,
    ApiJson(req): ApiJson<PlaywrightJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    launch(&state, LaunchRequest::Playwright(req))
}

async fn start_deploy_job(
    State(state): State<SharedState>,
    ApiJson(req): ApiJson<DeployJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    launch(&state, LaunchRequest::Deploy(req))
}

async fn get_job(
    State(state): State<SharedState>,
    ApiPath(id): ApiPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    match state.jobs.get(&id) {
        Some(job) => Ok(Json(job)),
        None => Err(DashboardError::JobNotFound { id }.into()),
    }
}

async fn cancel_job(
    State(state): State<SharedState>,
    ApiPath(id): ApiPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.jobs.cancel(&id)?))
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::fake::{FakeCodeHost, FakeTracker, pull_request, ticket};
    use crate::config::Config;
    use axum::body::Body;
    use axum::http::Request;
    use devboard_common::JobStatus;
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct TestApp {
        _dir: TempDir,
        router: Router,
        state: SharedState,
    }

    fn build_state(service: DashboardService) -> SharedState {
        crate::dashboard::server::build_state(Arc::new(service))
    }

    fn test_app() -> TestApp {
        app_with_tracker(FakeTracker::with_tickets(vec![
            ticket("ABC-1", "login"),
            ticket("ABC-2", "logout"),
        ]))
    }

    fn app_with_tracker(tracker: FakeTracker) -> TestApp {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".devboard")).unwrap();
        std::fs::write(
            dir.path().join(".devboard/config.toml"),
            format!(
                "[notes]\ndir = {:?}\n\n[jobs]\ndeploy_cmd = \"echo shipped $DEPLOY_TARGET\"\n",
                dir.path().join("notes")
            ),
        )
        .unwrap();
        let config = Config::load(dir.path().to_path_buf()).unwrap();
        let tracker = Arc::new(tracker);
        let code_host = Arc::new(FakeCodeHost::with_prs(vec![
            pull_request(10, "ABC-1: login page", "feature/login"),
            pull_request(11, "Refactor", "chore/refactor"),
        ]));
        let service = DashboardService::with_backends(config, Some(tracker), Some(code_host));
        let state = build_state(service);
        TestApp {
            _dir: dir,
            router: api_router().with_state(state.clone()),
            state,
        }
    }

    fn unconfigured_app() -> TestApp {
        let dir = TempDir::new().unwrap();
        let config = Config::load(dir.path().to_path_buf()).unwrap();
        let service = DashboardService::with_env(config, Arc::new(|_| None));
        let state = build_state(service);
        TestApp {
            _dir: dir,
            router: api_router().with_state(state.clone()),
            state,
        }
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn send(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = test_app();
        let response = app.router.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_list_tickets_links_prs() {
        let app = test_app();
        let response = app.router.oneshot(get("/api/tickets")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body[0]["key"], "ABC-1");
        assert_eq!(body[0]["linkedPR"]["pullRequestId"], 10);
        assert!(body[1]["linkedPR"].is_null());
    }

    #[tokio::test]
    async fn test_list_prs_links_tickets() {
        let app = test_app();
        let response = app.router.oneshot(get("/api/prs")).await.unwrap();
        let body = body_json(response).await;
        assert_eq!(body[0]["linkedTicket"]["key"], "ABC-1");
        assert!(body[1]["linkedTicket"].is_null());
    }

    #[tokio::test]
    async fn test_unconfigured_reads_return_empty_lists() {
        let app = unconfigured_app();
        for uri in ["/api/tickets", "/api/prs", "/api/builds", "/api/test-runs"] {
            let response = app.router.clone().oneshot(get(uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{}", uri);
            assert_eq!(body_json(response).await, serde_json::json!([]));
        }
    }

    #[tokio::test]
    async fn test_unconfigured_write_is_bad_request() {
        let app = unconfigured_app();
        let response = app
            .router
            .oneshot(send(
                "POST",
                "/api/tickets/ABC-1/transition",
                serde_json::json!({"name": "Done"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("not configured"));
    }

    #[tokio::test]
    async fn test_get_ticket_not_found() {
        let app = test_app();
        let response = app.router.oneshot(get("/api/tickets/NOPE-9")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_transition_ticket() {
        let app = test_app();
        let response = app
            .router
            .oneshot(send(
                "POST",
                "/api/tickets/ABC-2/transition",
                serde_json::json!({"name": "In Progress"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["fields"]["status"]["name"], "In Progress");
    }

    #[tokio::test]
    async fn test_refresh_and_cache_info() {
        let app = test_app();
        let response = app
            .router
            .clone()
            .oneshot(send("POST", "/api/refresh", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "refreshed");
        assert_eq!(body["tickets"], 2);
        assert!(app.state.poller.is_running());

        let info = body_json(app.router.oneshot(get("/api/cache/info")).await.unwrap()).await;
        assert_eq!(info["tickets"]["isExpired"], false);
    }

    #[tokio::test]
    async fn test_create_pr() {
        let app = test_app();
        let response = app
            .router
            .oneshot(send(
                "POST",
                "/api/prs",
                serde_json::json!({
                    "sourceBranch": "feature/ABC-2-logout",
                    "targetBranch": "main",
                    "title": "Logout button"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["pullRequestId"], 12);
        assert_eq!(body["linkedTicket"]["key"], "ABC-2");
    }

    #[tokio::test]
    async fn test_reviewers_round_trip() {
        let app = test_app();
        let response = app
            .router
            .clone()
            .oneshot(send("POST", "/api/prs/10/reviewers/r-1", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["id"], "r-1");

        let response = app
            .router
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/prs/10/reviewers/r-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_notes_crud() {
        let app = test_app();
        let response = app
            .router
            .clone()
            .oneshot(send(
                "PUT",
                "/api/notes/ticket/ABC-1",
                serde_json::json!({"content": "remember the edge case"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let note = body_json(app.router.clone().oneshot(get("/api/notes/ticket/ABC-1")).await.unwrap()).await;
        assert_eq!(note["content"], "remember the edge case");
        assert_eq!(note["kind"], "ticket");

        let list = body_json(app.router.clone().oneshot(get("/api/notes")).await.unwrap()).await;
        assert_eq!(list.as_array().unwrap().len(), 1);

        let response = app
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/notes/ticket/ABC-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app.router.oneshot(get("/api/notes/ticket/ABC-1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_note_kind() {
        let app = test_app();
        let response = app.router.oneshot(get("/api/notes/wiki/home")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let app = test_app();
        for uri in ["/api/jobs/missing", "/api/jobs/missing/output"] {
            let response = app.router.clone().oneshot(get(uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", uri);
        }
        let response = app
            .router
            .oneshot(send("POST", "/api/jobs/missing/cancel", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cancel_job() {
        let app = test_app();
        let job = app.state.jobs.create_job(devboard_common::JobKind::Ai, "ABC-1");
        let response = app
            .router
            .oneshot(send(
                "POST",
                &format!("/api/jobs/{}/cancel", job.id),
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "cancelled");
    }

    #[tokio::test]
    async fn test_job_output_stream_replays_and_ends() {
        let app = test_app();
        let job = app.state.jobs.create_job(devboard_common::JobKind::Deploy, "web");
        app.state.jobs.append_output(&job.id, "step 1".to_string());
        app.state.jobs.append_output(&job.id, "step 2".to_string());
        app.state
            .jobs
            .update_status(&job.id, JobStatus::Completed, None);

        let response = app
            .router
            .oneshot(get(&format!("/api/jobs/{}/output", job.id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("event: line\ndata: step 1"));
        assert!(text.contains("data: step 2"));
        assert!(text.contains("event: done"));
        assert!(text.contains("completed"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_start_deploy_job() {
        let app = test_app();
        let response = app
            .router
            .oneshot(send(
                "POST",
                "/api/jobs/deploy",
                serde_json::json!({"target": "web", "environment": "staging"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = body_json(response).await;
        assert_eq!(body["kind"], "deploy");
        let id = body["id"].as_str().unwrap().to_string();

        for _ in 0..200 {
            if app
                .state
                .jobs
                .get(&id)
                .is_some_and(|job| job.status.is_terminal())
            {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }
        let job = app.state.jobs.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.output, vec!["shipped web"]);
    }

    #[tokio::test]
    async fn test_ai_job_requires_prompt() {
        let app = test_app();
        let response = app
            .router
            .oneshot(send(
                "POST",
                "/api/jobs/ai",
                serde_json::json!({"target": "ABC-1", "prompt": ""}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_settings_are_masked() {
        let app = unconfigured_app();
        let response = app
            .router
            .clone()
            .oneshot(send(
                "PUT",
                "/api/settings",
                serde_json::json!({
                    "azure_devops": {
                        "organization": "acme",
                        "project": "Web",
                        "repository": "web-app",
                        "pat": "super-secret"
                    },
                    "polling_interval_minutes": 0
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!app.state.poller.is_running());

        let settings = body_json(app.router.oneshot(get("/api/settings")).await.unwrap()).await;
        assert_eq!(settings["azure_devops"]["pat"], crate::config::SECRET_MASK);
        assert_eq!(settings["azure_devops"]["organization"], "acme");
        assert_eq!(settings["polling"]["interval_minutes"], 0);
    }

    #[tokio::test]
    async fn test_huge_poll_interval_is_clamped() {
        let app = test_app();
        let response = app
            .router
            .clone()
            .oneshot(send(
                "PUT",
                "/api/settings",
                serde_json::json!({ "polling_interval_minutes": u64::MAX }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            app.state.service.poll_interval_minutes(),
            crate::config::MAX_POLL_INTERVAL_MINUTES
        );
        assert!(app.state.poller.is_running());
        app.state.poller.stop();

        let settings = body_json(app.router.oneshot(get("/api/settings")).await.unwrap()).await;
        assert_eq!(
            settings["polling"]["interval_minutes"],
            crate::config::MAX_POLL_INTERVAL_MINUTES
        );
    }

    #[tokio::test]
    async fn test_upstream_failure_is_internal_error() {
        let tracker = FakeTracker::with_tickets(vec![ticket("ABC-1", "login")]);
        tracker.fail_key("ABC-1");
        let app = app_with_tracker(tracker);
        let response = app.router.oneshot(get("/api/tickets/ABC-1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("HTTP 500"));
    }

    #[tokio::test]
    async fn test_malformed_body_is_json_bad_request() {
        let app = test_app();
        let response = app
            .router
            .oneshot(send("POST", "/api/jobs/ai", serde_json::json!({ "target": 1 })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_non_numeric_pr_id_is_json_bad_request() {
        let app = test_app();
        let response = app.router.oneshot(get("/api/prs/abc")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_bad_query_is_json_bad_request() {
        let app = test_app();
        let response = app
            .router
            .oneshot(get("/api/builds?limit=lots"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"].is_string());
    }

    #[test]
    fn test_invalid_identifier_is_bad_request() {
        let err = ApiError::from(DashboardError::from(ClientError::InvalidIdentifier {
            kind: "issue key",
            value: "ABC-1/../myself".to_string(),
        }));
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
