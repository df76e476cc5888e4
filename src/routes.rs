//! REST endpoints over the onboarding engine.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::error;

use crate::engine::{OnboardingEngine, StepResult};
use crate::error::OnboardingError;
use crate::milestones::Subject;
use crate::paths::PathContext;
use crate::progress::StepUpdate;
use crate::reports::ReportScope;

/// Shared state for the API routes.
#[derive(Clone)]
pub struct ApiState {
    pub engine: OnboardingEngine,
}

type ApiResult<T> = Result<T, OnboardingError>;

impl IntoResponse for OnboardingError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::SessionNotComplete { .. } => StatusCode::CONFLICT,
            Self::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::PartialFailure { .. } => StatusCode::MULTI_STATUS,
            Self::Config(_) | Self::Cache(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }
        let body = serde_json::json!({
            "error": self.to_string(),
            "kind": self.kind(),
        });
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct BeginRequest {
    user_id: String,
    #[serde(flatten)]
    context: PathContext,
}

/// Build the onboarding REST routes.
pub fn api_routes(engine: OnboardingEngine) -> Router {
    let state = ApiState { engine };

    Router::new()
        .route("/health", get(health))
        .route("/api/sessions", post(begin_onboarding))
        .route("/api/sessions/{id}", get(get_session))
        .route("/api/sessions/{id}/complete", post(complete_session))
        .route("/api/sessions/{id}/abandon", post(abandon_session))
        .route("/api/sessions/{id}/sync", post(sync_session))
        .route("/api/sessions/{id}/steps/{step_id}", put(track_step))
        .route("/api/sessions/{id}/steps/{step_id}/complete", post(complete_step))
        .route("/api/sessions/{id}/progress", get(get_progress))
        .route("/api/sessions/{id}/next-step", get(get_next_step))
        .route("/api/sessions/{id}/blockers", get(get_blockers))
        .route("/api/sessions/{id}/certificate", get(get_certificate))
        .route("/api/sessions/{id}/badges", get(get_session_badges))
        .route("/api/users/{user_id}/badges", get(get_user_badges))
        .route("/api/reports/sessions/{id}", get(session_report))
        .route("/api/reports/paths/{id}", get(path_report))
        .route("/api/reports/users/{id}", get(user_report))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "onboarding-engine"
    }))
}

// ── Sessions ────────────────────────────────────────────────────────────

async fn begin_onboarding(
    State(state): State<ApiState>,
    Json(req): Json<BeginRequest>,
) -> ApiResult<impl IntoResponse> {
    let started = state.engine.begin_onboarding(&req.user_id, req.context).await?;
    Ok((StatusCode::CREATED, Json(started)))
}

async fn get_session(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.get_session(&id).await?))
}

async fn complete_session(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let completion = state.engine.complete_session(&id).await?;
    let status = if completion.warnings.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    };
    Ok((status, Json(completion)).into_response())
}

async fn abandon_session(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.abandon_session(&id).await?))
}

async fn sync_session(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.restore_and_sync(&id).await?))
}

// ── Steps ───────────────────────────────────────────────────────────────

async fn track_step(
    State(state): State<ApiState>,
    Path((id, step_id)): Path<(String, String)>,
    Json(update): Json<StepUpdate>,
) -> ApiResult<Response> {
    let tracked = state.engine.track_step_progress(&id, &step_id, update).await?;
    let status = if tracked.warnings.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    };
    Ok((status, Json(tracked)).into_response())
}

/// Responds 207 when the step was recorded but a side effect failed.
async fn complete_step(
    State(state): State<ApiState>,
    Path((id, step_id)): Path<(String, String)>,
    Json(result): Json<StepResult>,
) -> ApiResult<Response> {
    let outcome = state
        .engine
        .record_step_completion(&id, &step_id, result)
        .await?;
    let status = if outcome.is_partial() {
        StatusCode::MULTI_STATUS
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome)).into_response())
}

// ── Read models ─────────────────────────────────────────────────────────

async fn get_progress(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.get_overall_progress(&id).await?))
}

async fn get_next_step(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let next = state.engine.get_next_step(&id).await?;
    Ok(Json(serde_json::json!({
        "next_step": next,
        "ready_to_complete": next.is_none(),
    })))
}

async fn get_blockers(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.identify_blockers(&id).await?))
}

async fn get_certificate(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.generate_completion_certificate(&id).await?))
}

async fn get_session_badges(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    // Surface a missing session as 404 rather than an empty badge list.
    state.engine.get_session(&id).await?;
    Ok(Json(
        state.engine.get_available_badges(&Subject::Session(id)).await?,
    ))
}

async fn get_user_badges(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(
        state.engine.get_available_badges(&Subject::User(user_id)).await?,
    ))
}

// ── Reports ─────────────────────────────────────────────────────────────

async fn session_report(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(
        state
            .engine
            .generate_progress_report(ReportScope::Session(id))
            .await?,
    ))
}

async fn path_report(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(
        state
            .engine
            .generate_progress_report(ReportScope::Path(id))
            .await?,
    ))
}

async fn user_report(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(
        state
            .engine
            .generate_progress_report(ReportScope::User(id))
            .await?,
    ))
}
