//! JSON over HTTP surface
//!
//! | Method | Path                        | Body / response                         |
//! |--------|-----------------------------|-----------------------------------------|
//! | POST   | `/api/sync/plan`            | `SyncPlanRequest` → `SyncPlan`          |
//! | GET    | `/api/sync/plan/:plan_id`   | → `SyncPlan` (does not claim)           |
//! | POST   | `/api/sync/run`             | `RunRequest` → `RunReport`              |
//! | POST   | `/api/security/confirm`     | `ConfirmRequest` → `ConfirmResponse`    |
//! | GET    | `/api/health`               | → `{"ok": true}`                        |
//!
//! Errors are `{"detail": ..., "kind": ...}` with a status derived from the
//! error kind.
//!
//! A run executes on its own task. The handler only waits for it, so a client
//! that disconnects mid-run does not cancel transfers already under way.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tracing::{error, info, warn};

use fleet_sync::{RunReport, RunRequest, SyncError, SyncPlan};

use crate::errors::ServiceError;
use crate::service::{ConfirmRequest, ConfirmResponse, SyncPlanRequest, SyncService};

/// Error response body
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    detail: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

fn sync_status(err: &SyncError) -> StatusCode {
    match err {
        SyncError::PlanNotFound(_) => StatusCode::NOT_FOUND,
        SyncError::PlanExpired(_) => StatusCode::GONE,
        SyncError::PlanInUse(_) => StatusCode::CONFLICT,
        SyncError::TicketInvalid | SyncError::TicketExpired => StatusCode::FORBIDDEN,
        SyncError::UnknownConflict { .. }
        | SyncError::DuplicateResolution { .. }
        | SyncError::InvalidRequest(_)
        | SyncError::InvalidPattern(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        let status = match &err {
            ServiceError::Sync(inner) => sync_status(inner),
            ServiceError::UnknownServer(_) | ServiceError::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ServiceError::InvalidConfirmCode => StatusCode::UNAUTHORIZED,
            ServiceError::ConfirmDisabled => StatusCode::FORBIDDEN,
        };
        Self {
            status,
            kind: err.kind(),
            detail: err.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        error!("Run task ended abnormally: {}", err);
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            kind: "internal",
            detail: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "invalid_request",
            detail: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!("Request failed ({}): {}", self.kind, self.detail);
        }
        let body = Json(json!({ "detail": self.detail, "kind": self.kind }));
        (self.status, body).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn router(service: Arc<SyncService>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/sync/plan", post(create_plan))
        .route("/api/sync/plan/:plan_id", get(preview_plan))
        .route("/api/sync/run", post(run_plan))
        .route("/api/security/confirm", post(confirm))
        .with_state(service)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

async fn create_plan(
    State(service): State<Arc<SyncService>>,
    payload: Result<Json<SyncPlanRequest>, JsonRejection>,
) -> ApiResult<SyncPlan> {
    let Json(request) = payload?;
    let plan = service.plan(request).await?;
    info!("Plan {} returned to client", plan.plan_id);
    Ok(Json(plan))
}

async fn preview_plan(
    State(service): State<Arc<SyncService>>,
    Path(plan_id): Path<String>,
) -> ApiResult<SyncPlan> {
    Ok(Json(service.preview(&plan_id)?))
}

async fn run_plan(
    State(service): State<Arc<SyncService>>,
    payload: Result<Json<RunRequest>, JsonRejection>,
) -> ApiResult<RunReport> {
    let Json(request) = payload?;
    if request.plan_id.is_empty() {
        return Err(ServiceError::InvalidRequest("plan_id is required".into()).into());
    }
    let execution = tokio::spawn(async move { service.run(&request).await });
    Ok(Json(execution.await??))
}

async fn confirm(
    State(service): State<Arc<SyncService>>,
    payload: Result<Json<ConfirmRequest>, JsonRejection>,
) -> ApiResult<ConfirmResponse> {
    let Json(request) = payload?;
    Ok(Json(service.confirm(&request)?))
}
