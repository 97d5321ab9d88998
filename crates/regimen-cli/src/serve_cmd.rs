use std::net::SocketAddr;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use regimen_core::EngineError;
use regimen_core::mutator::{Rejection, RetractionOutcome};
use regimen_core::plan::ActivityPlan;
use regimen_core::{enrollment, ledger, mutator, plan};
use regimen_db::models::{Activity, Exercise, MembershipMap};
use regimen_db::queries::exercises as exercise_db;

use crate::config::EngineSettings;

/// Header carrying the authenticated coach identity.
pub const COACH_HEADER: &str = "x-coach-id";

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    field: Option<String>,
    unpersisted_weeks: Option<Vec<i32>>,
}

impl AppError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            field: None,
            unpersisted_weeks: None,
        }
    }

    pub fn bad_request(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            ..Self::new(StatusCode::BAD_REQUEST, msg)
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn internal(err: anyhow::Error) -> Self {
        tracing::error!(error = %format!("{err:#}"), "request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Validation { field, message } => Self::bad_request(field, message),
            EngineError::NotFound { what } => Self::not_found(format!("{what} not found")),
            EngineError::Timeout(deadline) => Self::new(
                StatusCode::GATEWAY_TIMEOUT,
                format!("operation exceeded its {deadline:?} deadline"),
            ),
            EngineError::PartialRetraction {
                unpersisted_weeks,
                source,
            } => {
                tracing::error!(
                    weeks = ?unpersisted_weeks,
                    error = %format!("{source:#}"),
                    "retraction rolled back"
                );
                Self {
                    unpersisted_weeks: Some(unpersisted_weeks),
                    ..Self::new(StatusCode::INTERNAL_SERVER_ERROR, "retraction not persisted")
                }
            }
            other @ (EngineError::Storage(_) | EngineError::InvariantViolation(_)) => {
                tracing::error!(error = %other, "request failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let mut body = serde_json::json!({ "error": self.message });
        if let Some(field) = self.field {
            body["field"] = serde_json::Value::String(field);
        }
        if let Some(weeks) = self.unpersisted_weeks {
            body["unpersisted_weeks"] = serde_json::json!(weeks);
        }
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct EnrollRequest {
    pub client_id: Uuid,
    pub activity_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct EnrollResponse {
    pub enrollment_id: Uuid,
    pub created: u64,
}

#[derive(Debug, Deserialize)]
pub struct RemoveItemsRequest {
    pub ids: Vec<i64>,
    pub activity_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct RemoveItemsResponse {
    pub deleted_count: usize,
    pub retracted: Vec<i64>,
    /// Plan entries filtered out of the activity's weeks.
    pub removed_from_detalle: usize,
    pub exercises_fully_deleted: usize,
    pub executions_purged: u64,
    pub enrollments_completed: Vec<Uuid>,
    pub rejected: Vec<Rejection>,
    pub touched_weeks: Vec<i32>,
    pub deleted_weeks: Vec<i32>,
}

impl From<RetractionOutcome> for RemoveItemsResponse {
    fn from(o: RetractionOutcome) -> Self {
        Self {
            deleted_count: o.retracted.len(),
            retracted: o.retracted,
            removed_from_detalle: o.removed_from_plan,
            exercises_fully_deleted: o.exercises_fully_deleted,
            executions_purged: o.executions_purged,
            enrollments_completed: o.enrollments_completed,
            rejected: o.rejected,
            touched_weeks: o.touched_weeks,
            deleted_weeks: o.deleted_weeks,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PairQuery {
    pub client_id: Uuid,
    pub activity_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct CompleteResponse {
    pub ok: bool,
    pub already_completed: bool,
    pub enrollment_completed: bool,
    pub record: regimen_db::models::ExecutionRecord,
}

#[derive(Debug, Serialize)]
pub struct PlanWeekResponse {
    pub week_number: i32,
    pub days: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct ActivityPlanResponse {
    pub activity: Activity,
    pub period_count: i32,
    pub weeks: Vec<PlanWeekResponse>,
}

impl From<ActivityPlan> for ActivityPlanResponse {
    fn from(p: ActivityPlan) -> Self {
        Self {
            activity: p.activity,
            period_count: p.period_count,
            weeks: p
                .weeks
                .iter()
                .map(|(week_number, week)| PlanWeekResponse {
                    week_number: *week_number,
                    days: week.to_json(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ExerciseResponse {
    #[serde(flatten)]
    pub exercise: Exercise,
    pub activities: MembershipMap,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub settings: EngineSettings,
}

pub fn build_router(pool: PgPool, settings: EngineSettings) -> Router {
    Router::new()
        .route("/api/enrollments", post(enroll_handler))
        .route("/api/exercise-items", delete(remove_items_handler))
        .route("/api/progress-summary", get(progress_handler))
        .route("/api/executions/next", get(next_pending_handler))
        .route("/api/executions/{id}/complete", post(complete_handler))
        .route("/api/activities/{id}/plan", get(activity_plan_handler))
        .route("/api/exercises/{id}", get(exercise_handler))
        .layer(CorsLayer::permissive())
        .with_state(AppState { pool, settings })
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(pool: PgPool, settings: EngineSettings, bind: &str, port: u16) -> Result<()> {
    let app = build_router(pool, settings);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("regimen serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("regimen serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for Ctrl+C; shutting down");
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn coach_from_headers(headers: &HeaderMap) -> Result<Uuid, AppError> {
    let raw = headers
        .get(COACH_HEADER)
        .ok_or_else(|| AppError::bad_request(COACH_HEADER, "missing coach identity"))?;
    raw.to_str()
        .ok()
        .and_then(|s| Uuid::parse_str(s.trim()).ok())
        .ok_or_else(|| AppError::bad_request(COACH_HEADER, "expected a UUID"))
}

async fn enroll_handler(
    State(state): State<AppState>,
    Json(req): Json<EnrollRequest>,
) -> Result<axum::response::Response, AppError> {
    let outcome = enrollment::enroll(
        &state.pool,
        req.client_id,
        req.activity_id,
        state.settings.operation_timeout,
    )
    .await?;

    Ok(Json(EnrollResponse {
        enrollment_id: outcome.enrollment.id,
        created: outcome.created,
    })
    .into_response())
}

async fn remove_items_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RemoveItemsRequest>,
) -> Result<axum::response::Response, AppError> {
    let coach_id = coach_from_headers(&headers)?;
    let outcome = mutator::remove_exercises(
        &state.pool,
        coach_id,
        req.activity_id,
        &req.ids,
        state.settings.orphan_policy,
        state.settings.operation_timeout,
    )
    .await?;

    Ok(Json(RemoveItemsResponse::from(outcome)).into_response())
}

async fn progress_handler(
    State(state): State<AppState>,
    Query(q): Query<PairQuery>,
) -> Result<axum::response::Response, AppError> {
    let summary = ledger::progress_summary(
        &state.pool,
        q.client_id,
        q.activity_id,
        state.settings.operation_timeout,
    )
    .await?;
    Ok(Json(summary).into_response())
}

async fn next_pending_handler(
    State(state): State<AppState>,
    Query(q): Query<PairQuery>,
) -> Result<axum::response::Response, AppError> {
    let next = ledger::next_pending(
        &state.pool,
        q.client_id,
        q.activity_id,
        state.settings.operation_timeout,
    )
    .await?;
    Ok(Json(next).into_response())
}

async fn complete_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<axum::response::Response, AppError> {
    let outcome =
        ledger::mark_completed(&state.pool, id, state.settings.operation_timeout).await?;
    Ok(Json(CompleteResponse {
        ok: true,
        already_completed: outcome.already_completed,
        enrollment_completed: outcome.enrollment_completed,
        record: outcome.record,
    })
    .into_response())
}

async fn activity_plan_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let deadline = state.settings.operation_timeout;
    let plan = regimen_core::with_deadline(deadline, async {
        let mut conn = state.pool.acquire().await?;
        plan::load_activity_plan(&mut conn, id).await
    })
    .await?;
    Ok(Json(ActivityPlanResponse::from(plan)).into_response())
}

async fn exercise_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<axum::response::Response, AppError> {
    let exercise = exercise_db::get_exercise(&state.pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("exercise {id} not found")))?;
    let activities = exercise_db::get_membership_map(&state.pool, id)
        .await
        .map_err(AppError::internal)?;

    Ok(Json(ExerciseResponse {
        exercise,
        activities,
    })
    .into_response())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
