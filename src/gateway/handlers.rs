//! HTTP handlers
//!
//! Thin wrappers: extract, call into [`crate::custody::api`], wrap the
//! result in the `{code, msg, data}` envelope.

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Serialize;

use super::state::AppState;
use crate::custody::api::{
    self, ApiResponse, ApiResult, BatchRegisterApiRequest, DismissApiRequest, EventResponse,
    ProductResponse,
    ProductViewResponse, TransferApiRequest, TransferApiResponse,
};
use crate::custody::{Actor, BatchRegistration, ReconciliationTask, RegisterProduct};

pub type HandlerResult<T> = Result<Json<ApiResponse<T>>, (StatusCode, Json<ApiResponse<()>>)>;

fn respond<T>(result: ApiResult<T>) -> HandlerResult<T> {
    result
        .map(|data| Json(ApiResponse::success(data)))
        .map_err(|(status, body)| (status, Json(body)))
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Server timestamp in milliseconds
    pub timestamp_ms: i64,
}

/// Liveness check, no auth
pub async fn health_check() -> Json<ApiResponse<HealthResponse>> {
    Json(ApiResponse::success(HealthResponse {
        status: "ok",
        version: env!("GIT_HASH"),
        timestamp_ms: chrono::Utc::now().timestamp_millis(),
    }))
}

pub async fn register_product(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<RegisterProduct>,
) -> HandlerResult<ProductResponse> {
    respond(api::register_product(&state.coordinator, &actor, req).await)
}

pub async fn register_batch(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<BatchRegisterApiRequest>,
) -> HandlerResult<BatchRegistration> {
    respond(api::register_products(&state.coordinator, &actor, req).await)
}

pub async fn transfer_product(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(serial): Path<String>,
    Json(req): Json<TransferApiRequest>,
) -> HandlerResult<TransferApiResponse> {
    respond(api::transfer_product(&state.coordinator, &actor, &serial, req).await)
}

pub async fn get_product(
    State(state): State<Arc<AppState>>,
    Path(serial): Path<String>,
) -> HandlerResult<ProductViewResponse> {
    respond(api::get_product(&state.coordinator, &serial).await)
}

pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(serial): Path<String>,
) -> HandlerResult<Vec<EventResponse>> {
    respond(api::get_history(&state.coordinator, &serial).await)
}

pub async fn my_products(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
) -> HandlerResult<Vec<ProductResponse>> {
    respond(api::my_products(&state.coordinator, &actor).await)
}

pub async fn list_reconciliation(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
) -> HandlerResult<Vec<ReconciliationTask>> {
    respond(api::list_reconciliation(&state.coordinator, &actor))
}

pub async fn reconcile_task(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(task_id): Path<String>,
) -> HandlerResult<ReconciliationTask> {
    respond(api::reconcile_task(&state.coordinator, &actor, &task_id).await)
}

pub async fn dismiss_task(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(task_id): Path<String>,
    Json(req): Json<DismissApiRequest>,
) -> HandlerResult<ReconciliationTask> {
    respond(api::dismiss_task(&state.coordinator, &actor, &task_id, req).await)
}
