use axum::{
    Json,
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::AppState;
use crate::models::{PagedResult, ScanJobStatus, ScanListFilter, ScanRequest, ScanStatus};
use crate::utils::ApiResult;

// Submit a scan job
#[utoipa::path(
    post,
    path = "/api/scans",
    request_body = ScanRequest,
    responses(
        (status = 200, description = "Scan accepted, body carries the job id"),
        (status = 400, description = "Bad request"),
        (status = 429, description = "Worker queue full")
    ),
    tag = "Scans"
)]
pub async fn submit_scan(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ScanRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    tracing::info!("Scan submission for connection {}", req.connection_id);

    let job_id = state.orchestrator.submit(req).await?;

    Ok(Json(serde_json::json!({ "job_id": job_id })))
}

// Current status snapshot of a scan job
#[utoipa::path(
    get,
    path = "/api/scans/{id}",
    params(
        ("id" = Uuid, Path, description = "Scan job id")
    ),
    responses(
        (status = 200, description = "Scan status", body = ScanJobStatus),
        (status = 404, description = "Scan not found")
    ),
    tag = "Scans"
)]
pub async fn get_scan_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ScanJobStatus>> {
    let status = state.orchestrator.status(id).await?;
    Ok(Json(status))
}

#[derive(Debug, Deserialize)]
pub struct ScanListQuery {
    pub status: Option<ScanStatus>,
    pub connection_id: Option<Uuid>,
    #[serde(default)]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub size: u32,
}

fn default_page_size() -> u32 {
    20
}

// Paginated scan list with optional status / connection filters
#[utoipa::path(
    get,
    path = "/api/scans",
    params(
        ("status" = Option<ScanStatus>, Query, description = "Filter by scan status"),
        ("connection_id" = Option<Uuid>, Query, description = "Filter by connection"),
        ("page" = Option<u32>, Query, description = "Zero-based page index"),
        ("size" = Option<u32>, Query, description = "Page size (max 500)")
    ),
    responses(
        (status = 200, description = "Paginated scan jobs")
    ),
    tag = "Scans"
)]
pub async fn list_scans(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScanListQuery>,
) -> ApiResult<Json<PagedResult<ScanJobStatus>>> {
    let filter =
        ScanListFilter { status: query.status, connection_id: query.connection_id };
    let page = state.orchestrator.list(&filter, query.page, query.size).await?;
    Ok(Json(page))
}

// Cancel a running scan
#[utoipa::path(
    post,
    path = "/api/scans/{id}/cancel",
    params(
        ("id" = Uuid, Path, description = "Scan job id")
    ),
    responses(
        (status = 200, description = "Cancellation accepted"),
        (status = 404, description = "Scan not found"),
        (status = 409, description = "Scan already terminal")
    ),
    tag = "Scans"
)]
pub async fn cancel_scan(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state.orchestrator.cancel(id).await?;
    Ok(Json(serde_json::json!({ "status": "cancelled" })))
}

// Compliance report of a completed scan
#[utoipa::path(
    get,
    path = "/api/scans/{id}/report",
    params(
        ("id" = Uuid, Path, description = "Scan job id")
    ),
    responses(
        (status = 200, description = "Compliance report JSON"),
        (status = 404, description = "Scan not found"),
        (status = 409, description = "Scan not completed")
    ),
    tag = "Scans"
)]
pub async fn get_scan_report(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    // Serve the stored serialization untouched so repeated reads are
    // byte-equal
    let report_json = state.orchestrator.report(id).await?;
    Ok((
        [(header::CONTENT_TYPE, "application/json")],
        report_json,
    )
        .into_response())
}
