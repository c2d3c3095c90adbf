use axum::{
    Json,
    extract::{Path, State},
};
use std::sync::Arc;
use uuid::Uuid;

use crate::AppState;
use crate::models::{ConnectionResponse, CreateConnectionRequest};
use crate::utils::ApiResult;

// Register a new target-database connection
#[utoipa::path(
    post,
    path = "/api/connections",
    request_body = CreateConnectionRequest,
    responses(
        (status = 200, description = "Connection registered", body = ConnectionResponse),
        (status = 400, description = "Bad request")
    ),
    tag = "Connections"
)]
pub async fn register_connection(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateConnectionRequest>,
) -> ApiResult<Json<ConnectionResponse>> {
    tracing::info!("Connection registration request: name={}, host={}", req.name, req.host);

    let descriptor = state.registry.register(req).await?;

    Ok(Json(ConnectionResponse::from(&descriptor)))
}

// List registered connections
#[utoipa::path(
    get,
    path = "/api/connections",
    responses(
        (status = 200, description = "Registered connections", body = Vec<ConnectionResponse>)
    ),
    tag = "Connections"
)]
pub async fn list_connections(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<ConnectionResponse>>> {
    let descriptors = state.registry.list().await?;
    let responses = descriptors.iter().map(ConnectionResponse::from).collect();
    Ok(Json(responses))
}

// Get one connection
#[utoipa::path(
    get,
    path = "/api/connections/{id}",
    params(
        ("id" = Uuid, Path, description = "Connection id")
    ),
    responses(
        (status = 200, description = "Connection details", body = ConnectionResponse),
        (status = 404, description = "Connection not found")
    ),
    tag = "Connections"
)]
pub async fn get_connection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ConnectionResponse>> {
    let descriptor = state.registry.lookup(id).await?;
    Ok(Json(ConnectionResponse::from(&descriptor)))
}

// Unregister a connection
#[utoipa::path(
    delete,
    path = "/api/connections/{id}",
    params(
        ("id" = Uuid, Path, description = "Connection id")
    ),
    responses(
        (status = 200, description = "Connection unregistered"),
        (status = 404, description = "Connection not found"),
        (status = 409, description = "Connection has live handles")
    ),
    tag = "Connections"
)]
pub async fn unregister_connection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state.registry.unregister(id).await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

// Probe connectivity of a registered connection
#[utoipa::path(
    post,
    path = "/api/connections/{id}/test",
    params(
        ("id" = Uuid, Path, description = "Connection id")
    ),
    responses(
        (status = 200, description = "Connection reachable"),
        (status = 404, description = "Connection not found"),
        (status = 502, description = "Target database unreachable")
    ),
    tag = "Connections"
)]
pub async fn test_connection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    tracing::debug!("Connectivity test requested for connection {}", id);
    state.registry.test_connection(id).await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}
