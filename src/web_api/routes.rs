//! API Routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use crate::ipcam_scan::ScanRequest;
use crate::models::ApiResponse;
use crate::state::AppState;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/healthz", get(super::health_check))
        // Scans
        .route("/api/scans", post(run_scan))
        .route("/api/scans/running", get(list_running_scans))
        .route("/api/scans/:id/abort", post(abort_scan))
        // Inventory
        .route("/api/installations/:code/assets", get(list_assets))
        .with_state(state)
}

// ========================================
// IpcamScan Handlers
// ========================================

/// Run a scan to completion. Dropping the connection cancels it.
async fn run_scan(
    State(state): State<AppState>,
    Json(req): Json<ScanRequest>,
) -> impl IntoResponse {
    match state.ipcam_scan.run_scan(req).await {
        Ok(response) => Json(ApiResponse::success(response)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn list_running_scans(State(state): State<AppState>) -> impl IntoResponse {
    let running: Vec<String> = state
        .ipcam_scan
        .running_scans()
        .iter()
        .map(|id| id.to_string())
        .collect();

    Json(ApiResponse::success(json!({ "running_scan_ids": running })))
}

/// Abort a running scan
async fn abort_scan(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let scan_id = match uuid::Uuid::parse_str(&id) {
        Ok(id) => id,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::<()>::error("Invalid UUID")),
            )
                .into_response()
        }
    };

    if state.ipcam_scan.abort_scan(&scan_id) {
        Json(ApiResponse::success(json!({
            "message": "Abort requested",
            "scan_id": scan_id.to_string()
        })))
        .into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::<()>::error("Scan is not running")),
        )
            .into_response()
    }
}

async fn list_assets(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> impl IntoResponse {
    match state.ipcam_scan.list_assets(&code).await {
        Ok(assets) => Json(ApiResponse::success(assets)).into_response(),
        Err(e) => e.into_response(),
    }
}
