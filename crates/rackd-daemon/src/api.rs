//! REST API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use rackd_core::Topology;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::state::AppState;

/// API error response
#[derive(Serialize)]
struct ApiError {
    error: String,
}

impl ApiError {
    fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

/// List all discovered devices
pub async fn list_devices(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.devices().await)
}

/// Get a specific device by key
pub async fn get_device(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> impl IntoResponse {
    match state.get_device(&key).await {
        Some(device) => Json(device).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiError::new("Device not found")),
        )
            .into_response(),
    }
}

/// Get chassis/module topology
pub async fn get_topology(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let devices = state.devices().await;
    Json(Topology::from_devices(&devices).to_graph())
}

/// Get rack registration status
pub async fn get_rack(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.rack_status())
}

/// Trigger a scan pass
pub async fn trigger_scan(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    info!("Manual scan triggered");

    match state.scan().await {
        Ok(devices) => Json(serde_json::json!({
            "status": "completed",
            "devices_found": devices.len()
        }))
        .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError::new(format!("Scan failed: {}", e))),
        )
            .into_response(),
    }
}

/// Ask the reconcile worker to re-check the rack identity
pub async fn trigger_reconcile(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    info!("Manual reconciliation triggered");

    if state.trigger_reconcile() {
        (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({"status": "scheduled"})),
        )
            .into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiError::new("Reconcile worker is not running")),
        )
            .into_response()
    }
}
