//! Web server setup and routing

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::api;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/devices", get(api::list_devices))
        .route("/api/devices/{key}", get(api::get_device))
        .route("/api/topology", get(api::get_topology))
        .route("/api/rack", get(api::get_rack))
        .route("/api/rack/reconcile", post(api::trigger_reconcile))
        .route("/api/scan", post(api::trigger_scan))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the status API and the scan loop until ctrl-c
pub async fn run(state: Arc<AppState>, bind: &str) -> Result<()> {
    let app = router(state.clone());
    let scan_loop = state.spawn_scan_loop();

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(address = %bind, "Starting status API");
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    if let Some(scan_loop) = scan_loop {
        scan_loop.abort();
    }
    state.shutdown().await;
    served?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use rackd_discovery::SimulatedResource;
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn state(temp_dir: &TempDir) -> Arc<AppState> {
        let mut config = Config::default();
        config.daemon.state_path = temp_dir.path().join("rackd-state.json");
        config.cluster.port = 1;
        config.breaker.max_retries = Some(0);
        config.simulated_devices = vec![
            SimulatedResource {
                is_simulated: Some(false),
                serial_number: Some("CHASSIS1".to_string()),
                product_name: Some("NI cDAQ-9178".to_string()),
                user_alias: Some("cDAQ1".to_string()),
                resource_name: Some("cDAQ1".to_string()),
                provides_link_name: Some("cDAQ1Link".to_string()),
                is_chassis: true,
                ..Default::default()
            },
            SimulatedResource {
                is_simulated: Some(false),
                serial_number: Some("MOD1".to_string()),
                product_name: Some("NI 9229".to_string()),
                user_alias: Some("cDAQ1Mod1".to_string()),
                resource_name: Some("cDAQ1Mod1".to_string()),
                connects_to_link_name: Some("cDAQ1Link".to_string()),
                ..Default::default()
            },
        ];
        AppState::new(config).unwrap()
    }

    async fn request(app: Router, method: &str, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_scan_then_query_devices() {
        let temp_dir = TempDir::new().unwrap();
        let state = state(&temp_dir);
        let app = router(state.clone());

        let (status, body) = request(app.clone(), "POST", "/api/scan").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["devices_found"], 2);

        let (status, body) = request(app.clone(), "GET", "/api/devices").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 2);

        let (status, body) = request(app.clone(), "GET", "/api/devices/MOD1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["parent_device"], "CHASSIS1");

        let (status, _) = request(app.clone(), "GET", "/api/devices/missing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = request(app.clone(), "GET", "/api/topology").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["nodes"].as_array().unwrap().len(), 2);

        state.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_rack_endpoints() {
        let temp_dir = TempDir::new().unwrap();
        let state = state(&temp_dir);
        let app = router(state.clone());

        let (status, body) = request(app.clone(), "GET", "/api/rack").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["identity"]["rack_key"], 0);

        let (status, _) = request(app.clone(), "POST", "/api/rack/reconcile").await;
        assert_eq!(status, StatusCode::ACCEPTED);

        state.shutdown().await;
        let (status, _) = request(app, "POST", "/api/rack/reconcile").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
