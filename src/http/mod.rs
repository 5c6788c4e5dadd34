//! HTTP provisioning endpoints (`spec` §4.I) and the captive-portal redirect
//! middleware (`spec` §4.J).
//!
//! Every handler answers `HTTP 200` and encodes success/failure in the body
//! — `spec` §7 is explicit that this is deliberate, not an oversight, since
//! the captive-portal client is often a minimal browser on a degraded
//! transport that cannot reason about status codes.

pub mod middleware;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{info, warn};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::sleep;
use tower_http::trace::TraceLayer;

use crate::config::DeviceIdentity;
use crate::net::{ScanCache, WifiStateManager};

const PROVISION_DELAY: Duration = Duration::from_secs(2);
const DEFAULT_HOTSPOT_GATEWAY: &str = "10.42.0.1";
const PROVISIONING_PORT: u16 = 5000;

#[derive(Clone)]
pub struct AppState {
    pub wifi: Arc<WifiStateManager>,
    pub scan_cache: Arc<ScanCache>,
    pub identity: DeviceIdentity,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/Admin/Provision/networks", get(networks))
        .route("/api/Admin/Provision/connect", post(connect))
        .route("/api/Admin/Provision/status", get(status))
        .route("/api/Admin/Provision/start", post(start))
        .route("/api/Admin/Provision/stop", post(stop))
        .layer(axum::middleware::from_fn_with_state(state.clone(), middleware::captive_portal_redirect))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn networks(State(state): State<AppState>) -> Json<Value> {
    let entries = state.scan_cache.all();
    let data: Vec<Value> = entries
        .into_iter()
        .map(|e| {
            json!({
                "SSID": e.ssid,
                "Signal": e.signal_dbm,
                "Security": e.security,
                "Frequency": e.frequency_mhz,
            })
        })
        .collect();
    Json(json!({ "success": true, "data": data }))
}

#[derive(Debug, Deserialize)]
struct ConnectRequest {
    #[serde(rename = "SSID")]
    ssid: String,
    #[serde(rename = "Password")]
    password: Option<String>,
    #[serde(rename = "NCBIP")]
    ncbip: String,
}

/// Returns success immediately — the Wi-Fi transition tears down the
/// client's own connection to this HTTP endpoint — then schedules the real
/// `connect_to_wifi` on a background task after a short delay so the
/// response has time to flush first (`spec` §4.I).
async fn connect(State(state): State<AppState>, Json(body): Json<ConnectRequest>) -> Json<Value> {
    let ConnectRequest { ssid, password, ncbip } = body;
    info!("http: /connect requested for '{ssid}', scheduling background transition");

    let wifi = state.wifi.clone();
    tokio::spawn(async move {
        sleep(PROVISION_DELAY).await;
        match wifi.connect_to_wifi(&ssid, password.as_deref(), &ncbip).await {
            Ok(message) => info!("http: background connect_to_wifi succeeded: {message}"),
            Err(e) => warn!("http: background connect_to_wifi failed: {e}"),
        }
    });

    Json(json!({
        "success": true,
        "data": Value::Null,
        "message": "Wi-Fi transition scheduled; connection to this endpoint will drop shortly",
    }))
}

async fn status(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.wifi.status().await;
    let config_url = snapshot
        .hotspot_active
        .then(|| format!("http://{DEFAULT_HOTSPOT_GATEWAY}:{PROVISIONING_PORT}/provision"));
    Json(json!({
        "success": true,
        "data": {
            "IsActive": snapshot.hotspot_active,
            "SSID": snapshot.hotspot_ssid,
            "Password": snapshot.hotspot_password,
            "ConfigUrl": config_url,
        }
    }))
}

#[derive(Debug, Deserialize, Default)]
struct StartRequest {
    #[serde(rename = "SSID")]
    ssid: Option<String>,
    #[serde(rename = "Password")]
    password: Option<String>,
}

async fn start(State(state): State<AppState>, body: Option<Json<StartRequest>>) -> Json<Value> {
    let StartRequest { ssid, password } = body.map(|Json(b)| b).unwrap_or_default();
    match state.wifi.start_hotspot(ssid.as_deref(), password.as_deref()).await {
        Ok(message) => Json(json!({ "success": true, "data": message })),
        Err(e) => Json(json!({ "success": false, "errorMessage": e.to_string() })),
    }
}

async fn stop(State(state): State<AppState>) -> Json<Value> {
    match state.wifi.stop_hotspot().await {
        Ok(message) => Json(json!({ "success": true, "data": message })),
        Err(e) => Json(json!({ "success": false, "errorMessage": e.to_string() })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_url_matches_spec_default() {
        let url = format!("http://{DEFAULT_HOTSPOT_GATEWAY}:{PROVISIONING_PORT}/provision");
        assert_eq!(url, "http://10.42.0.1:5000/provision");
    }
}
