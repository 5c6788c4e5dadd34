//! Provisioning wire protocol (`spec` §3/§4.F).
//!
//! Pure message handling, decoupled from the socket and session plumbing so
//! it can be unit-tested without a live Bluetooth adapter. Two dialects
//! share one line-oriented transport: a JSON envelope for the real
//! provisioning protocol, and a plaintext debug dialect (`PING`, `STATUS`,
//! `TIME`, `INFO`, `HELP`, anything else echoed back).

use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::{AppSettings, DeviceIdentity};
use crate::crypto::Signer;
use crate::net::wifi_state::WifiStateManager;

pub const MSG_READ_DEVICE_ID: i64 = 10000;
pub const MSG_PROVISION_WIFI: i64 = 10050;

#[derive(Debug, Deserialize)]
pub struct ProvisionRequest {
    #[serde(rename = "MsgId")]
    pub msg_id: String,
    #[serde(rename = "Time")]
    pub time: Option<String>,
    #[serde(rename = "Type")]
    pub msg_type: i64,
    #[serde(rename = "Data")]
    pub data: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProvisionResponse {
    #[serde(rename = "MsgId")]
    pub msg_id: String,
    #[serde(rename = "Time")]
    pub time: String,
    #[serde(rename = "Type")]
    pub msg_type: i64,
    #[serde(rename = "Success")]
    pub success: bool,
    #[serde(rename = "Message")]
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", rename = "Data")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "Sign")]
    pub sign: Option<String>,
}

impl ProvisionResponse {
    fn failure(msg_id: &str, msg_type: i64, message: impl Into<String>) -> Self {
        Self {
            msg_id: msg_id.to_string(),
            time: Utc::now().to_rfc3339(),
            msg_type,
            success: false,
            message: message.into(),
            data: None,
            sign: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WifiCredentials {
    #[serde(rename = "SSID")]
    ssid: String,
    #[serde(rename = "Password")]
    password: Option<String>,
    #[serde(rename = "NCBIP")]
    ncbip: String,
}

/// Dependencies a message handler needs; grouped so `server.rs` constructs
/// it once and clones the `Arc`s per session.
#[derive(Clone)]
pub struct ProtocolContext {
    pub identity: DeviceIdentity,
    pub signer: Arc<Signer>,
    pub wifi: Arc<WifiStateManager>,
    pub settings: Arc<Mutex<AppSettings>>,
}

/// Handle one JSON provisioning request, returning the serialized response
/// line (without trailing `\n` — the session writer appends it).
pub async fn handle_json(ctx: &ProtocolContext, request: &ProvisionRequest) -> String {
    let response = match request.msg_type {
        MSG_READ_DEVICE_ID => handle_read_device_id(ctx, request),
        MSG_PROVISION_WIFI => handle_provision_wifi(ctx, request).await,
        other => ProvisionResponse::failure(&request.msg_id, other, "type not supported"),
    };
    serde_json::to_string(&response).unwrap_or_else(|_| "{\"Success\":false}".to_string())
}

fn handle_read_device_id(ctx: &ProtocolContext, request: &ProvisionRequest) -> ProvisionResponse {
    let did = ctx.identity.device_id.clone();
    let sign = ctx.signer.sign(&did).ok();
    ProvisionResponse {
        msg_id: request.msg_id.clone(),
        time: Utc::now().to_rfc3339(),
        msg_type: MSG_READ_DEVICE_ID,
        success: true,
        message: String::new(),
        data: Some(did),
        sign,
    }
}

async fn handle_provision_wifi(ctx: &ProtocolContext, request: &ProvisionRequest) -> ProvisionResponse {
    let Some(ciphertext) = request.data.as_deref() else {
        return ProvisionResponse::failure(&request.msg_id, MSG_PROVISION_WIFI, "missing Data field");
    };

    let plaintext = match ctx.signer.decrypt(ciphertext) {
        Ok(p) => p,
        Err(e) => {
            warn!("bluetooth: provisioning ciphertext decrypt failed: {e}");
            return ProvisionResponse::failure(&request.msg_id, MSG_PROVISION_WIFI, "decrypt failed");
        }
    };

    let credentials: WifiCredentials = match serde_json::from_str(&plaintext) {
        Ok(c) => c,
        Err(e) => {
            warn!("bluetooth: provisioning payload malformed: {e}");
            return ProvisionResponse::failure(&request.msg_id, MSG_PROVISION_WIFI, "malformed credentials");
        }
    };

    match ctx
        .wifi
        .connect_to_wifi(&credentials.ssid, credentials.password.as_deref(), &credentials.ncbip)
        .await
    {
        Ok(_) => {
            info!("bluetooth: provisioned Wi-Fi '{}'", credentials.ssid);
            let sign = ctx.signer.sign("SUCCESS").ok();
            ProvisionResponse {
                msg_id: request.msg_id.clone(),
                time: Utc::now().to_rfc3339(),
                msg_type: MSG_PROVISION_WIFI,
                success: true,
                message: String::new(),
                data: Some("SUCCESS".to_string()),
                sign,
            }
        }
        Err(e) => ProvisionResponse::failure(&request.msg_id, MSG_PROVISION_WIFI, e.to_string()),
    }
}

/// Handle one line of the plaintext debug dialect. Takes only the identity
/// (not the full [`ProtocolContext`]) since it never touches crypto or Wi-Fi
/// state — this also keeps it trivially unit-testable without a live signer.
pub fn handle_debug_command(identity: &DeviceIdentity, line: &str) -> String {
    match line.trim() {
        "PING" => "PONG".to_string(),
        "STATUS" => format!("device={} adapter-ready", identity.device_id),
        "TIME" => Utc::now().to_rfc3339(),
        "INFO" => format!(
            "device_id={} owner_id={} upstream={}",
            identity.device_id, identity.owner_id, identity.upstream_url
        ),
        "HELP" => "commands: PING STATUS TIME INFO HELP".to_string(),
        other => format!("Echo: {other}"),
    }
}

/// `true` if the payload starts with `{` and ends with `}` — the spec's
/// heuristic for "this is a JSON envelope, not the debug dialect".
pub fn looks_like_json(payload: &str) -> bool {
    let trimmed = payload.trim();
    trimmed.starts_with('{') && trimmed.ends_with('}')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_json_envelope() {
        assert!(looks_like_json("{\"MsgId\":\"m1\"}"));
        assert!(!looks_like_json("PING"));
        assert!(!looks_like_json(""));
    }

    #[test]
    fn debug_dialect_ping_pong() {
        assert_eq!(handle_debug_command(&test_identity(), "PING"), "PONG");
    }

    #[test]
    fn debug_dialect_unknown_echoes() {
        assert_eq!(handle_debug_command(&test_identity(), "whatever"), "Echo: whatever");
    }

    #[test]
    fn debug_dialect_info_reports_identity() {
        let info = handle_debug_command(&test_identity(), "INFO");
        assert!(info.contains("EDGE-00AB-CD12"));
    }

    fn test_identity() -> DeviceIdentity {
        DeviceIdentity {
            device_id: "EDGE-00AB-CD12".to_string(),
            owner_id: "owner-1".to_string(),
            upstream_url: "https://ncb.example".to_string(),
        }
    }
}
