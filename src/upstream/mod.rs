//! Upstream-info poller (`spec` §4.H).
//!
//! Every 20 s, if the upstream RPC connection is not established, asks the
//! upstream which Wi-Fi/IP the device should be on and re-binds if reality
//! has diverged. Also owns the "consecutive-miss counter" the captive-portal
//! coordinator (`spec` §4.G) reads: this resolves the open question in
//! `spec` §9 by making the poller the single writer of that counter.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::Deserialize;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use tokio::sync::Mutex;

use crate::config::{AppSettings, DeviceIdentity};
use crate::crypto::Signer;
use crate::net::nm;
use crate::net::wifi_state::WifiStateManager;

const POLL_INTERVAL: Duration = Duration::from_secs(20);

/// Shared, externally-readable upstream connectivity state. The poller is
/// the sole writer; the captive-portal coordinator only reads it.
pub struct UpstreamStatus {
    connected: AtomicBool,
    consecutive_misses: AtomicU32,
}

impl UpstreamStatus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { connected: AtomicBool::new(false), consecutive_misses: AtomicU32::new(0) })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn consecutive_misses(&self) -> u32 {
        self.consecutive_misses.load(Ordering::Acquire)
    }

    fn record_miss(&self) {
        self.connected.store(false, Ordering::Release);
        self.consecutive_misses.fetch_add(1, Ordering::AcqRel);
    }

    fn record_established(&self) {
        self.connected.store(true, Ordering::Release);
        self.consecutive_misses.store(0, Ordering::Release);
    }
}

#[derive(Debug, Deserialize)]
struct NetInfoPlaintext {
    #[serde(rename = "wifiName")]
    wifi_name: String,
    #[serde(rename = "ipAddress")]
    ip_address: String,
}

#[derive(Debug, Deserialize)]
struct GetNcbNetInfoResponse {
    #[serde(rename = "Data")]
    data: Option<String>,
}

pub struct UpstreamPoller {
    client: reqwest::Client,
    identity: DeviceIdentity,
    signer: Arc<Signer>,
    wifi: Arc<WifiStateManager>,
    settings: Arc<Mutex<AppSettings>>,
    status: Arc<UpstreamStatus>,
}

impl UpstreamPoller {
    pub fn new(
        identity: DeviceIdentity,
        signer: Arc<Signer>,
        wifi: Arc<WifiStateManager>,
        settings: Arc<Mutex<AppSettings>>,
        status: Arc<UpstreamStatus>,
    ) -> Self {
        Self { client: reqwest::Client::new(), identity, signer, wifi, settings, status }
    }

    pub fn status_handle(&self) -> Arc<UpstreamStatus> {
        self.status.clone()
    }

    /// Runs until cancelled, polling on a fixed interval and also the
    /// instant [`WifiStateManager::subscribe_reconnect`] fires — this is the
    /// replacement for the upstream's reflection-based "force reconnect"
    /// hook: a successful Wi-Fi rebind wakes this loop immediately instead
    /// of waiting out the rest of the current interval.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval(POLL_INTERVAL);
        let mut reconnect_rx = self.wifi.subscribe_reconnect();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("upstream poller: shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    if self.status.is_connected() {
                        continue;
                    }
                    if let Err(e) = self.poll_once().await {
                        debug!("upstream poller: poll failed: {e}");
                        self.status.record_miss();
                    }
                }
                changed = reconnect_rx.changed() => {
                    if changed.is_err() {
                        continue;
                    }
                    info!("upstream poller: forced reconnect signalled, polling immediately");
                    if let Err(e) = self.poll_once().await {
                        debug!("upstream poller: forced poll failed: {e}");
                        self.status.record_miss();
                    }
                }
            }
        }
    }

    async fn poll_once(&self) -> Result<(), String> {
        let now = chrono::Utc::now().to_rfc3339();
        let sign_payload = format!("{}{}{}", self.identity.device_id, self.identity.owner_id, now);
        let sign = self.signer.sign(&sign_payload).map_err(|e| e.to_string())?;

        let body = serde_json::json!({
            "DID": self.identity.device_id,
            "UID": self.identity.owner_id,
            "Time": now,
            "sign": sign,
        });

        let url = format!("{}/GetNCBNetInfo", self.identity.upstream_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?
            .json::<GetNcbNetInfoResponse>()
            .await
            .map_err(|e| e.to_string())?;

        let Some(ciphertext) = response.data else {
            return Err("response carried no Data field".to_string());
        };
        let plaintext = self.signer.decrypt(&ciphertext).map_err(|e| e.to_string())?;
        let net_info: NetInfoPlaintext = serde_json::from_str(&plaintext).map_err(|e| e.to_string())?;

        self.status.record_established();

        let current_ssid = nm::current_ssid().await;
        if current_ssid.as_deref() != Some(net_info.wifi_name.as_str()) {
            warn!(
                "upstream poller: SSID diverges (have {:?}, upstream wants '{}'), re-binding",
                current_ssid, net_info.wifi_name
            );
            self.wifi
                .connect_to_wifi(&net_info.wifi_name, None, &net_info.ip_address)
                .await
                .map_err(|e| e.to_string())?;
        } else {
            let mut settings = self.settings.lock().await;
            if settings.ncbip() != Some(net_info.ip_address.as_str()) {
                debug!("upstream poller: NCBIP diverges, persisting without touching Wi-Fi");
                settings.set_ncbip(&net_info.ip_address).map_err(|e| e.to_string())?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_status_starts_disconnected_with_zero_misses() {
        let status = UpstreamStatus::new();
        assert!(!status.is_connected());
        assert_eq!(status.consecutive_misses(), 0);
    }

    #[test]
    fn miss_then_established_resets_counter() {
        let status = UpstreamStatus::new();
        status.record_miss();
        status.record_miss();
        assert_eq!(status.consecutive_misses(), 2);
        assert!(!status.is_connected());
        status.record_established();
        assert!(status.is_connected());
        assert_eq!(status.consecutive_misses(), 0);
    }
}
