//! Wi-Fi state manager — the core (`spec` §4.E).
//!
//! Holds the process-wide async mutex that serialises every mutation of the
//! wireless interface. The three external call sites — HTTP, Bluetooth, the
//! upstream poller — all go through [`WifiStateManager::connect_to_wifi`],
//! [`WifiStateManager::start_hotspot`] and [`WifiStateManager::stop_hotspot`].
//!
//! The `connect_to_wifi` → `stop_hotspot` reentrancy is resolved with an
//! internal `stop_hotspot_locked` that assumes the guard is already held,
//! and a public `stop_hotspot` that acquires the guard once and delegates to
//! it — not a recursive lock.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio::sync::{watch, Mutex, MutexGuard};
use tokio::time::{sleep, timeout};

use crate::config::{AppSettings, DeviceIdentity};
use crate::error::{CoreError, InvalidArgumentError, Result, UnavailableError};
use crate::net::nm;
use crate::net::scan_cache::ScanCache;
use crate::net::probe;

const MUTEX_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);
const INTERFACE_SETTLE_DELAY: Duration = Duration::from_secs(3);
const HOTSPOT_ACTIVATE_DELAY: Duration = Duration::from_secs(2);
const DEFAULT_HOTSPOT_PASSWORD: &str = "12345678";
const CLIENT_PROFILE_NAME: &str = "ncb-edge-client";
const HOTSPOT_PROFILE_NAME: &str = "ncb-edge-hotspot";
const TOP_N_NEARBY: usize = 5;

/// Snapshot of Wi-Fi state published to readers (HTTP `/status`, etc.).
#[derive(Debug, Clone, Default)]
pub struct WifiState {
    pub hotspot_active: bool,
    pub hotspot_ssid: Option<String>,
    pub hotspot_password: Option<String>,
    pub client_ssid: Option<String>,
}

struct WifiStateInner {
    hotspot_active: bool,
    hotspot_ssid: Option<String>,
    hotspot_password: Option<String>,
    client_ssid: Option<String>,
}

impl Default for WifiStateInner {
    fn default() -> Self {
        Self { hotspot_active: false, hotspot_ssid: None, hotspot_password: None, client_ssid: None }
    }
}

pub struct WifiStateManager {
    inner: Mutex<WifiStateInner>,
    scan_cache: Arc<ScanCache>,
    settings: Arc<Mutex<AppSettings>>,
    identity: DeviceIdentity,
    reconnect_tx: watch::Sender<()>,
}

impl WifiStateManager {
    pub fn new(scan_cache: Arc<ScanCache>, settings: Arc<Mutex<AppSettings>>, identity: DeviceIdentity) -> Self {
        let (reconnect_tx, _rx) = watch::channel(());
        Self {
            inner: Mutex::new(WifiStateInner::default()),
            scan_cache,
            settings,
            identity,
            reconnect_tx,
        }
    }

    /// Subscribe to the "force an immediate upstream reconnect" signal.
    /// Published the moment `connect_to_wifi` successfully writes a new
    /// NCBIP, replacing the source's reflection-based static hook.
    pub fn subscribe_reconnect(&self) -> watch::Receiver<()> {
        self.reconnect_tx.subscribe()
    }

    pub async fn status(&self) -> WifiState {
        let guard = self.inner.lock().await;
        WifiState {
            hotspot_active: guard.hotspot_active,
            hotspot_ssid: guard.hotspot_ssid.clone(),
            hotspot_password: guard.hotspot_password.clone(),
            client_ssid: guard.client_ssid.clone(),
        }
    }

    async fn acquire(&self) -> Result<MutexGuard<'_, WifiStateInner>> {
        timeout(MUTEX_ACQUIRE_TIMEOUT, self.inner.lock())
            .await
            .map_err(|_| CoreError::from(UnavailableError::MutexTimeout))
    }

    // ── connect_to_wifi ────────────────────────────────────────

    pub async fn connect_to_wifi(&self, ssid: &str, password: Option<&str>, ncbip: &str) -> Result<String> {
        let mut guard = self.acquire().await?;

        // If the hotspot was already up, tearing it down to attempt the
        // client connection is itself a mutation of connectivity — a later
        // failure must roll it back regardless of where the failure occurs.
        // Otherwise, rollback is only warranted once `connect_to_wifi_inner`
        // actually starts tearing down/replacing the client profile (step
        // 4+); a pre-flight validation rejection (malformed IP, unknown
        // SSID) must leave an already-working state untouched (`spec` §8
        // scenario 2).
        let mut began_mutating_connectivity = guard.hotspot_active;
        if guard.hotspot_active {
            self.stop_hotspot_locked(&mut guard).await.ok();
        }

        match self
            .connect_to_wifi_inner(&mut guard, ssid, password, ncbip, &mut began_mutating_connectivity)
            .await
        {
            Ok(message) => Ok(message),
            Err(e) => {
                if began_mutating_connectivity {
                    warn!("connect_to_wifi: {e}, rolling back to hotspot");
                    if let Err(rollback_err) = self.start_hotspot_locked(&mut guard, None, None).await {
                        warn!("connect_to_wifi: rollback to hotspot also failed: {rollback_err}");
                    }
                } else {
                    info!("connect_to_wifi: {e}, rejected before touching connectivity, leaving state untouched");
                }
                Err(e)
            }
        }
    }

    async fn connect_to_wifi_inner(
        &self,
        guard: &mut MutexGuard<'_, WifiStateInner>,
        ssid: &str,
        password: Option<&str>,
        ncbip: &str,
        began_mutating_connectivity: &mut bool,
    ) -> Result<String> {
        ncbip
            .parse::<Ipv4Addr>()
            .map_err(|_| CoreError::from(InvalidArgumentError::InvalidIpv4(ncbip.to_string())))?;

        if !nm::radio_enabled().await {
            return Err(CoreError::from(UnavailableError::RadioDisabled));
        }

        if !self.scan_cache.is_available(ssid) {
            let nearby = self.scan_cache.top_n_ssids(TOP_N_NEARBY).join(", ");
            return Err(CoreError::from(UnavailableError::SsidNotFound {
                requested: ssid.to_string(),
                nearby,
            }));
        }

        // Everything from here on actually mutates the wireless interface —
        // a failure past this point must re-raise the hotspot on rollback.
        *began_mutating_connectivity = true;

        nm::delete_connection(CLIENT_PROFILE_NAME).await;
        if nm::add_client_profile(CLIENT_PROFILE_NAME, ssid, password).await.is_err() {
            info!("connect_to_wifi: profile install failed, falling back to direct connect");
            nm::device_wifi_connect(ssid, password).await?;
        } else {
            nm::connection_up(CLIENT_PROFILE_NAME).await?;
        }

        sleep(INTERFACE_SETTLE_DELAY).await;

        if !nm::radio_enabled().await {
            return Err(CoreError::from(UnavailableError::RadioDisabled));
        }
        let active_ssid = nm::current_ssid().await;
        let table_has_ssid = nm::connection_is_active(CLIENT_PROFILE_NAME).await;
        if active_ssid.as_deref() != Some(ssid) || !table_has_ssid {
            return Err(CoreError::from(UnavailableError::SsidNotFound {
                requested: ssid.to_string(),
                nearby: self.scan_cache.top_n_ssids(TOP_N_NEARBY).join(", "),
            }));
        }

        if !probe::is_reachable(ncbip).await {
            return Err(CoreError::Unreachable { ip: ncbip.to_string(), attempts: 10 });
        }

        {
            let mut settings = self.settings.lock().await;
            settings.set_ncbip(ncbip)?;
        }

        guard.client_ssid = Some(ssid.to_string());

        // Publish before signalling — a racing observer of the reconnect
        // flag must find the new NCBIP already persisted (spec §5 ordering).
        let _ = self.reconnect_tx.send(());

        Ok(format!("connected to '{ssid}', upstream {ncbip} reachable"))
    }

    // ── start_hotspot ──────────────────────────────────────────

    pub async fn start_hotspot(&self, ssid: Option<&str>, password: Option<&str>) -> Result<String> {
        let mut guard = self.acquire().await?;
        self.start_hotspot_locked(&mut guard, ssid, password).await
    }

    async fn start_hotspot_locked(
        &self,
        guard: &mut MutexGuard<'_, WifiStateInner>,
        ssid: Option<&str>,
        password: Option<&str>,
    ) -> Result<String> {
        if guard.hotspot_active {
            return Ok("hotspot already active".to_string());
        }

        let ssid = ssid.map(str::to_string).unwrap_or_else(|| self.identity.hotspot_ssid());
        let password = match password {
            Some(p) if nm::validate_password(p).is_ok() && p.len() >= nm::MIN_WPA_PSK_LEN => p.to_string(),
            _ => DEFAULT_HOTSPOT_PASSWORD.to_string(),
        };

        nm::device_disconnect("wlan0").await;
        nm::delete_connection(HOTSPOT_PROFILE_NAME).await;

        nm::add_ap_profile(HOTSPOT_PROFILE_NAME, &ssid, &password).await?;
        nm::connection_up(HOTSPOT_PROFILE_NAME).await?;

        sleep(HOTSPOT_ACTIVATE_DELAY).await;

        if !nm::connection_is_active(HOTSPOT_PROFILE_NAME).await {
            return Err(CoreError::from(crate::error::HostToolError {
                command: "nmcli connection up (hotspot)".to_string(),
                exit_code: -1,
                stderr: "hotspot profile did not appear in active-connection table".to_string(),
            }));
        }

        install_captive_portal_rules().await?;

        guard.hotspot_active = true;
        guard.hotspot_ssid = Some(ssid.clone());
        guard.hotspot_password = Some(password);

        Ok(format!("hotspot '{ssid}' active"))
    }

    // ── stop_hotspot ───────────────────────────────────────────

    pub async fn stop_hotspot(&self) -> Result<String> {
        let mut guard = self.acquire().await?;
        self.stop_hotspot_locked(&mut guard).await
    }

    /// Assumes the caller already holds `self.inner`'s guard. Never
    /// reacquires the mutex — this is what makes `connect_to_wifi`'s
    /// internal hotspot teardown safe.
    async fn stop_hotspot_locked(&self, guard: &mut MutexGuard<'_, WifiStateInner>) -> Result<String> {
        if !guard.hotspot_active {
            return Ok("hotspot already inactive".to_string());
        }

        // Rules torn down before the profile is deactivated, so the
        // transient window never redirects real client traffic (spec §5b).
        teardown_captive_portal_rules().await;

        nm::connection_down(HOTSPOT_PROFILE_NAME).await;
        nm::delete_connection(HOTSPOT_PROFILE_NAME).await;

        guard.hotspot_active = false;
        guard.hotspot_ssid = None;
        guard.hotspot_password = None;

        Ok("hotspot stopped".to_string())
    }
}

async fn install_captive_portal_rules() -> Result<()> {
    crate::net::captive_portal::install_rules().await
}

async fn teardown_captive_portal_rules() {
    crate::net::captive_portal::teardown_rules().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_identity() -> DeviceIdentity {
        DeviceIdentity {
            device_id: "EDGE-00AB-CD12".to_string(),
            owner_id: "owner".to_string(),
            upstream_url: "https://ncb.example".to_string(),
        }
    }

    #[tokio::test]
    async fn connect_to_wifi_rejects_malformed_ipv4() {
        let manager = WifiStateManager::new(
            Arc::new(ScanCache::new()),
            Arc::new(Mutex::new(test_settings())),
            test_identity(),
        );
        let result = manager.connect_to_wifi("HomeNet", None, "not-an-ip").await;
        assert!(result.is_err());
    }

    /// `spec` §8 scenario 2: a pre-flight rejection (here, an empty scan
    /// cache means the SSID is never found) must leave the hotspot state
    /// untouched — no rollback without a prior teardown.
    #[tokio::test]
    async fn unknown_ssid_rejection_does_not_raise_the_hotspot() {
        let manager = WifiStateManager::new(
            Arc::new(ScanCache::new()),
            Arc::new(Mutex::new(test_settings())),
            test_identity(),
        );
        let result = manager.connect_to_wifi("Ghost", None, "192.168.1.50").await;
        assert!(result.is_err());
        let status = manager.status().await;
        assert!(!status.hotspot_active);
    }

    fn test_settings() -> AppSettings {
        let path = std::env::temp_dir().join(format!("wifi_state_test_{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"{"DeviceId":"EDGE-00AB-CD12","OwnerId":"owner","UpstreamUrl":"https://ncb.example","SenderReceiverSet":{"NCBIP":"0.0.0.0"}}"#,
        )
        .unwrap();
        AppSettings::load(&path).unwrap()
    }
}
