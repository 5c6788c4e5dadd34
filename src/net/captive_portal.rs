//! Captive-portal hotspot coordinator (`spec` §4.G).
//!
//! A supervisor task: waits for an initial grace period, then every
//! check-interval consults the upstream connection state and consecutive-miss
//! counter (both owned by the upstream poller, `upstream::UpstreamStatus`)
//! and raises or lowers the hotspot accordingly. Also owns the iptables/
//! dnsmasq rule lifecycle bound to hotspot-active.

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio::time::{interval, sleep};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::net::wifi_state::WifiStateManager;
use crate::shell;
use crate::upstream::UpstreamStatus;

const INITIAL_DELAY: Duration = Duration::from_secs(90);
const CHECK_INTERVAL: Duration = Duration::from_secs(90);
const MISS_THRESHOLD: u32 = 12;
const DNSMASQ_PID_FILE: &str = "/tmp/dnsmasq-captive.pid";
const DNSMASQ_CONF_FILE: &str = "/tmp/dnsmasq-captive.conf";
const HOTSPOT_GATEWAY: &str = "10.42.0.1";

/// Install the three iptables rules plus the best-effort dnsmasq wildcard
/// record (`spec` §3's "Captive-portal rules" / §4.G's installed-rules list).
pub async fn install_rules() -> Result<()> {
    shell::run("iptables -t nat -F").await;
    shell::run("iptables -F").await;
    shell::run("iptables -A INPUT -p tcp --dport 5000 -j ACCEPT").await;
    shell::run("iptables -t nat -A PREROUTING -p tcp --dport 80 -j REDIRECT --to-port 5000").await;
    shell::run("iptables -t nat -A PREROUTING -p tcp --dport 443 -j REDIRECT --to-port 5000").await;
    shell::run("iptables -A INPUT -p udp --dport 53 -j ACCEPT").await;
    shell::run("iptables -A INPUT -p tcp --dport 53 -j ACCEPT").await;

    let dnsmasq_conf = format!(
        "address=/#/{HOTSPOT_GATEWAY}\nno-resolv\nno-poll\nbind-interfaces\n"
    );
    if tokio::fs::write(DNSMASQ_CONF_FILE, dnsmasq_conf).await.is_ok() {
        let cmd = format!(
            "dnsmasq --conf-file={DNSMASQ_CONF_FILE} --pid-file={DNSMASQ_PID_FILE}"
        );
        let result = shell::run(&cmd).await;
        if !result.success {
            warn!("captive portal: dnsmasq spawn failed (best-effort): {}", result.stderr.trim());
        }
    }
    Ok(())
}

/// Flush the nat/filter tables and kill the dnsmasq PID (`spec` §4.G
/// teardown). Rules are removed before the AP profile is deactivated by the
/// caller (`spec` §5 ordering guarantee b).
pub async fn teardown_rules() {
    shell::run("iptables -t nat -F").await;
    shell::run("iptables -F").await;

    if let Ok(pid) = tokio::fs::read_to_string(DNSMASQ_PID_FILE).await {
        let pid = pid.trim();
        if !pid.is_empty() {
            shell::run(&format!("kill {pid}")).await;
        }
    }
    tokio::fs::remove_file(DNSMASQ_PID_FILE).await.ok();
    tokio::fs::remove_file(DNSMASQ_CONF_FILE).await.ok();
}

/// Periodic supervisor that raises/lowers the hotspot based on upstream
/// connectivity.
pub struct CaptivePortalCoordinator {
    wifi: Arc<WifiStateManager>,
    upstream: Arc<UpstreamStatus>,
    allow_hotspot: bool,
}

impl CaptivePortalCoordinator {
    pub fn new(wifi: Arc<WifiStateManager>, upstream: Arc<UpstreamStatus>, allow_hotspot: bool) -> Self {
        Self { wifi, upstream, allow_hotspot }
    }

    pub async fn run(self, cancel: CancellationToken) {
        // One-shot cleanup: ensure no leftover AP profile from an ungraceful
        // shutdown before deciding anything.
        if let Err(e) = self.wifi.stop_hotspot().await {
            warn!("captive portal: boot cleanup stop_hotspot failed: {e}");
        }

        if !self.allow_hotspot {
            info!("captive portal: disabled by configuration");
            return;
        }

        tokio::select! {
            _ = cancel.cancelled() => { self.shutdown().await; return; }
            _ = sleep(INITIAL_DELAY) => {}
        }

        let mut ticker = interval(CHECK_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.shutdown().await;
                    return;
                }
                _ = ticker.tick() => {
                    self.check_once().await;
                }
            }
        }
    }

    async fn check_once(&self) {
        let connected = self.upstream.is_connected();
        let misses = self.upstream.consecutive_misses();
        let status = self.wifi.status().await;

        if !connected && misses > MISS_THRESHOLD {
            if let Err(e) = self.wifi.start_hotspot(None, None).await {
                warn!("captive portal: start_hotspot failed: {e}");
            }
        } else if connected && status.hotspot_active {
            if let Err(e) = self.wifi.stop_hotspot().await {
                warn!("captive portal: stop_hotspot failed: {e}");
            }
        }
    }

    async fn shutdown(&self) {
        let status = self.wifi.status().await;
        if status.hotspot_active {
            if let Err(e) = self.wifi.stop_hotspot().await {
                warn!("captive portal: shutdown stop_hotspot failed: {e}");
            }
        }
    }
}
