//! Bluetooth adapter control (`spec` §4.F bring-up, discoverability watchdog,
//! pairing hygiene).
//!
//! Everything here shells out through [`crate::shell`] to `bluetoothctl`,
//! `hciconfig`, `btmgmt` and (best-effort) `sdptool` — there is no BlueZ
//! D-Bus binding, matching the rest of the crate's "host interaction funnels
//! through one executor" design.

use std::time::Duration;

use log::{info, warn};
use tokio::time::{interval, sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::shell;

const DISCOVERABILITY_CHECK_INTERVAL: Duration = Duration::from_secs(60);
const PAIRING_CLEAN_INTERVAL: Duration = Duration::from_secs(5 * 60);
const BLE_ADVERTISING_BUDGET: Duration = Duration::from_secs(15);
const SDP_CHANNEL: u8 = 1;

/// Bring the adapter up, clear any previously paired devices (trust-on-first-
/// use — `spec` §4.F forbids long-lived pairings), make it discoverable and
/// pairable with zero timeout, set its alias, and best-effort register an
/// SDP record. BLE advertising is kicked off as a detached background task
/// bounded by [`BLE_ADVERTISING_BUDGET`] so it can never block bring-up.
pub async fn bring_up(alias: &str, service_uuid: &str) {
    shell::run("bluetoothctl power on").await;
    shell::run("hciconfig hci0 up").await;

    remove_all_paired_devices().await;

    shell::run("bluetoothctl discoverable-timeout 0").await;
    shell::run("bluetoothctl discoverable on").await;
    shell::run("bluetoothctl pairable on").await;
    shell::run(&format!("bluetoothctl system-alias '{alias}'")).await;

    register_sdp_record_best_effort(service_uuid).await;

    let service_uuid = service_uuid.to_string();
    tokio::spawn(async move {
        if timeout(BLE_ADVERTISING_BUDGET, advertise_ble(&service_uuid)).await.is_err() {
            warn!("bluetooth: BLE advertising exceeded its {BLE_ADVERTISING_BUDGET:?} budget, abandoning");
        }
    });

    info!("bluetooth: bring-up complete (alias='{alias}')");
}

async fn remove_all_paired_devices() {
    for mac in list_known_devices().await {
        shell::run(&format!("bluetoothctl remove {mac}")).await;
    }
}

/// Best-effort: write a channel-1 SDP record XML under `/tmp` and register it
/// with `sdptool` if the tool is present. Failure is logged, never fatal.
async fn register_sdp_record_best_effort(service_uuid: &str) {
    let record_path = format!("/tmp/neuchar_sdp_record_{service_uuid}.xml");
    let record_xml = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" ?>\n<record>\n  \
         <attribute id=\"0x0001\"><sequence><uuid value=\"{service_uuid}\"/></sequence></attribute>\n  \
         <attribute id=\"0x0004\"><sequence><sequence><uuid value=\"0x0100\"/></sequence>\
         <sequence><uuid value=\"0x0003\"/><uint8 value=\"{SDP_CHANNEL}\"/></sequence></sequence></attribute>\n\
         </record>\n"
    );
    if tokio::fs::write(&record_path, record_xml).await.is_err() {
        warn!("bluetooth: could not write SDP record to {record_path}, skipping registration");
        return;
    }
    let result = shell::run(&format!("sdptool add --channel={SDP_CHANNEL} --xml={record_path} SP")).await;
    if !result.success {
        warn!("bluetooth: sdptool registration failed (best-effort): {}", result.stderr.trim());
    }
}

/// Best-effort BLE advertising via `btmgmt`. Never propagates failure —
/// the RFCOMM channel is the authenticated provisioning path; BLE
/// advertising is a discovery convenience only.
async fn advertise_ble(service_uuid: &str) {
    let result = shell::run(&format!("btmgmt advertising on uuid {service_uuid}")).await;
    if !result.success {
        warn!("bluetooth: btmgmt advertising failed (best-effort): {}", result.stderr.trim());
    }
}

/// Every 60 s, confirm the adapter is still discoverable; if not, reissue
/// power/discoverable/pairable. Guards against external tools silently
/// un-discoverable-ing the adapter (`spec` §4.F).
pub async fn discoverability_watchdog(cancel: CancellationToken) {
    let mut ticker = interval(DISCOVERABILITY_CHECK_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                if !is_discoverable().await {
                    warn!("bluetooth: adapter went un-discoverable, reasserting");
                    shell::run("bluetoothctl power on").await;
                    shell::run("bluetoothctl discoverable on").await;
                    shell::run("bluetoothctl pairable on").await;
                }
            }
        }
    }
}

async fn is_discoverable() -> bool {
    let result = shell::run("bluetoothctl show").await;
    result.success
        && result
            .stdout
            .lines()
            .any(|line| line.trim().eq_ignore_ascii_case("Discoverable: yes"))
}

/// Every 5 minutes, remove any known device that is not currently connected,
/// along with its cached pairing files under
/// `/var/lib/bluetooth/<adapter>/<peer>` (`spec` §4.F pairing hygiene).
pub async fn pairing_cleaner(adapter_mac: String, cancel: CancellationToken) {
    let mut ticker = interval(PAIRING_CLEAN_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                clean_disconnected_devices(&adapter_mac).await;
            }
        }
    }
}

async fn clean_disconnected_devices(adapter_mac: &str) {
    for mac in list_known_devices().await {
        if !is_connected(&mac).await {
            info!("bluetooth: removing disconnected pairing for {mac}");
            shell::run(&format!("bluetoothctl remove {mac}")).await;
            let cache_dir = format!("/var/lib/bluetooth/{adapter_mac}/{mac}");
            shell::run(&format!("rm -rf '{cache_dir}'")).await;
        }
    }
}

/// Parse `bluetoothctl devices` output (`Device XX:XX:XX:XX:XX:XX Name`).
async fn list_known_devices() -> Vec<String> {
    let result = shell::run("bluetoothctl devices").await;
    if !result.success {
        return Vec::new();
    }
    result
        .stdout
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1).map(str::to_string))
        .collect()
}

async fn is_connected(mac: &str) -> bool {
    let result = shell::run(&format!("bluetoothctl info {mac}")).await;
    result.success
        && result
            .stdout
            .lines()
            .any(|line| line.trim().eq_ignore_ascii_case("Connected: yes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_device_list_lines() {
        let stdout = "Device AA:BB:CC:DD:EE:FF Phone One\nDevice 11:22:33:44:55:66 Phone Two\n";
        let macs: Vec<String> = stdout
            .lines()
            .filter_map(|line| line.split_whitespace().nth(1).map(str::to_string))
            .collect();
        assert_eq!(macs, vec!["AA:BB:CC:DD:EE:FF", "11:22:33:44:55:66"]);
    }

    #[test]
    fn discoverable_check_is_case_insensitive_and_exact() {
        let stdout = "Controller AA:BB:CC:DD:EE:FF\nDiscoverable: yes\nPairable: yes\n";
        let found = stdout.lines().any(|line| line.trim().eq_ignore_ascii_case("Discoverable: yes"));
        assert!(found);
        let stdout_off = "Discoverable: no\n";
        let found_off = stdout_off.lines().any(|line| line.trim().eq_ignore_ascii_case("Discoverable: yes"));
        assert!(!found_off);
    }

    #[tokio::test]
    async fn discoverability_watchdog_stops_on_cancel() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        // Should return almost immediately since the token is already cancelled.
        tokio::time::timeout(Duration::from_secs(1), discoverability_watchdog(cancel))
            .await
            .expect("watchdog did not observe cancellation promptly");
    }
}
