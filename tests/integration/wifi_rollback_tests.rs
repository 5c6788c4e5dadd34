//! Exercises the Wi-Fi state manager's error paths that stay within pure
//! Rust (no real `nmcli`/`iptables` on the host required): SSID validation
//! against an empty scan cache, and malformed target-IP rejection.

use std::sync::Arc;

use ncb_edge_core::config::{AppSettings, DeviceIdentity};
use ncb_edge_core::error::{CoreError, UnavailableError};
use ncb_edge_core::net::{ScanCache, WifiStateManager};
use tokio::sync::Mutex;

fn test_identity() -> DeviceIdentity {
    DeviceIdentity {
        device_id: "EDGE-ROLL-0001".to_string(),
        owner_id: "owner-roll".to_string(),
        upstream_url: "https://ncb.example".to_string(),
    }
}

fn test_settings() -> AppSettings {
    let path = std::env::temp_dir().join(format!("wifi_rollback_settings_{}.json", std::process::id()));
    std::fs::write(
        &path,
        r#"{"DeviceId":"EDGE-ROLL-0001","OwnerId":"owner-roll","UpstreamUrl":"https://ncb.example","SenderReceiverSet":{"NCBIP":"0.0.0.0"}}"#,
    )
    .unwrap();
    AppSettings::load(&path).unwrap()
}

#[tokio::test]
async fn connecting_to_an_unknown_ssid_never_succeeds() {
    // `nmcli` is checked (radio_enabled) before the scan cache is consulted,
    // so on a host without it this surfaces as `RadioDisabled` rather than
    // `SsidNotFound` — either is an acceptable rejection for an SSID this
    // manager has never scanned.
    let manager = WifiStateManager::new(
        Arc::new(ScanCache::new()),
        Arc::new(Mutex::new(test_settings())),
        test_identity(),
    );

    let result = manager.connect_to_wifi("SomeNeighborsWifi", None, "192.168.1.50").await;

    match result {
        Err(CoreError::Unavailable(UnavailableError::SsidNotFound { requested, .. })) => {
            assert_eq!(requested, "SomeNeighborsWifi");
        }
        Err(CoreError::Unavailable(UnavailableError::RadioDisabled)) => {}
        other => panic!("expected SsidNotFound or RadioDisabled, got {other:?}"),
    }
}

#[tokio::test]
async fn connecting_with_a_malformed_target_ip_never_touches_the_scan_cache() {
    let manager = WifiStateManager::new(
        Arc::new(ScanCache::new()),
        Arc::new(Mutex::new(test_settings())),
        test_identity(),
    );

    let result = manager.connect_to_wifi("AnySsid", None, "999.999.999.999").await;
    assert!(matches!(
        result,
        Err(CoreError::InvalidArgument(ncb_edge_core::error::InvalidArgumentError::InvalidIpv4(_)))
    ));
}

#[tokio::test]
async fn fresh_manager_reports_no_hotspot_and_no_client() {
    let manager = WifiStateManager::new(
        Arc::new(ScanCache::new()),
        Arc::new(Mutex::new(test_settings())),
        test_identity(),
    );
    let status = manager.status().await;
    assert!(!status.hotspot_active);
    assert!(status.client_ssid.is_none());
}
