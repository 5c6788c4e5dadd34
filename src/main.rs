//! NCB Edge provisioning core — process entry point.
//!
//! Brings up, in dependency order: the device identity and crypto key, the
//! Wi-Fi scan cache and state manager, the upstream poller, the captive
//! portal coordinator, the Bluetooth RFCOMM server and its adapter
//! housekeeping tasks, and finally the HTTP provisioning surface. Every
//! long-lived task shares one `CancellationToken`, cancelled by SIGINT or
//! SIGTERM, with a bounded shutdown budget.

use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::sync::Mutex;
use tokio::time::{interval, timeout};
use tokio_util::sync::CancellationToken;

use ncb_edge_core::bluetooth::{self, RfcommServer};
use ncb_edge_core::config::AppSettings;
use ncb_edge_core::crypto::Signer;
use ncb_edge_core::http::{self, AppState};
use ncb_edge_core::net::captive_portal::CaptivePortalCoordinator;
use ncb_edge_core::net::{ScanCache, WifiStateManager};
use ncb_edge_core::upstream::{UpstreamPoller, UpstreamStatus};

const APPSETTINGS_PATH: &str = "appsettings.json";
const SCAN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);
const SHUTDOWN_BUDGET: Duration = Duration::from_secs(10);
const DEFAULT_BIND: &str = "0.0.0.0:5000";

#[tokio::main]
async fn main() {
    env_logger::init();
    info!("ncb-edge-core v{} starting (built {})", env!("CARGO_PKG_VERSION"), build_timestamp());

    let settings = match AppSettings::load(APPSETTINGS_PATH) {
        Ok(s) => s,
        Err(e) => {
            error!("fatal: could not load {APPSETTINGS_PATH}: {e}");
            std::process::exit(1);
        }
    };
    let identity = match settings.device_identity() {
        Ok(id) => id,
        Err(e) => {
            error!("fatal: appsettings.json missing required identity fields: {e}");
            std::process::exit(1);
        }
    };
    info!("device identity: {} (owner {})", identity.device_id, identity.owner_id);

    let key_path = format!("Cert/{}_private_key.pem", identity.device_id);
    let signer = match Signer::load_from_file(&key_path) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("fatal: could not load private key at {key_path}: {e}");
            std::process::exit(1);
        }
    };

    let settings = Arc::new(Mutex::new(settings));
    let cancel = CancellationToken::new();

    let scan_cache = Arc::new(ScanCache::new());
    let wifi = Arc::new(WifiStateManager::new(scan_cache.clone(), settings.clone(), identity.clone()));
    let upstream_status = UpstreamStatus::new();

    let mut tasks = Vec::new();

    {
        let scan_cache = scan_cache.clone();
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            scan_refresh_loop(scan_cache, cancel).await;
        }));
    }

    {
        let poller = UpstreamPoller::new(
            identity.clone(),
            signer.clone(),
            wifi.clone(),
            settings.clone(),
            upstream_status.clone(),
        );
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            poller.run(cancel).await;
        }));
    }

    {
        let coordinator = CaptivePortalCoordinator::new(wifi.clone(), upstream_status.clone(), true);
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            coordinator.run(cancel).await;
        }));
    }

    {
        let alias = identity.hotspot_ssid();
        let service_uuid = identity.bluetooth_service_uuid();
        tokio::spawn(async move {
            bluetooth::adapter::bring_up(&alias, &service_uuid).await;
        });
    }

    {
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            bluetooth::adapter::discoverability_watchdog(cancel).await;
        }));
    }

    {
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            bluetooth::adapter::pairing_cleaner(identity.device_id.clone(), cancel).await;
        }));
    }

    {
        let ctx = bluetooth::protocol::ProtocolContext {
            identity: identity.clone(),
            signer: signer.clone(),
            wifi: wifi.clone(),
            settings: settings.clone(),
        };
        let server = RfcommServer::new(ctx);
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            server.run(cancel).await;
        }));
    }

    let app_state = AppState { wifi: wifi.clone(), scan_cache: scan_cache.clone(), identity: identity.clone() };
    let router = http::router(app_state);
    let listener = match tokio::net::TcpListener::bind(DEFAULT_BIND).await {
        Ok(l) => l,
        Err(e) => {
            error!("fatal: could not bind HTTP listener on {DEFAULT_BIND}: {e}");
            std::process::exit(1);
        }
    };
    info!("provisioning HTTP surface listening on {DEFAULT_BIND}");

    let http_cancel = cancel.clone();
    let http_task = tokio::spawn(async move {
        let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
            http_cancel.cancelled().await;
        });
        if let Err(e) = serve.await {
            error!("http server exited with error: {e}");
        }
    });

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, cancelling all tasks (budget {SHUTDOWN_BUDGET:?})");
    cancel.cancel();

    if timeout(SHUTDOWN_BUDGET, async {
        for task in tasks {
            let _ = task.await;
        }
        let _ = http_task.await;
    })
    .await
    .is_err()
    {
        warn!("shutdown budget exceeded, exiting anyway");
    }

    info!("ncb-edge-core stopped");
}

async fn scan_refresh_loop(scan_cache: Arc<ScanCache>, cancel: CancellationToken) {
    let mut ticker = interval(SCAN_REFRESH_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                scan_cache.refresh().await;
            }
        }
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn build_timestamp() -> &'static str {
    option_env!("BUILD_TIMESTAMP").unwrap_or("unknown")
}
