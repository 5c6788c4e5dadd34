//! Network subsystems: the Wi-Fi scan cache, the reachability probe, the
//! Wi-Fi state manager (the core), the NetworkManager CLI adapter, and the
//! captive-portal hotspot coordinator.

pub mod captive_portal;
pub mod nm;
pub mod probe;
pub mod scan_cache;
pub mod wifi_state;

pub use scan_cache::{ScanCache, ScanEntry};
pub use wifi_state::{WifiState, WifiStateManager};
