//! NCB Edge provisioning core.
//!
//! Owns three things on behalf of the gateway device: the Wi-Fi state
//! (client/hotspot), a Bluetooth RFCOMM provisioning channel, and a captive
//! portal that redirects onto the provisioning UI while the hotspot is up. A
//! background poller keeps the device's Wi-Fi target in sync with whatever
//! the upstream backend last told it to use.
//!
//! Every long-lived subsystem is a `tokio` task observing one process-wide
//! `CancellationToken`; the wireless interface itself is serialized behind
//! one async mutex owned by [`net::WifiStateManager`].

#![deny(unused_must_use)]

pub mod bluetooth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod http;
pub mod net;
pub mod shell;
pub mod upstream;
