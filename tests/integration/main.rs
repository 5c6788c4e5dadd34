//! Integration test driver for `tests/integration/`.
//!
//! Each `mod` below maps to a file exercising a cross-module scenario
//! against the real crate with no live host tools (`nmcli`, `bluetoothctl`)
//! required — the scenarios here stop at the boundary where those tools
//! would actually need to be present.

mod provisioning_flow_tests;
mod wifi_rollback_tests;
