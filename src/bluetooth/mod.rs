//! Bluetooth RFCOMM provisioning server (`spec` §4.F).
//!
//! Four pieces, split the way the wire protocol and the socket/process
//! plumbing naturally separate:
//!
//! - [`socket`] — raw `AF_BLUETOOTH`/`SOCK_STREAM`/`BTPROTO_RFCOMM` FFI.
//! - [`protocol`] — the JSON envelope + plaintext debug dialect, pure
//!   message handling with no socket or process dependency.
//! - [`adapter`] — bring-up, the discoverability watchdog and pairing
//!   hygiene, all shelling out to `bluetoothctl`/`hciconfig`/`btmgmt`/`sdptool`.
//! - [`server`] — the listening socket lifecycle, the accept loop and the
//!   per-client message loop that ties the other three together.

pub mod adapter;
pub mod protocol;
pub mod server;
pub mod socket;

pub use server::RfcommServer;
